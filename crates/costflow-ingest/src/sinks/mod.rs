//! Destination sinks: relational store, columnar warehouse, metrics service

pub mod database;
pub mod monitoring;
pub mod warehouse;

pub use database::{DatabaseHandler, PgRepository, SqlRecord};
pub use monitoring::MonitoringClient;
pub use warehouse::{WarehouseClient, WarehouseRecord, WarehouseTable};
