//! Destination writers
//!
//! A writer owns the whole path for one sink: make sure the sink's storage
//! exists, refresh snapshots, derive records and persist them.

use crate::error::Result;
use async_trait::async_trait;

pub mod database;
pub mod monitoring;
pub mod warehouse;

pub use database::DatabaseWriter;
pub use monitoring::MonitoringWriter;
pub use warehouse::WarehouseWriter;

#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&self) -> Result<()>;
}
