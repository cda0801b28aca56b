use super::Writer;
use crate::domain::{AccountCost, PricingEntry, UsageQuantity, Utilization};
use crate::error::Result;
use crate::pipeline::{Pipeline, Stores};
use crate::sinks::database::{DatabaseHandler, PgRepository};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::instrument;

/// Writes every record kind to PostgreSQL
pub struct DatabaseWriter {
    pipeline: Arc<Pipeline>,
}

impl DatabaseWriter {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    async fn persist(&self, handler: &DatabaseHandler) -> Result<()> {
        let pool = handler.pool().clone();
        let pricing = PgRepository::<PricingEntry>::create(pool.clone()).await?;
        let account_cost = PgRepository::<AccountCost>::create(pool.clone()).await?;
        let usage_quantity = PgRepository::<UsageQuantity>::create(pool.clone()).await?;
        let utilization = PgRepository::<Utilization>::create(pool).await?;

        self.pipeline.prepare().await?;
        self.pipeline
            .persist(&Stores {
                pricing: &pricing,
                account_cost: &account_cost,
                usage_quantity: &usage_quantity,
                utilization: &utilization,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Writer for DatabaseWriter {
    #[instrument(name = "database_writer", skip(self))]
    async fn write(&self) -> Result<()> {
        let config = &self.pipeline.config().database;
        let handler =
            DatabaseHandler::connect(config.datasource.expose_secret(), &config.name).await?;

        let result = self.persist(&handler).await;
        handler.close().await;
        result
    }
}
