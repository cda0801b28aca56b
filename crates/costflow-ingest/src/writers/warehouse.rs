use super::Writer;
use crate::error::Result;
use crate::identity::save_all;
use crate::pipeline::Pipeline;
use crate::sinks::warehouse::{WarehouseClient, WarehouseRecord, WarehouseTable};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

/// Streams account cost and utilization into per-period warehouse tables
pub struct WarehouseWriter {
    pipeline: Arc<Pipeline>,
    client: Option<WarehouseClient>,
}

impl WarehouseWriter {
    /// Authenticates from the configured credential file on first write
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            client: None,
        }
    }

    /// Use an already authenticated client
    pub fn with_client(pipeline: Arc<Pipeline>, client: WarehouseClient) -> Self {
        Self {
            pipeline,
            client: Some(client),
        }
    }

    async fn client(&self) -> Result<WarehouseClient> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => {
                let config = &self.pipeline.config().warehouse;
                WarehouseClient::from_credential_file(&config.credential, config.base_url.clone())
                    .await
            },
        }
    }
}

async fn stream<R: WarehouseRecord>(
    client: &WarehouseClient,
    dataset: &str,
    period_label: &str,
    records: &[R],
    suppress_warning: bool,
) -> Result<()> {
    // Tables exist for every period even when it produced no rows
    client
        .ensure_table(dataset, &R::table_name(period_label), &R::schema())
        .await?;

    let Some(start) = records.iter().map(R::date).min() else {
        return Ok(());
    };
    let end = records.iter().map(R::date).max().unwrap_or(start);

    let table =
        WarehouseTable::<R>::open(client.clone(), dataset, period_label, start, end).await?;
    save_all(&table, records, suppress_warning).await?;
    table.flush().await?;
    Ok(())
}

#[async_trait]
impl Writer for WarehouseWriter {
    #[instrument(name = "warehouse_writer", skip(self))]
    async fn write(&self) -> Result<()> {
        let config = self.pipeline.config();
        let dataset = &config.warehouse.dataset;

        let client = self.client().await?;
        client.ensure_dataset(dataset).await?;
        self.pipeline.prepare().await?;

        for period in &config.periods {
            let label = period.label();
            let batch = self.pipeline.period_batch(period).await?;

            stream(&client, dataset, &label, &batch.account_costs, config.suppress_warning)
                .await?;
            stream(&client, dataset, &label, &batch.utilizations, config.suppress_warning)
                .await?;

            info!(period = %label, "Warehouse tables updated");
        }

        Ok(())
    }
}

