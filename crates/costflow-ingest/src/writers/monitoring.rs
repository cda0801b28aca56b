use super::Writer;
use crate::error::{IngestError, Result};
use crate::metrics::{aggregate, MetricValue};
use crate::pipeline::Pipeline;
use crate::sinks::monitoring::MonitoringClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// Posts per-period cost gauges to the monitoring service
pub struct MonitoringWriter {
    pipeline: Arc<Pipeline>,
}

impl MonitoringWriter {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Metric points for every configured period
    pub async fn points(&self) -> Result<Vec<MetricValue>> {
        let config = self.pipeline.config();
        let options = config.aggregate_options();
        let time = self.pipeline.run_at().timestamp();

        let mut points = Vec::new();
        for period in &config.periods {
            let batch = self.pipeline.period_batch(period).await?;
            points.extend(aggregate(
                &period.label(),
                &batch.account_costs,
                &batch.utilizations,
                &options,
                time,
            ));
        }
        Ok(points)
    }
}

#[async_trait]
impl Writer for MonitoringWriter {
    #[instrument(name = "monitoring_writer", skip(self))]
    async fn write(&self) -> Result<()> {
        let config = &self.pipeline.config().monitoring;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| IngestError::config("MACKEREL_APIKEY is not set"))?;
        let client = MonitoringClient::new(config.base_url.clone(), api_key);

        self.pipeline.prepare().await?;
        let points = self.points().await?;
        client
            .post_service_metrics(&config.service_name, &points)
            .await
    }
}
