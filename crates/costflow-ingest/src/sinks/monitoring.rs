//! Mackerel service metrics sink

use crate::error::{IngestError, Result};
use crate::metrics::MetricValue;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument};

pub const DEFAULT_MACKEREL_URL: &str = "https://api.mackerelio.com";

/// Points per request
const POST_BATCH_SIZE: usize = 100;

#[derive(Clone)]
pub struct MonitoringClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl MonitoringClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// `POST /api/v0/services/<service>/tsdb`
    #[instrument(skip(self, values), fields(count = values.len()))]
    pub async fn post_service_metrics(&self, service: &str, values: &[MetricValue]) -> Result<()> {
        let url = format!(
            "{}/api/v0/services/{}/tsdb",
            self.base_url.trim_end_matches('/'),
            service
        );

        for chunk in values.chunks(POST_BATCH_SIZE) {
            let response = self
                .http
                .post(&url)
                .header("X-Api-Key", self.api_key.expose_secret())
                .json(chunk)
                .send()
                .await
                .map_err(|e| IngestError::monitoring(format!("post metrics: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(IngestError::monitoring(format!(
                    "post metrics returned {}: {}",
                    status, body
                )));
            }
        }

        info!(service = %service, count = values.len(), "Posted service metrics");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/services/billing/tsdb"))
            .and(header("X-Api-Key", "key"))
            .and(body_json(json!([{"name": "aws.1d.unblended_cost.prod", "time": 10, "value": 1.5}])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = MonitoringClient::new(server.uri(), SecretString::from("key"));
        let values = vec![MetricValue {
            name: "aws.1d.unblended_cost.prod".into(),
            time: 10,
            value: 1.5,
        }];

        client.post_service_metrics("billing", &values).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_post_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = MonitoringClient::new(server.uri(), SecretString::from("bad"));
        let values = vec![MetricValue {
            name: "x".into(),
            time: 0,
            value: 0.0,
        }];

        let err = client.post_service_metrics("billing", &values).await.unwrap_err();
        assert!(matches!(err, IngestError::Monitoring(_)));
    }
}
