//! HTTP billing API client

use super::{BillingApi, CostLineItem, PriceLineItem, ReservationLineItem, UsageLineItem};
use anyhow::{Context, Result};
use async_trait::async_trait;
use costflow_common::calendar::{DateRange, DATE_FORMAT};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

/// Default billing API base URL
pub const DEFAULT_BILLING_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub base_url: String,
    pub token: Option<SecretString>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BILLING_API_URL.to_string(),
            token: None,
        }
    }
}

/// `GET {base}/pricing?region=..` and `GET {base}/{cost,usage,reservation}?start=..&end=..`
#[derive(Clone)]
pub struct HttpBillingClient {
    client: Client,
    config: BillingConfig,
}

impl HttpBillingClient {
    pub fn new(config: BillingConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("costflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        debug!(url = %url, ?query, "Requesting billing data");

        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let items = request
            .send()
            .await
            .with_context(|| format!("Billing API request failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("Billing API returned an error: {}", url))?
            .json::<Vec<T>>()
            .await
            .with_context(|| format!("Failed to decode billing API response: {}", url))?;

        debug!(url = %url, count = items.len(), "Received line items");
        Ok(items)
    }

    fn range_query(range: &DateRange) -> [(&'static str, String); 2] {
        [
            ("start", range.start.format(DATE_FORMAT).to_string()),
            ("end", range.end.format(DATE_FORMAT).to_string()),
        ]
    }
}

#[async_trait]
impl BillingApi for HttpBillingClient {
    #[instrument(skip(self))]
    async fn pricing(&self, region: &str) -> Result<Vec<PriceLineItem>> {
        self.get("pricing", &[("region", region.to_string())]).await
    }

    #[instrument(skip(self))]
    async fn cost(&self, range: &DateRange) -> Result<Vec<CostLineItem>> {
        self.get("cost", &Self::range_query(range)).await
    }

    #[instrument(skip(self))]
    async fn usage(&self, range: &DateRange) -> Result<Vec<UsageLineItem>> {
        self.get("usage", &Self::range_query(range)).await
    }

    #[instrument(skip(self))]
    async fn reservation(&self, range: &DateRange) -> Result<Vec<ReservationLineItem>> {
        self.get("reservation", &Self::range_query(range)).await
    }
}
