use secrecy::SecretString;
use serde::Deserialize;

/// Default snapshot bucket
pub const DEFAULT_BUCKET: &str = "costflow";

/// Default S3 region for the snapshot bucket
pub const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; the AWS default chain is used when unset
    pub access_key: Option<String>,
    pub secret_key: Option<SecretString>,
    pub path_style: bool,
}

impl StorageConfig {
    /// Build from `BUCKET_NAME` and `S3_*` variables resolved through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            endpoint: lookup("S3_ENDPOINT").filter(|v| !v.is_empty()),
            region: lookup("S3_REGION")
                .or_else(|| lookup("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
            bucket: lookup("BUCKET_NAME")
                .or_else(|| lookup("S3_BUCKET"))
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            access_key: lookup("S3_ACCESS_KEY"),
            secret_key: lookup("S3_SECRET_KEY").map(SecretString::from),
            path_style: lookup("S3_PATH_STYLE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }
}
