//! Configuration types for bq-explorer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Largest number of pages a single auto-pagination run may request
pub const MAX_AUTO_PAGINATE_PAGES: u32 = 100;

/// Main configuration for a query session
///
/// Handed to the cache, the session, the paginator and the exporter when
/// they are constructed; nothing reads process-wide settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the backend proxy (default: "http://localhost:3000")
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,

    /// Path of the single POST route serving query pages
    #[serde(default = "default_fetch_path")]
    pub fetch_path: String,

    /// Maximum number of rows the page cache holds for one query (default: 200000)
    #[serde(default = "default_row_limit")]
    pub row_limit: u64,

    /// Deadline for one page fetch (default: 15 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Upper bound for the page count of one auto-pagination run (default: 100)
    #[serde(default = "default_max_auto_paginate_pages")]
    pub max_auto_paginate_pages: u32,

    /// Pause between CSV chunks during export (default: 10 milliseconds)
    #[serde(default = "default_export_chunk_delay", with = "duration_millis_serde")]
    pub export_chunk_delay: Duration,

    /// Maximum size of the staged CSV file in bytes (default: 100 MiB)
    #[serde(default = "default_export_quota_bytes")]
    pub export_quota_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            fetch_path: default_fetch_path(),
            row_limit: default_row_limit(),
            fetch_timeout: default_fetch_timeout(),
            max_auto_paginate_pages: default_max_auto_paginate_pages(),
            export_chunk_delay: default_export_chunk_delay(),
            export_quota_bytes: default_export_quota_bytes(),
        }
    }
}

impl Config {
    /// Check that the settings can drive a session
    pub fn validate(&self) -> Result<()> {
        if self.row_limit == 0 {
            return Err(config_error("row limit must be positive", "row_limit"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(config_error(
                "fetch timeout must be positive",
                "fetch_timeout",
            ));
        }
        if self.max_auto_paginate_pages == 0
            || self.max_auto_paginate_pages > MAX_AUTO_PAGINATE_PAGES
        {
            return Err(config_error(
                format!(
                    "auto-pagination page maximum must be between 1 and {}",
                    MAX_AUTO_PAGINATE_PAGES
                ),
                "max_auto_paginate_pages",
            ));
        }
        if self.export_quota_bytes == 0 {
            return Err(config_error(
                "export quota must be positive",
                "export_quota_bytes",
            ));
        }
        if !self.fetch_path.starts_with('/') {
            return Err(config_error(
                "fetch path must be absolute",
                "fetch_path",
            ));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

#[allow(clippy::expect_used)]
fn default_endpoint() -> Url {
    Url::parse("http://localhost:3000").expect("static endpoint URL is valid")
}

fn default_fetch_path() -> String {
    "/api/bigquery/github/fetch/1.0".to_string()
}

fn default_row_limit() -> u64 {
    200_000
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_auto_paginate_pages() -> u32 {
    MAX_AUTO_PAGINATE_PAGES
}

fn default_export_chunk_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_export_quota_bytes() -> u64 {
    100 * 1024 * 1024
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
