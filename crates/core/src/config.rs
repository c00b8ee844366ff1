use crate::error::SpotlineResult;
use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `SPOTLINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Delivery limits. The cap applies to the sum of ad-seconds a single
/// client receives inside any trailing window of `window_secs`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_hourly_cap_secs")]
    pub hourly_cap_secs: i64,
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
    /// Longest ad accepted at campaign authoring time.
    #[serde(default = "default_max_ad_duration_secs")]
    pub max_ad_duration_secs: u32,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}
fn default_database_url() -> String {
    "sqlite://spotline.db".to_string()
}
fn default_max_connections() -> u32 {
    8
}
fn default_hourly_cap_secs() -> i64 {
    300
}
fn default_window_secs() -> i64 {
    3600
}
fn default_max_ad_duration_secs() -> u32 {
    3599
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            hourly_cap_secs: default_hourly_cap_secs(),
            window_secs: default_window_secs(),
            max_ad_duration_secs: default_max_ad_duration_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            store: StoreConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Self::default()
        }
    }
}

impl DeliveryConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> SpotlineResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, then environment
    /// variables (`SPOTLINE__DELIVERY__HOURLY_CAP_SECS=600`). Environment wins.
    pub fn load_from(path: Option<&str>) -> SpotlineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("SPOTLINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_delivery_contract() {
        let config = AppConfig::default();
        assert_eq!(config.delivery.hourly_cap_secs, 300);
        assert_eq!(config.delivery.window_secs, 3600);
        assert_eq!(config.delivery.window(), chrono::Duration::hours(1));
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.api.http_port, 8080);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"delivery": {"hourly_cap_secs": 120}, "store": {"backend": "memory"}}"#)
                .unwrap();
        assert_eq!(config.delivery.hourly_cap_secs, 120);
        assert_eq!(config.delivery.window_secs, 3600);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.node_id, "node-01");
    }

    #[test]
    fn test_missing_config_file_is_a_config_error() {
        let err = AppConfig::load_from(Some("/nonexistent/spotline-config")).unwrap_err();
        assert!(matches!(err, crate::SpotlineError::Config(_)));
        assert!(!err.is_client_error());
    }
}
