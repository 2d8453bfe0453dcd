use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct VigilConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Minimum similarity for a qualifying match, in (0, 1].
    pub threshold: f64,
    pub batch_concurrency: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            batch_concurrency: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub cache_ttl_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub channel_capacity: usize,
    /// Upper bound for one recipient's delivery, retries included.
    pub notify_timeout_ms: u64,
    pub max_retries: usize,
    #[serde(default)]
    pub fcm_project_id: Option<String>,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,
    #[serde(default)]
    pub fcm_access_token: Option<String>,
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 64,
            notify_timeout_ms: 5_000,
            max_retries: 2,
            fcm_project_id: None,
            fcm_base_url: default_fcm_base_url(),
            fcm_access_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8770,
        }
    }
}

impl VigilConfig {
    /// Load from a TOML file, overlaid with `VIGIL__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("VIGIL").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.matching.threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(ConfigError::Message(format!(
                "matching.threshold must be in (0, 1], got {}",
                t
            )));
        }
        if self.matching.batch_concurrency == 0 {
            return Err(ConfigError::Message(
                "matching.batch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.alerts.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "alerts.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
