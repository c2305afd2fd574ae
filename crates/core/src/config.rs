use std::collections::HashMap;

use serde::Deserialize;

/// Root application configuration. Loaded from an optional config file
/// followed by environment variables with the prefix `ACTIONKIT__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Feature flag overrides keyed by flag name.
    #[serde(default)]
    pub features: HashMap<String, bool>,
    #[serde(default = "default_true")]
    pub escape_templates: bool,
    /// When set, every feature flag reports active.
    #[serde(default)]
    pub action_service: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_true")]
    pub json: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    3_000
}
fn default_user_agent() -> String {
    format!("actionkit/{}", env!("CARGO_PKG_VERSION"))
}
fn default_environment() -> String {
    "production".to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_filter() -> String {
    "actionkit=info".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            features: HashMap::new(),
            escape_templates: default_true(),
            action_service: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: default_true(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("ACTIONKIT")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.http.timeout_ms, 10_000);
        assert!(config.http.user_agent.starts_with("actionkit/"));
        assert!(config.runtime.escape_templates);
        assert!(!config.runtime.action_service);
        assert_eq!(config.logging.filter, "actionkit=info");
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "http": { "timeout_ms": 2500 }, "runtime": { "features": { "new-hashing": true } } }"#,
        )
        .unwrap();
        assert_eq!(config.http.timeout_ms, 2500);
        assert_eq!(config.http.connect_timeout_ms, 3_000);
        assert_eq!(config.runtime.features.get("new-hashing"), Some(&true));
        assert_eq!(config.runtime.environment, "production");
    }
}
