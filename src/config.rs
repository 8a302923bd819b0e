use ::config::{Config, Environment, File, FileFormat};
use log::{debug, error};
use native_tls::TlsConnector;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{Catalog, MetricType};
use crate::connection::tls::{CertificateSource, build_tls_connector, load_certificate_pem};
use crate::error::{AgentError, Result};
use crate::runner::RunnerConfig;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "CF_AGENT";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Port of the bridge when only a host is given
pub const DEFAULT_BRIDGE_PORT: u16 = 8778;

/// Flat variable names accepted for compatibility with existing deployments
const LEGACY_ENV_KEYS: [(&str, &str); 8] = [
    ("JMX_IP", "JMX__URL"),
    ("JMX_USERNAME", "JMX__USERNAME"),
    ("JMX_PASSWORD", "JMX__PASSWORD"),
    ("JMX_SSL_ENABLED", "JMX__SSL_ENABLED"),
    ("JMX_SSL_CERT_SOURCE", "JMX__SSL_CERT_SOURCE"),
    ("JMX_SSL_CERT", "JMX__SSL_CERT"),
    ("SFX_ACCESS_KEY", "SIGNALFX__ACCESS_KEY"),
    ("SFX_INGEST_URL", "SIGNALFX__INGEST_URL"),
];

/// Rename legacy variables to their `CF_AGENT_*` form
///
/// A bare `JMX_IP` host becomes a bridge URL on [`DEFAULT_BRIDGE_PORT`],
/// using https when `JMX_SSL_ENABLED` is true.
fn translate_legacy_env(vars: &HashMap<String, String>) -> HashMap<String, String> {
    let ssl_enabled = vars
        .get("JMX_SSL_ENABLED")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

    LEGACY_ENV_KEYS
        .iter()
        .filter_map(|(legacy, key)| {
            let value = vars.get(*legacy)?;
            let value = match *legacy {
                "JMX_IP" if !value.contains("://") => {
                    let scheme = if ssl_enabled { "https" } else { "http" };
                    format!("{}://{}:{}/jolokia", scheme, value.trim(), DEFAULT_BRIDGE_PORT)
                }
                "JMX_SSL_CERT_SOURCE" => value.trim().to_lowercase(),
                _ => value.clone(),
            };
            Some((format!("{}_{}", ENV_PREFIX, key), value))
        })
        .collect()
}

/// Management bridge connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct JmxConfig {
    /// Bridge endpoint URL
    pub url: String,
    pub username: String,
    pub password: String,
    /// Trust an extra certificate for the bridge
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default)]
    pub ssl_cert_source: Option<CertificateSource>,
    /// PEM text or a path to it, depending on `ssl_cert_source`
    #[serde(default)]
    pub ssl_cert: Option<String>,
}

impl JmxConfig {
    /// Build the TLS context for the bridge, if SSL is enabled
    pub fn tls_connector(&self) -> Result<Option<TlsConnector>> {
        if !self.ssl_enabled {
            return Ok(None);
        }

        let (Some(source), Some(cert)) = (self.ssl_cert_source, self.ssl_cert.as_deref()) else {
            return Err(AgentError::Config(
                "ssl_cert_source and ssl_cert are required when SSL is enabled".to_string(),
            ));
        };

        let pem = load_certificate_pem(source, cert)?;
        build_tls_connector(&pem).map(Some)
    }
}

/// SignalFx ingest settings
#[derive(Debug, Deserialize, Clone)]
pub struct SignalFxSection {
    pub access_key: String,
    #[serde(default = "default_ingest_url")]
    pub ingest_url: String,
}

fn default_ingest_url() -> String {
    "https://ingest.signalfx.com".to_string()
}

/// Scheduler timing
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_rediscovery_interval")]
    pub rediscovery_interval_secs: u64,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

fn default_collection_interval() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    30
}

fn default_rediscovery_interval() -> u64 {
    300
}

fn default_max_parallelism() -> usize {
    8
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
            rediscovery_interval_secs: default_rediscovery_interval(),
            max_parallelism: default_max_parallelism(),
        }
    }
}

impl From<&ScheduleConfig> for RunnerConfig {
    fn from(schedule: &ScheduleConfig) -> Self {
        RunnerConfig::builder()
            .collection_interval(Duration::from_secs(schedule.collection_interval_secs))
            .reconnect_delay(Duration::from_secs(schedule.reconnect_delay_secs))
            .rediscovery_interval(Duration::from_secs(schedule.rediscovery_interval_secs))
            .max_parallelism(schedule.max_parallelism)
            .build()
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Agent configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub jmx: JmxConfig,
    pub signalfx: SignalFxSection,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Extra or replacement kinds merged over the built-in catalog
    #[serde(default)]
    pub catalog: HashMap<String, HashMap<String, MetricType>>,
}

impl AgentConfig {
    /// Load from a TOML file overlaid with the legacy variables, then with
    /// `CF_AGENT_*` environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        ConfigBuilder::new()
            .add_file(path)
            .add_legacy_env()
            .add_env()
            .build()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        ConfigBuilder::new().add_legacy_env().add_env().build()
    }

    /// Check the settings that cannot be defaulted
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("jmx.url", &self.jmx.url),
            ("jmx.username", &self.jmx.username),
            ("jmx.password", &self.jmx.password),
            ("signalfx.access_key", &self.signalfx.access_key),
            ("signalfx.ingest_url", &self.signalfx.ingest_url),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(AgentError::Config(format!("{} must not be empty", key)));
            }
        }

        if self.jmx.ssl_enabled {
            if self.jmx.ssl_cert_source.is_none() {
                return Err(AgentError::Config(
                    "jmx.ssl_cert_source is required when SSL is enabled".to_string(),
                ));
            }
            if self.jmx.ssl_cert.as_deref().is_none_or(|c| c.trim().is_empty()) {
                return Err(AgentError::Config(
                    "jmx.ssl_cert is required when SSL is enabled".to_string(),
                ));
            }
        }

        if self.schedule.max_parallelism == 0 {
            return Err(AgentError::Config(
                "schedule.max_parallelism must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The built-in catalog with the configured kinds merged in
    pub fn catalog(&self) -> Catalog {
        Catalog::cloudfoundry().extend(self.catalog.clone())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::from(&self.schedule)
    }
}

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// TOML file
    File(PathBuf),
    /// Environment variables, from the process or from a given map
    Environment(Option<HashMap<String, String>>),
    /// `JMX_*` and `SFX_*` variables, from the process or from a given map
    LegacyEnvironment(Option<HashMap<String, String>>),
    /// TOML string
    Toml(String),
}

/// Layered configuration loader; later sources override earlier ones
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    sources: Vec<ConfigSource>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Overlay the process environment
    pub fn add_env(mut self) -> Self {
        self.sources.push(ConfigSource::Environment(None));
        self
    }

    /// Overlay an explicit set of environment variables
    pub fn add_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.sources.push(ConfigSource::Environment(Some(vars)));
        self
    }

    /// Overlay the legacy `JMX_*` and `SFX_*` process variables
    pub fn add_legacy_env(mut self) -> Self {
        self.sources.push(ConfigSource::LegacyEnvironment(None));
        self
    }

    /// Overlay an explicit set of legacy variables
    pub fn add_legacy_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.sources.push(ConfigSource::LegacyEnvironment(Some(vars)));
        self
    }

    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    /// Load, deserialize and validate
    pub fn build(self) -> Result<AgentConfig> {
        let mut builder = Config::builder();

        for source in self.sources {
            match source {
                ConfigSource::File(path) => {
                    if !path.exists() {
                        error!("Configuration file {} does not exist", path.display());
                        return Err(AgentError::Config(format!(
                            "Configuration file not found: {}",
                            path.display()
                        )));
                    }
                    debug!("Loading configuration from {}", path.display());
                    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
                }
                ConfigSource::Environment(vars) => {
                    debug!("Loading configuration from environment with prefix {}", ENV_PREFIX);
                    builder = builder.add_source(environment(vars));
                }
                ConfigSource::LegacyEnvironment(vars) => {
                    let vars = vars.unwrap_or_else(|| std::env::vars().collect());
                    let translated = translate_legacy_env(&vars);
                    if !translated.is_empty() {
                        debug!("Loading {} legacy environment settings", translated.len());
                    }
                    builder = builder.add_source(environment(Some(translated)));
                }
                ConfigSource::Toml(toml) => {
                    builder = builder.add_source(File::from_str(&toml, FileFormat::Toml));
                }
            }
        }

        let config: AgentConfig = builder
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| {
                AgentError::Config(format!("Failed to deserialize configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }
}

fn environment(vars: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
        [jmx]
        url = "https://10.0.0.5:8443/jolokia"
        username = "admin"
        password = "secret"

        [signalfx]
        access_key = "token"
    "#;

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", MINIMAL).unwrap();

        let config = ConfigBuilder::new().add_file(file.path()).build().unwrap();
        assert_eq!(config.jmx.username, "admin");
        assert!(!config.jmx.ssl_enabled);
        assert_eq!(config.signalfx.ingest_url, "https://ingest.signalfx.com");
        assert_eq!(config.schedule, ScheduleConfig::default());
        assert_eq!(config.log_level, LogLevel::Info);

        let runner = config.runner_config();
        assert_eq!(runner.collection_interval, Duration::from_secs(30));
        assert_eq!(runner.rediscovery_interval, Duration::from_secs(300));
        assert_eq!(runner.max_parallelism, 8);
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigBuilder::new()
            .add_file("/nonexistent/agent.toml")
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_environment_overrides_file() {
        let vars = HashMap::from([
            ("CF_AGENT_JMX__PASSWORD".to_string(), "from-env".to_string()),
            (
                "CF_AGENT_SCHEDULE__COLLECTION_INTERVAL_SECS".to_string(),
                "10".to_string(),
            ),
        ]);

        let config = ConfigBuilder::new()
            .add_toml(MINIMAL)
            .add_env_vars(vars)
            .build()
            .unwrap();
        assert_eq!(config.jmx.password, "from-env");
        assert_eq!(config.schedule.collection_interval_secs, 10);
        assert_eq!(config.schedule.reconnect_delay_secs, 30);
    }

    fn legacy(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_legacy_variables_alone() {
        let vars = legacy(&[
            ("JMX_IP", "10.0.0.5"),
            ("JMX_USERNAME", "admin"),
            ("JMX_PASSWORD", "secret"),
            ("SFX_ACCESS_KEY", "token"),
            ("SFX_INGEST_URL", "https://ingest.eu0.signalfx.com"),
        ]);

        let config = ConfigBuilder::new().add_legacy_env_vars(vars).build().unwrap();
        assert_eq!(config.jmx.url, "http://10.0.0.5:8778/jolokia");
        assert_eq!(config.jmx.username, "admin");
        assert_eq!(config.signalfx.access_key, "token");
        assert_eq!(config.signalfx.ingest_url, "https://ingest.eu0.signalfx.com");
        assert!(!config.jmx.ssl_enabled);
    }

    #[test]
    fn test_legacy_ssl_settings() {
        let vars = legacy(&[
            ("JMX_IP", "10.0.0.5"),
            ("JMX_SSL_ENABLED", "true"),
            ("JMX_SSL_CERT_SOURCE", "INLINE"),
            ("JMX_SSL_CERT", "-----BEGIN CERTIFICATE-----"),
        ]);

        let config = ConfigBuilder::new()
            .add_toml(MINIMAL)
            .add_legacy_env_vars(vars)
            .build()
            .unwrap();
        assert_eq!(config.jmx.url, "https://10.0.0.5:8778/jolokia");
        assert!(config.jmx.ssl_enabled);
        assert_eq!(config.jmx.ssl_cert_source, Some(CertificateSource::Inline));
        assert_eq!(
            config.jmx.ssl_cert.as_deref(),
            Some("-----BEGIN CERTIFICATE-----")
        );
    }

    #[test]
    fn test_prefixed_variables_win_over_legacy() {
        let config = ConfigBuilder::new()
            .add_toml(MINIMAL)
            .add_legacy_env_vars(legacy(&[
                ("JMX_IP", "https://bridge.local/jolokia"),
                ("JMX_PASSWORD", "legacy"),
            ]))
            .add_env_vars(legacy(&[("CF_AGENT_JMX__PASSWORD", "prefixed")]))
            .build()
            .unwrap();

        assert_eq!(config.jmx.url, "https://bridge.local/jolokia");
        assert_eq!(config.jmx.password, "prefixed");
    }

    #[test]
    fn test_empty_required_value_is_rejected() {
        let toml = MINIMAL.replace("\"admin\"", "\"\"");
        let err = ConfigBuilder::new().add_toml(toml).build().unwrap_err();
        assert!(err.to_string().contains("jmx.username"));
    }

    #[test]
    fn test_ssl_requires_certificate() {
        let toml = MINIMAL.replace(
            "password = \"secret\"",
            "password = \"secret\"\nssl_enabled = true\nssl_cert_source = \"file\"",
        );
        let err = ConfigBuilder::new().add_toml(toml).build().unwrap_err();
        assert!(err.to_string().contains("jmx.ssl_cert"));
    }

    #[test]
    fn test_tls_disabled_yields_no_connector() {
        let config = ConfigBuilder::new().add_toml(MINIMAL).build().unwrap();
        assert!(config.jmx.tls_connector().unwrap().is_none());
    }

    #[test]
    fn test_catalog_extension() {
        let toml = format!(
            "{}\n[catalog.nats]\n\"opentsdb.nozzle.nats.msgs\" = \"cumulative_counter\"\n",
            MINIMAL
        );
        let config = ConfigBuilder::new().add_toml(toml).build().unwrap();

        let catalog = config.catalog();
        assert_eq!(
            catalog
                .for_kind("nats")
                .and_then(|attributes| attributes.get("opentsdb.nozzle.nats.msgs")),
            Some(&MetricType::CumulativeCounter)
        );
        assert!(catalog.for_kind("router").is_some());
    }

    #[test]
    fn test_log_level_parsing() {
        let toml = format!("log_level = \"debug\"\n{}", MINIMAL);
        let config = ConfigBuilder::new().add_toml(toml).build().unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
    }
}
