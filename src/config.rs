use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::reset::strategy::{DEFAULT_COLLECTIONS, StrategyKind, validate_collection_name};

/// Config file read when neither `--config` nor `FOLIO_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "folio.toml";

/// The complete folio.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FolioConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub reset: ResetSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin. Only for local front-end development.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Key the reset rate limit on `X-Forwarded-For`/`X-Real-IP`. Only set
    /// this behind a reverse proxy that overwrites those headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
            trust_forwarded_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("folio.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write daily-rolling log files here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ResetSection {
    /// Off by default: every reset route answers 404 until enabled.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Collections the enumerated strategy clears, children before parents.
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_rate_limit_period_secs")]
    pub rate_limit_period_secs: u64,
    /// How long a running job stays owned by its process between lease
    /// renewals.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Fail active jobs whose lease ran out, at startup and before each new
    /// job.
    #[serde(default = "default_recover_abandoned", alias = "recover_on_startup")]
    pub recover_abandoned: bool,
}

fn default_collections() -> Vec<String> {
    DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect()
}

fn default_stream_timeout_secs() -> u64 {
    300
}

fn default_rate_limit_period_secs() -> u64 {
    600
}

fn default_lease_ttl_secs() -> u64 {
    30
}

/// Upper bound for `reset.lease_ttl_secs`.
const MAX_LEASE_TTL_SECS: u64 = 3600;

fn default_recover_abandoned() -> bool {
    true
}

impl Default for ResetSection {
    fn default() -> Self {
        Self {
            enabled: false,
            admin_token: None,
            strategy: StrategyKind::default(),
            collections: default_collections(),
            stream_timeout_secs: default_stream_timeout_secs(),
            rate_limit_period_secs: default_rate_limit_period_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
            recover_abandoned: default_recover_abandoned(),
        }
    }
}

// Keeps the admin token out of debug output.
impl fmt::Debug for ResetSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetSection")
            .field("enabled", &self.enabled)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("strategy", &self.strategy)
            .field("collections", &self.collections)
            .field("stream_timeout_secs", &self.stream_timeout_secs)
            .field("rate_limit_period_secs", &self.rate_limit_period_secs)
            .field("lease_ttl_secs", &self.lease_ttl_secs)
            .field("recover_abandoned", &self.recover_abandoned)
            .finish()
    }
}

impl ResetSection {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

impl FolioConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse folio.toml")
    }

    /// Resolve and load the effective configuration.
    ///
    /// An explicit path (from `--config` or `FOLIO_CONFIG`) must exist. The
    /// default `folio.toml` is optional. Environment overrides are applied
    /// last, then the result is validated.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FOLIO_CONFIG").map(PathBuf::from));
        let mut config = match explicit {
            Some(path) => Self::load(&path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FOLIO_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("FOLIO_ADMIN_TOKEN") {
            self.reset.admin_token = Some(token);
        }
        if let Some(path) = lookup("FOLIO_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(enabled) = lookup("FOLIO_RESET_ENABLED") {
            self.reset.enabled = parse_bool(&enabled).ok_or_else(|| ConfigError::Invalid {
                key: "FOLIO_RESET_ENABLED",
                reason: format!("expected true or false, got '{}'", enabled),
            })?;
        }
        if let Some(port) = lookup("FOLIO_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "FOLIO_PORT",
                reason: format!("'{}' is not a valid port", port),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reset.stream_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "reset.stream_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reset.rate_limit_period_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "reset.rate_limit_period_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(1..=MAX_LEASE_TTL_SECS).contains(&self.reset.lease_ttl_secs) {
            return Err(ConfigError::Invalid {
                key: "reset.lease_ttl_secs",
                reason: format!("must be between 1 and {}", MAX_LEASE_TTL_SECS),
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "logging.level",
                reason: "must not be empty".to_string(),
            });
        }
        if self.reset.strategy == StrategyKind::Enumerated {
            for name in &self.reset.collections {
                if let Err(e) = validate_collection_name(name) {
                    return Err(ConfigError::Invalid {
                        key: "reset.collections",
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FolioConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, PathBuf::from("folio.db"));
        assert!(!config.reset.enabled);
        assert!(config.reset.admin_token.is_none());
        assert_eq!(config.reset.strategy, StrategyKind::Enumerated);
        assert_eq!(
            config.reset.collections,
            vec!["project_skills", "projects", "skills", "experience"]
        );
        assert_eq!(config.reset.stream_timeout(), Duration::from_secs(300));
        assert_eq!(config.reset.rate_limit_period(), Duration::from_secs(600));
        assert_eq!(config.reset.lease_ttl(), Duration::from_secs(30));
        assert!(config.reset.recover_abandoned);
        assert!(!config.server.trust_forwarded_headers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_parses_to_defaults() {
        assert_eq!(FolioConfig::parse("").unwrap(), FolioConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = FolioConfig::parse(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            cors_permissive = true
            trust_forwarded_headers = true

            [database]
            path = "/var/lib/folio/folio.db"

            [logging]
            level = "folio=debug,info"
            format = "json"
            dir = "/var/log/folio"

            [reset]
            enabled = true
            admin_token = "hunter2"
            strategy = "catalog"
            stream_timeout_secs = 60
            rate_limit_period_secs = 30
            lease_ttl_secs = 10
            recover_abandoned = false
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.server.cors_permissive);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/folio")));
        assert!(config.reset.enabled);
        assert_eq!(config.reset.strategy, StrategyKind::Catalog);
        assert_eq!(config.reset.stream_timeout_secs, 60);
        assert_eq!(config.reset.lease_ttl_secs, 10);
        assert!(!config.reset.recover_abandoned);
        assert!(config.server.trust_forwarded_headers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recover_on_startup_is_still_accepted() {
        let config = FolioConfig::parse("[reset]\nrecover_on_startup = false").unwrap();
        assert!(!config.reset.recover_abandoned);
    }

    #[test]
    fn test_validate_bounds_lease_ttl() {
        let mut config = FolioConfig::default();
        config.reset.lease_ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reset.lease_ttl_secs"));

        config.reset.lease_ttl_secs = MAX_LEASE_TTL_SECS + 1;
        assert!(config.validate().is_err());
        config.reset.lease_ttl_secs = MAX_LEASE_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(FolioConfig::parse("[reset]\nstrategy = \"truncate\"").is_err());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FolioConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(&path, "[server\nport = 1").unwrap();
        let err = FolioConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FolioConfig::default();
        config
            .apply_env_overrides(lookup(&[
                ("FOLIO_ADMIN_TOKEN", "from-env"),
                ("FOLIO_DB_PATH", "/tmp/other.db"),
                ("FOLIO_RESET_ENABLED", "true"),
                ("FOLIO_PORT", "9999"),
            ]))
            .unwrap();
        assert_eq!(config.reset.admin_token.as_deref(), Some("from-env"));
        assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
        assert!(config.reset.enabled);
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_env_override_rejects_bad_values() {
        let mut config = FolioConfig::default();
        let err = config
            .apply_env_overrides(lookup(&[("FOLIO_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("FOLIO_PORT"));

        let err = config
            .apply_env_overrides(lookup(&[("FOLIO_RESET_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("FOLIO_RESET_ENABLED"));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut config = FolioConfig::default();
        config.reset.stream_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = FolioConfig::default();
        config.reset.rate_limit_period_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ledger_in_collections() {
        let mut config = FolioConfig::default();
        config.reset.collections.push("reset_audit".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reset.collections"));

        // The catalog strategy ignores the list.
        config.reset.strategy = StrategyKind::Catalog;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_admin_token() {
        let mut config = FolioConfig::default();
        config.reset.admin_token = Some("super-secret".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
