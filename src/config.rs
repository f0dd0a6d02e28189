//! Configuration loader and validator for the catalog backend.
use crate::model::LogicalDb;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    /// Keyed by logical database name (`admin`, `operations`, `processed`, or a supermarket).
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Connection used by models whose database is not configured.
    #[serde(default)]
    pub default_database_url: Option<String>,
}

/// Connection and pool tuning for one logical database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

pub const MEMORY_URL: &str = "sqlite::memory:";

fn default_health_interval_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_secs: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Config with no databases and everything on the in-memory default connection.
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            app: App {
                data_dir: data_dir.into(),
                health_interval_secs: default_health_interval_secs(),
                default_database_url: None,
            },
            databases: BTreeMap::new(),
        }
    }

    pub fn with_database(mut self, name: &str, db: DatabaseConfig) -> Self {
        self.databases.insert(name.to_string(), db);
        self
    }

    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn default_database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.app.default_database_url.as_deref().unwrap_or(MEMORY_URL))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.health_interval_secs == 0 {
        return Err(invalid("app.health_interval_secs must be > 0"));
    }
    if let Some(url) = &cfg.app.default_database_url {
        if url.trim().is_empty() {
            return Err(invalid("app.default_database_url must be non-empty when set"));
        }
    }

    let mut seen = BTreeSet::new();
    for (name, db) in &cfg.databases {
        let logical: LogicalDb = name
            .parse()
            .map_err(|_| invalid(format!("databases.{name} is not a recognized database")))?;
        if !seen.insert(logical) {
            return Err(invalid(format!(
                "databases.{name} duplicates `{logical}` under another alias"
            )));
        }
        if db.url.trim().is_empty() {
            return Err(invalid(format!("databases.{name}.url must be non-empty")));
        }
        if db.max_connections == 0 {
            return Err(invalid(format!("databases.{name}.max_connections must be > 0")));
        }
        if db.min_connections > db.max_connections {
            return Err(invalid(format!(
                "databases.{name}.min_connections must not exceed max_connections"
            )));
        }
        if db.connect_timeout_ms == 0 {
            return Err(invalid(format!("databases.{name}.connect_timeout_ms must be > 0")));
        }
        if db.idle_timeout_secs == Some(0) {
            return Err(invalid(format!("databases.{name}.idle_timeout_secs must be > 0")));
        }
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  health_interval_secs: 30
  default_database_url: "sqlite://./data/default.db"

databases:
  admin:
    url: "sqlite://./data/admin.db"
  operations:
    url: "sqlite://./data/operations.db"
  caminando_online_db:
    url: "sqlite://./data/caminando_online_db.db"
    max_connections: 20
  carrefour:
    url: "sqlite://./data/carrefour.db"
    connect_timeout_ms: 10000
  dia:
    url: "sqlite://./data/dia.db"
  jumbo:
    url: "sqlite://./data/jumbo.db"
  vea:
    url: "sqlite://./data/vea.db"
  disco:
    url: "sqlite://./data/disco.db"
    idle_timeout_secs: 45
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parsed() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = parsed();
        validate(&cfg).unwrap();
        assert_eq!(cfg.databases.len(), 8);
        let admin = &cfg.databases["admin"];
        assert_eq!(admin.max_connections, 10);
        assert_eq!(admin.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.databases["caminando_online_db"].max_connections, 20);
        assert_eq!(
            cfg.databases["disco"].idle_timeout(),
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn unknown_database_name_rejected() {
        let cfg = parsed().with_database("walmart", DatabaseConfig::new("sqlite::memory:"));
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("databases.walmart")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn alias_and_canonical_name_together_rejected() {
        let cfg = parsed().with_database("processed", DatabaseConfig::new("sqlite::memory:"));
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("duplicates")));
    }

    #[test]
    fn invalid_pool_settings() {
        let mut cfg = parsed();
        cfg.databases.get_mut("dia").unwrap().url = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("dia.url")));

        let mut cfg = parsed();
        cfg.databases.get_mut("vea").unwrap().max_connections = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = parsed();
        cfg.databases.get_mut("vea").unwrap().min_connections = 11;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("min_connections")));

        let mut cfg = parsed();
        cfg.databases.get_mut("jumbo").unwrap().connect_timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_app_fields_rejected() {
        let mut cfg = parsed();
        cfg.app.data_dir = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("data_dir")));

        let mut cfg = parsed();
        cfg.app.health_interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_database_falls_back_to_memory() {
        let cfg = Config::new("./data");
        assert_eq!(cfg.default_database().url, MEMORY_URL);
        assert_eq!(parsed().default_database().url, "sqlite://./data/default.db");
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let cfg = Config::new(data_path.to_string_lossy().to_string());
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.health_interval_secs, 30);
        assert!(cfg.databases.contains_key("carrefour"));
    }
}
