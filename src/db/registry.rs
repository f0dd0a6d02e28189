use super::pool::{Connector, Pool, SqliteConnector};
use crate::config::{Config, DatabaseConfig};
use crate::error::{Error, Result};
use crate::model::{HealthStatus, LogicalDb};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Name of the implicit connection used when a recognized database is not configured.
pub const DEFAULT_CONNECTION: &str = "default";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// An open logical database.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    pool: Pool,
    probe_timeout: Duration,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// `SELECT 1` bounded by the connect timeout. A pool with no free
    /// connection before the deadline is `Connecting`.
    pub async fn probe(&self) -> HealthStatus {
        if self.pool.is_closed() {
            return HealthStatus::Disconnected;
        }
        match timeout(self.probe_timeout, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => HealthStatus::Connected,
            Ok(Err(sqlx::Error::PoolTimedOut)) => HealthStatus::Connecting,
            Ok(Err(err)) => {
                debug!(database = %self.name, error = %err, "probe failed");
                HealthStatus::Disconnected
            }
            Err(_) => HealthStatus::Connecting,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Connected(Database),
    Failed(String),
}

impl Slot {
    fn from_outcome(name: &str, outcome: Result<Database>) -> Self {
        match outcome {
            Ok(db) => {
                info!(database = name, "connected");
                Slot::Connected(db)
            }
            Err(err) => {
                warn!(database = name, error = %err, "connection failed; continuing without it");
                Slot::Failed(err.to_string())
            }
        }
    }

    fn database(&self) -> Option<&Database> {
        match self {
            Slot::Connected(db) => Some(db),
            Slot::Failed(_) => None,
        }
    }
}

/// Where a logical name resolved to.
#[derive(Debug, Clone, Copy)]
pub enum Resolution<'a> {
    Connected(&'a Database),
    /// The name is recognized but not configured; use the default connection.
    Fallback(&'a Database),
}

impl<'a> Resolution<'a> {
    pub fn database(&self) -> &'a Database {
        match self {
            Resolution::Connected(db) | Resolution::Fallback(db) => db,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback(_))
    }
}

/// Outcome of [`ConnectionRegistry::close_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Every configured logical database, opened once at startup.
///
/// A registry only exists once [`ConnectionRegistry::open_all`] has finished, so
/// holding one means startup population is complete. It is read-only afterwards.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slots: BTreeMap<String, Slot>,
    default: Slot,
}

impl ConnectionRegistry {
    pub async fn open_all(config: &Config) -> Result<Self> {
        Self::open_all_with(config, &SqliteConnector).await
    }

    /// Opens every configured database and the default connection concurrently.
    /// Failures are recorded per name.
    #[instrument(skip_all)]
    pub async fn open_all_with(config: &Config, connector: &dyn Connector) -> Result<Self> {
        let mut wanted = Vec::with_capacity(config.databases.len());
        for (key, db) in &config.databases {
            let logical: LogicalDb = key.parse()?;
            wanted.push((logical.as_str(), db));
        }

        let default_config = config.default_database();
        let attempts = wanted
            .into_iter()
            .map(|(name, db)| async move { (name, Self::open(name, db, connector).await) });
        let (outcomes, default) = futures::join!(
            join_all(attempts),
            Self::open(DEFAULT_CONNECTION, &default_config, connector)
        );
        let slots: BTreeMap<_, _> = outcomes
            .into_iter()
            .map(|(name, outcome)| (name.to_string(), Slot::from_outcome(name, outcome)))
            .collect();
        let default = Slot::from_outcome(DEFAULT_CONNECTION, default);
        let registry = Self { slots, default };
        info!(
            connected = registry.connected_count(),
            configured = registry.slots.len(),
            "connection registry ready"
        );
        Ok(registry)
    }

    /// Opens a single database, bounded by its connect timeout.
    pub async fn open(name: &str, config: &DatabaseConfig, connector: &dyn Connector) -> Result<Database> {
        let limit = config.connect_timeout();
        let pool = timeout(limit, connector.connect(name, config))
            .await
            .map_err(|_| Error::Timeout {
                database: name.to_string(),
                timeout_ms: config.connect_timeout_ms,
            })??;
        Ok(Database {
            name: name.to_string(),
            pool,
            probe_timeout: limit,
        })
    }

    /// Connected database for `name` (aliases accepted). Never blocks.
    pub fn get(&self, name: &str) -> Option<&Database> {
        if name == DEFAULT_CONNECTION {
            return self.default.database();
        }
        let logical: LogicalDb = name.parse().ok()?;
        self.slots.get(logical.as_str())?.database()
    }

    /// The implicit default connection, `None` if it failed to open.
    pub fn default_database(&self) -> Option<&Database> {
        self.default.database()
    }

    /// Startup status: `Connected` or `Disconnected`, `None` when not configured.
    pub fn status(&self, name: &str) -> Option<HealthStatus> {
        let logical: LogicalDb = name.parse().ok()?;
        self.slots.get(logical.as_str()).map(|slot| match slot {
            Slot::Connected(_) => HealthStatus::Connected,
            Slot::Failed(_) => HealthStatus::Disconnected,
        })
    }

    /// Why `name` failed to open, if it did.
    pub fn failure(&self, name: &str) -> Option<&str> {
        let slot = if name == DEFAULT_CONNECTION {
            &self.default
        } else {
            let logical: LogicalDb = name.parse().ok()?;
            self.slots.get(logical.as_str())?
        };
        match slot {
            Slot::Failed(reason) => Some(reason),
            Slot::Connected(_) => None,
        }
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.status(name).is_some()
    }

    pub fn connected_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Connected(_)))
            .count()
    }

    /// Configured names, canonical form.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Fails unless at least one configured database connected. The default
    /// connection does not count.
    pub fn ensure_any_connected(&self) -> Result<()> {
        if self.connected_count() == 0 {
            return Err(Error::NoConnections);
        }
        Ok(())
    }

    /// Maps a logical name to the database a model should live on.
    pub fn resolve(&self, name: &str) -> Result<Resolution<'_>> {
        let unavailable = |database: &str| Error::Unavailable {
            database: database.to_string(),
        };
        if name == DEFAULT_CONNECTION {
            return self
                .default
                .database()
                .map(Resolution::Connected)
                .ok_or_else(|| unavailable(DEFAULT_CONNECTION));
        }
        let logical: LogicalDb = name.parse()?;
        match self.slots.get(logical.as_str()) {
            Some(Slot::Connected(db)) => Ok(Resolution::Connected(db)),
            Some(Slot::Failed(_)) => Err(unavailable(logical.as_str())),
            None => self
                .default
                .database()
                .map(Resolution::Fallback)
                .ok_or_else(|| unavailable(DEFAULT_CONNECTION)),
        }
    }

    /// Probes every configured database. A failing entry never fails the whole check.
    #[instrument(skip_all)]
    pub async fn health_check(&self) -> BTreeMap<String, HealthStatus> {
        let probes = self.slots.iter().map(|(name, slot)| async move {
            let status = match slot {
                Slot::Connected(db) => db.probe().await,
                Slot::Failed(_) => HealthStatus::Disconnected,
            };
            (name.clone(), status)
        });
        let report: BTreeMap<_, _> = join_all(probes).await.into_iter().collect();
        for (name, status) in &report {
            if *status != HealthStatus::Connected {
                warn!(database = %name, %status, "database not healthy");
            }
        }
        report
    }

    /// Closes every pool, the default included. Keeps going past failures.
    #[instrument(skip_all)]
    pub async fn close_all(&self) -> CloseReport {
        let mut report = CloseReport::default();
        let open = self
            .slots
            .values()
            .chain(std::iter::once(&self.default))
            .filter_map(Slot::database);
        for db in open {
            match timeout(CLOSE_TIMEOUT, db.pool.close()).await {
                Ok(()) => report.closed.push(db.name.clone()),
                Err(_) => {
                    warn!(database = %db.name, "close timed out");
                    report
                        .failed
                        .push((db.name.clone(), format!("close timed out after {CLOSE_TIMEOUT:?}")));
                }
            }
        }
        info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            "connections closed"
        );
        report
    }
}
