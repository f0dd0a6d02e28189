use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// Opens the pool behind one logical database.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, name: &str, config: &DatabaseConfig) -> Result<Pool>;
}

/// Connector for `sqlite:` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, name: &str, config: &DatabaseConfig) -> Result<Pool> {
        debug!(database = name, "opening sqlite pool");
        init_pool(config).await
    }
}

#[instrument(skip_all)]
pub async fn init_pool(config: &DatabaseConfig) -> Result<Pool> {
    let normalized = prepare_sqlite_url(&config.url);
    let memory = is_memory_url(&normalized);

    let mut options = SqliteConnectOptions::from_str(&normalized)?;
    if !normalized.contains("mode=") {
        options = options.create_if_missing(true);
    }
    if !memory {
        // WAL and stricter durability for file-backed databases.
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
    }

    let pool_options = SqlitePoolOptions::new().acquire_timeout(config.connect_timeout());
    // An in-memory database lives only as long as its single connection.
    let pool_options = if memory {
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(config.idle_timeout())
    };

    let pool = pool_options.connect_with(options).await?;
    Ok(pool)
}

pub(crate) fn is_memory_url(url: &str) -> bool {
    url.starts_with("sqlite::memory") || url.contains("mode=memory")
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_urls_untouched() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://shared?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://./data/admin.db"));
    }

    #[test]
    fn file_url_creates_parent_and_keeps_query() {
        let td = tempdir().unwrap();
        let path = td.path().join("nested/dir/admin.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(td.path().join("nested/dir").exists());
    }

    #[tokio::test]
    async fn memory_pool_keeps_state_between_queries() {
        let pool = init_pool(&DatabaseConfig::new("sqlite::memory:")).await.unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO t VALUES (1)").execute(&pool).await.unwrap();
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn missing_read_only_file_fails() {
        let td = tempdir().unwrap();
        let url = format!("sqlite://{}/absent/x.db?mode=ro", td.path().display());
        assert!(init_pool(&DatabaseConfig::new(url)).await.is_err());
    }
}
