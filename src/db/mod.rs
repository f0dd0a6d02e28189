//! Database module: connections, model binding and document storage.
//!
//! - `pool`: opening one SQLite pool per logical database.
//! - `registry`: the set of logical databases opened at startup.
//! - `binder`: memoized schema-to-connection binding with default fallback.
//! - `collection`: JSON document tables and the typed `Model` handle.
//! - `query`: filters, sorting and pagination compiled to SQL.

pub mod binder;
pub mod collection;
pub mod pool;
pub mod query;
pub mod registry;

pub use binder::ModelBinder;
pub use collection::{Collection, Document, Model};
pub use pool::{init_pool, Connector, Pool, SqliteConnector};
pub use query::{Condition, ListParams, Page, Pagination, Query, Sort};
pub use registry::{CloseReport, ConnectionRegistry, Database, Resolution, DEFAULT_CONNECTION};
