//! Domain services over bound models.
//!
//! - `catalog`: raw per-supermarket catalogs and the processed catalog.
//! - `accounts`: users, addresses, sessions and carts (admin).
//! - `orders`: order placement and status transitions (operations).
//! - `system`: notifications, API logs and settings (operations).
//! - `stats`: SQL aggregations shared by the services.

pub mod accounts;
pub mod catalog;
pub mod orders;
pub mod stats;
pub mod system;

pub use accounts::AccountStore;
pub use catalog::{Catalog, CatalogStore, ScrapeKind};
pub use orders::{OrderFilter, OrderStore, StatusChange};
pub use system::SystemStore;

use crate::db::ModelBinder;
use crate::error::{Error, Result};
use crate::model::LogicalDb;
use crate::schema::catalog::{
    Category, Filter, Offer, PriceHistory, Product, ProductType, Subcategory, SupermarketInfo,
    SupermarketRecord,
};
use crate::schema::commerce::Order;
use crate::schema::system::{ApiLog, Notification, SystemSettings};
use crate::schema::user::{Cart, User, UserAddress, UserSession};
use crate::schema::{Entity, Schema};
use std::sync::Arc;
use tracing::{info, warn};

/// Schemas living on each logical database.
pub fn schemas_for(database: LogicalDb) -> Vec<&'static Schema> {
    let catalog = [
        Category::schema(),
        Subcategory::schema(),
        Product::schema(),
        ProductType::schema(),
        Offer::schema(),
        Filter::schema(),
        PriceHistory::schema(),
    ];
    match database {
        LogicalDb::Admin => vec![
            User::schema(),
            UserAddress::schema(),
            UserSession::schema(),
            Cart::schema(),
        ],
        LogicalDb::Operations => vec![
            Order::schema(),
            ApiLog::schema(),
            Notification::schema(),
            SystemSettings::schema(),
        ],
        LogicalDb::Processed => {
            let mut schemas = catalog.to_vec();
            schemas.push(SupermarketRecord::schema());
            schemas
        }
        LogicalDb::Raw(_) => {
            let mut schemas = catalog.to_vec();
            schemas.push(SupermarketInfo::schema());
            schemas
        }
    }
}

/// Outcome of binding every model at startup.
#[derive(Debug, Default)]
pub struct BindReport {
    pub bound: usize,
    pub fallback: Vec<LogicalDb>,
    pub unavailable: Vec<(LogicalDb, Error)>,
}

/// Binds every model of every logical database once. A database that failed
/// to open is reported and skipped; the rest still bind.
pub fn bind_all(binder: &ModelBinder) -> BindReport {
    let mut report = BindReport::default();
    for database in LogicalDb::ALL {
        let name = database.as_str();
        match binder.registry().resolve(name) {
            Ok(resolution) if resolution.is_fallback() => report.fallback.push(database),
            Ok(_) => {}
            Err(err) => {
                warn!(database = name, error = %err, "skipping models of unavailable database");
                report.unavailable.push((database, err));
                continue;
            }
        }
        for schema in schemas_for(database) {
            match binder.bind_schema(name, schema, None) {
                Ok(_) => report.bound += 1,
                Err(err) => {
                    warn!(database = name, model = schema.model, error = %err, "bind failed");
                    report.unavailable.push((database, err));
                    break;
                }
            }
        }
    }
    info!(
        bound = report.bound,
        fallback = report.fallback.len(),
        unavailable = report.unavailable.len(),
        registrations = binder.binding_count(),
        "models bound"
    );
    report
}

/// Entry point to the domain services once the registry is ready.
#[derive(Debug, Clone)]
pub struct Stores {
    binder: Arc<ModelBinder>,
}

impl Stores {
    pub fn new(binder: Arc<ModelBinder>) -> Self {
        Self { binder }
    }

    pub fn binder(&self) -> &ModelBinder {
        &self.binder
    }

    pub fn accounts(&self) -> Result<AccountStore> {
        AccountStore::bind(&self.binder)
    }

    pub fn orders(&self) -> Result<OrderStore> {
        OrderStore::bind(&self.binder)
    }

    pub fn system(&self) -> Result<SystemStore> {
        SystemStore::bind(&self.binder)
    }

    pub fn catalog(&self) -> CatalogStore {
        CatalogStore::new(self.binder.clone())
    }
}
