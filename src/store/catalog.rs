use crate::db::{Condition, Document, Model, ModelBinder, Query, Sort};
use crate::error::{Error, Result};
use crate::model::{LogicalDb, Supermarket};
use crate::schema::catalog::{
    Category, Filter, Offer, PriceHistory, Product, ProductType, Subcategory, SupermarketInfo,
    SupermarketRecord,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

pub const PRICE_HISTORY_LIMIT: u32 = 50;

/// The catalog entities of one database, raw or processed.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub database: LogicalDb,
    pub categories: Model<Category>,
    pub subcategories: Model<Subcategory>,
    pub product_types: Model<ProductType>,
    pub products: Model<Product>,
    pub filters: Model<Filter>,
    pub offers: Model<Offer>,
    pub price_history: Model<PriceHistory>,
}

impl Catalog {
    pub fn bind(binder: &ModelBinder, database: LogicalDb) -> Result<Self> {
        let name = database.as_str();
        Ok(Self {
            database,
            categories: binder.bind(name)?,
            subcategories: binder.bind(name)?,
            product_types: binder.bind(name)?,
            products: binder.bind(name)?,
            filters: binder.bind(name)?,
            offers: binder.bind(name)?,
            price_history: binder.bind(name)?,
        })
    }

    /// Rebuilds a category's subcategory list from the subcategories pointing at it.
    #[instrument(skip_all, fields(database = %self.database))]
    pub async fn sync_subcategories(&self, category_id: &str) -> Result<Document<Category>> {
        let mut category = self.categories.get(category_id).await?;
        let children = self
            .subcategories
            .find(
                &Query::new()
                    .filter(Condition::In(
                        "category".into(),
                        vec![json!(category.slug), json!(category.id)],
                    ))
                    .sort(Sort::desc("priority")),
            )
            .await?;
        category.data.subcategories = children.into_iter().map(|s| s.id).collect();
        category.data.metadata.last_updated = Some(Utc::now());
        let saved = self.categories.replace(category).await?;
        info!(category = %saved.slug, count = saved.subcategories.len(), "subcategories synced");
        Ok(saved)
    }

    /// Rebuilds a product type's product list from the products tagged with it.
    #[instrument(skip_all, fields(database = %self.database))]
    pub async fn sync_products(&self, product_type_id: &str) -> Result<Document<ProductType>> {
        let mut product_type = self.product_types.get(product_type_id).await?;
        let products = self
            .products
            .find(&Query::new().filter(Condition::In(
                "productType".into(),
                vec![json!(product_type.slug), json!(product_type.id)],
            )))
            .await?;
        product_type.data.products = products.into_iter().map(|p| p.id).collect();
        product_type.data.metadata.last_updated = Some(Utc::now());
        let saved = self.product_types.replace(product_type).await?;
        info!(product_type = %saved.slug, count = saved.products.len(), "products synced");
        Ok(saved)
    }

    /// Active subcategories of a category, highest priority first.
    pub async fn subcategories_of(&self, category: &str) -> Result<Vec<Document<Subcategory>>> {
        let query = Query::new()
            .eq("category", category)
            .eq("active", true)
            .sort(Sort::desc("priority"));
        self.subcategories.find(&query).await
    }

    /// Active product types under a category (and optionally a subcategory).
    pub async fn product_types_by_category(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<Vec<Document<ProductType>>> {
        let mut query = Query::new().eq("category", category).eq("active", true);
        if let Some(sub) = subcategory {
            query = query.eq("subcategory", sub);
        }
        self.product_types
            .find(&query.sort(Sort::desc("priority")))
            .await
    }

    /// Offers running at `now`, highest priority first.
    pub async fn active_offers(&self, now: DateTime<Utc>) -> Result<Vec<Document<Offer>>> {
        let query = Query::new()
            .eq("isActive", true)
            .filter(Condition::Before("startDate".into(), now))
            .filter(Condition::After("endDate".into(), now))
            .sort(Sort::desc("priority"));
        let offers = self.offers.find(&query).await?;
        Ok(offers.into_iter().filter(|o| o.is_valid(now)).collect())
    }

    pub async fn offers_by_supermarket(&self, supermarket: &str) -> Result<Vec<Document<Offer>>> {
        let query = Query::new()
            .eq("supermarket", supermarket)
            .sort(Sort::desc("priority"));
        self.offers.find(&query).await
    }

    /// Offers for a product at `now`, using the product's catalog placement.
    pub async fn offers_for_product(
        &self,
        product: &Document<Product>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Document<Offer>>> {
        let offers = self.active_offers(now).await?;
        Ok(offers
            .into_iter()
            .filter(|o| {
                o.applies_to(
                    &product.id,
                    product.category.as_deref(),
                    product.subcategory.as_deref(),
                    product.product_type.as_deref(),
                )
            })
            .collect())
    }

    /// Categories that have at least one active filter.
    pub async fn filter_categories(&self) -> Result<Vec<String>> {
        let values = self
            .filters
            .distinct("category", &Query::new().eq("active", true))
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    pub async fn filters_for_category(&self, category: &str) -> Result<Vec<Document<Filter>>> {
        let query = Query::new()
            .eq("active", true)
            .filter(Condition::Any(vec![
                Condition::Eq("category".into(), json!(category)),
                Condition::HasElement("applicableCategories".into(), json!(category)),
            ]))
            .sort(Sort::desc("priority"));
        self.filters.find(&query).await
    }

    /// Most recent observation for a product, optionally at one supermarket.
    pub async fn latest_price(
        &self,
        product_id: &str,
        supermarket_id: Option<&str>,
    ) -> Result<Option<Document<PriceHistory>>> {
        let mut query = Query::new().eq("productId", product_id);
        if let Some(s) = supermarket_id {
            query = query.eq("supermarketId", s);
        }
        self.price_history
            .find_one(&query.sort(Sort::desc("scrapedAt")))
            .await
    }

    /// Newest first, at most `limit` (default 50) entries.
    pub async fn price_history_for(
        &self,
        product_id: &str,
        supermarket_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Document<PriceHistory>>> {
        let mut query = Query::new().eq("productId", product_id);
        if let Some(s) = supermarket_id {
            query = query.eq("supermarketId", s);
        }
        let query = query
            .sort(Sort::desc("scrapedAt"))
            .limit(limit.unwrap_or(PRICE_HISTORY_LIMIT));
        self.price_history.find(&query).await
    }
}

/// Which scrape finished, for [`CatalogStore::touch_last_scraped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeKind {
    Products,
    Homepage,
}

/// Table-driven access to the five raw catalogs and the processed one.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    binder: Arc<ModelBinder>,
}

impl CatalogStore {
    pub fn new(binder: Arc<ModelBinder>) -> Self {
        Self { binder }
    }

    /// Raw catalog for a supermarket name; unknown chains are rejected.
    pub fn raw(&self, supermarket: &str) -> Result<Catalog> {
        let supermarket: Supermarket = supermarket.parse()?;
        Catalog::bind(&self.binder, LogicalDb::Raw(supermarket))
    }

    pub fn processed(&self) -> Result<Catalog> {
        Catalog::bind(&self.binder, LogicalDb::Processed)
    }

    pub fn supermarket_info(&self, supermarket: &str) -> Result<Model<SupermarketInfo>> {
        self.binder.for_supermarket(supermarket)
    }

    /// Chain directory in the processed database.
    pub fn supermarkets(&self) -> Result<Model<SupermarketRecord>> {
        self.binder.bind(LogicalDb::Processed.as_str())
    }

    /// Every raw catalog that can currently be bound, with the failures beside them.
    pub fn raw_catalogs(&self) -> (Vec<Catalog>, Vec<(Supermarket, Error)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for supermarket in Supermarket::ALL {
            match Catalog::bind(&self.binder, LogicalDb::Raw(supermarket)) {
                Ok(catalog) => ok.push(catalog),
                Err(err) => failed.push((supermarket, err)),
            }
        }
        (ok, failed)
    }

    /// Stamps the chain's profile after a scrape completes.
    pub async fn touch_last_scraped(
        &self,
        supermarket: &str,
        kind: ScrapeKind,
        at: DateTime<Utc>,
    ) -> Result<Document<SupermarketInfo>> {
        let model = self.supermarket_info(supermarket)?;
        let code = supermarket.trim().to_lowercase();
        let mut info = model
            .find_one(&Query::new().eq("code", code.as_str()))
            .await?
            .ok_or(Error::NotFound {
                model: "SupermarketInfo",
                id: code,
            })?;
        match kind {
            ScrapeKind::Products => info.data.last_scraped = Some(at),
            ScrapeKind::Homepage => info.data.last_homepage_scraped = Some(at),
        }
        model.replace(info).await
    }
}
