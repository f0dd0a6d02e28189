//! Aggregate statistics computed in SQL over the stored JSON documents.
use crate::db::query::column;
use crate::db::{Condition, Model, Query, Sort};
use crate::error::Result;
use crate::schema::catalog::{Category, Filter, Offer, PriceHistory, Subcategory, SupermarketInfo};
use crate::schema::commerce::Order;
use crate::schema::system::ApiLog;
use crate::schema::Entity;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;

pub const PRICE_WINDOW_DAYS: i64 = 30;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn flag_count(path: &str) -> Result<String> {
    Ok(format!("COUNT(CASE WHEN {} = 1 THEN 1 END)", column(path)?))
}

fn count_at(row: &SqliteRow, index: usize) -> Result<u64> {
    Ok(row.try_get::<i64, _>(index)?.max(0) as u64)
}

fn key_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

async fn by_value<E: Entity>(model: &Model<E>, path: &str, query: &Query) -> Result<BTreeMap<String, u64>> {
    Ok(model
        .collection()
        .group_count(path, query)
        .await?
        .into_iter()
        .map(|(k, n)| (key_string(k), n))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub total: u64,
    pub active: u64,
    pub featured: u64,
    pub total_subcategories: u64,
}

pub async fn category_stats(model: &Model<Category>) -> Result<CategoryStats> {
    let select = format!(
        "COUNT(*), {}, {}, COALESCE(SUM(json_array_length(doc, '$.subcategories')), 0)",
        flag_count("active")?,
        flag_count("featured")?,
    );
    let row = model.collection().aggregate(&select, &Query::new()).await?;
    Ok(CategoryStats {
        total: count_at(&row, 0)?,
        active: count_at(&row, 1)?,
        featured: count_at(&row, 2)?,
        total_subcategories: count_at(&row, 3)?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubcategoryStats {
    pub total: u64,
    pub active: u64,
    pub featured: u64,
    pub by_category: BTreeMap<String, u64>,
}

pub async fn subcategory_stats(model: &Model<Subcategory>) -> Result<SubcategoryStats> {
    let select = format!(
        "COUNT(*), {}, {}",
        flag_count("active")?,
        flag_count("featured")?
    );
    let row = model.collection().aggregate(&select, &Query::new()).await?;
    Ok(SubcategoryStats {
        total: count_at(&row, 0)?,
        active: count_at(&row, 1)?,
        featured: count_at(&row, 2)?,
        by_category: by_value(model, "category", &Query::new()).await?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub total: u64,
    pub active: u64,
    pub categories: u64,
    pub by_type: BTreeMap<String, u64>,
}

pub async fn filter_stats(model: &Model<Filter>) -> Result<FilterStats> {
    let select = format!(
        "COUNT(*), {}, COUNT(DISTINCT {})",
        flag_count("active")?,
        column("category")?
    );
    let row = model.collection().aggregate(&select, &Query::new()).await?;
    Ok(FilterStats {
        total: count_at(&row, 0)?,
        active: count_at(&row, 1)?,
        categories: count_at(&row, 2)?,
        by_type: by_value(model, "type", &Query::new()).await?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferStats {
    pub total: u64,
    pub active: u64,
    pub total_usage: u64,
    pub total_savings: f64,
    pub by_type: BTreeMap<String, u64>,
}

pub async fn offer_stats(model: &Model<Offer>) -> Result<OfferStats> {
    let select = format!(
        "COUNT(*), {}, COALESCE(SUM({}), 0), TOTAL({})",
        flag_count("isActive")?,
        column("currentUsage")?,
        column("metadata.totalSavings")?
    );
    let row = model.collection().aggregate(&select, &Query::new()).await?;
    Ok(OfferStats {
        total: count_at(&row, 0)?,
        active: count_at(&row, 1)?,
        total_usage: count_at(&row, 2)?,
        total_savings: round2(row.try_get(3)?),
        by_type: by_value(model, "type", &Query::new()).await?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupermarketInfoStats {
    pub total: u64,
    pub active: u64,
    #[serde(rename = "withPWA")]
    pub with_pwa: u64,
    pub with_regionalization: u64,
    pub by_platform: BTreeMap<String, u64>,
}

pub async fn supermarket_info_stats(model: &Model<SupermarketInfo>) -> Result<SupermarketInfoStats> {
    let select = format!(
        "COUNT(*), {}, {}, {}",
        flag_count("active")?,
        flag_count("pwa.enabled")?,
        flag_count("regionalization.enabled")?
    );
    let row = model.collection().aggregate(&select, &Query::new()).await?;
    let platforms = Query::new().filter(Condition::Exists("platform".into()));
    Ok(SupermarketInfoStats {
        total: count_at(&row, 0)?,
        active: count_at(&row, 1)?,
        with_pwa: count_at(&row, 2)?,
        with_regionalization: count_at(&row, 3)?,
        by_platform: by_value(model, "platform", &platforms).await?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceStats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub first: Option<f64>,
    pub latest: Option<f64>,
}

impl PriceStats {
    /// Latest minus first, when both exist.
    pub fn change(&self) -> Option<f64> {
        Some(round2(self.latest? - self.first?))
    }
}

/// Price movement for one product over the last [`PRICE_WINDOW_DAYS`] days.
pub async fn price_stats(
    model: &Model<PriceHistory>,
    product_id: &str,
    supermarket_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PriceStats> {
    let mut query = Query::new()
        .eq("productId", product_id)
        .filter(Condition::After(
            "scrapedAt".into(),
            now - Duration::days(PRICE_WINDOW_DAYS),
        ));
    if let Some(s) = supermarket_id {
        query = query.eq("supermarketId", s);
    }
    let price = column("price")?;
    let select = format!("COUNT(*), MIN({price}) * 1.0, MAX({price}) * 1.0, AVG({price})");
    let row = model.collection().aggregate(&select, &query).await?;
    let first = model
        .find_one(&query.clone().sort(Sort::asc("scrapedAt")))
        .await?;
    let latest = model
        .find_one(&query.clone().sort(Sort::desc("scrapedAt")))
        .await?;
    Ok(PriceStats {
        count: count_at(&row, 0)?,
        min: row.try_get::<Option<f64>, _>(1)?.map(round2),
        max: row.try_get::<Option<f64>, _>(2)?.map(round2),
        avg: row.try_get::<Option<f64>, _>(3)?.map(round2),
        first: first.map(|p| p.price),
        latest: latest.map(|p| p.price),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStats {
    pub total: u64,
    pub successful: u64,
    pub errors: u64,
    /// Percentage of successful calls, 0 when there were none.
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub total_response_time: f64,
    pub by_type: BTreeMap<String, u64>,
}

pub async fn api_stats(model: &Model<ApiLog>, since: Option<DateTime<Utc>>) -> Result<ApiStats> {
    let mut query = Query::new();
    if let Some(since) = since {
        query = query.filter(Condition::After("timestamp".into(), since));
    }
    let select = format!(
        "COUNT(*), {}, COALESCE(AVG({rt}), 0.0), TOTAL({rt})",
        flag_count("success")?,
        rt = column("responseTime")?
    );
    let row = model.collection().aggregate(&select, &query).await?;
    let total = count_at(&row, 0)?;
    let successful = count_at(&row, 1)?;
    let success_rate = if total == 0 {
        0.0
    } else {
        round2(successful as f64 * 100.0 / total as f64)
    };
    Ok(ApiStats {
        total,
        successful,
        errors: total - successful,
        success_rate,
        avg_response_time: round2(row.try_get(2)?),
        total_response_time: round2(row.try_get(3)?),
        by_type: by_value(model, "apiType", &query).await?,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: u64,
    pub total_revenue: f64,
    pub average_order_value: f64,
    pub status_breakdown: BTreeMap<String, u64>,
}

pub async fn order_stats(model: &Model<Order>, query: &Query) -> Result<OrderStats> {
    let total = column("total")?;
    let select = format!("COUNT(*), TOTAL({total}), COALESCE(AVG({total}), 0.0)");
    let row = model.collection().aggregate(&select, query).await?;
    Ok(OrderStats {
        total_orders: count_at(&row, 0)?,
        total_revenue: round2(row.try_get(1)?),
        average_order_value: round2(row.try_get(2)?),
        status_breakdown: by_value(model, "status", query).await?,
    })
}
