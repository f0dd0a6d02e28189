//! Catalog entities. The same shapes back every raw supermarket database and
//! the processed catalog.
use super::slug::{slugify, SLUG_RE};
use super::{default_true, is_false, Entity, Schema, Violations};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static EAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{13}$").expect("valid regex"));
static COLOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid regex"));

const SLUG_MESSAGE: &str = "must contain only lowercase letters, digits, underscores and hyphens";

/// Counters kept on category-like records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogMetadata {
    pub product_count: u64,
    pub subcategory_count: u64,
    pub product_type_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

fn fill_slug(slug: &mut String, name: &str) {
    if slug.trim().is_empty() {
        *slug = slugify(name);
    } else {
        *slug = slug.trim().to_lowercase();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub metadata: CatalogMetadata,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            slug: String::new(),
            url: String::new(),
            subcategories: Vec::new(),
            active: true,
            featured: false,
            metadata: CatalogMetadata::default(),
        }
    }
}

static CATEGORY: Schema = Schema {
    model: "Category",
    unique: &["name", "slug"],
    slug_field: Some("slug"),
    active_field: Some("active"),
    search_fields: &["name", "displayName", "slug"],
    ..Schema::BASE
};

impl Entity for Category {
    fn schema() -> &'static Schema {
        &CATEGORY
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        fill_slug(&mut self.slug, &self.name);
        if self.url.trim().is_empty() {
            self.url = format!("/productos/{}", self.slug);
        }
        self.metadata.subcategory_count = self.subcategories.len() as u64;
    }

    fn validate(&self, check: &mut Violations) {
        check.required("name", &self.name);
        check.required("slug", &self.slug);
        check.pattern("slug", Some(&self.slug), &SLUG_RE, SLUG_MESSAGE);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parent category slug.
    pub category: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub metadata: CatalogMetadata,
}

impl Subcategory {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: String::new(),
            url: String::new(),
            display_name: None,
            description: None,
            category: category.into(),
            priority: 0,
            active: true,
            featured: false,
            metadata: CatalogMetadata::default(),
        }
    }
}

static SUBCATEGORY: Schema = Schema {
    model: "Subcategory",
    unique: &["slug", "url"],
    slug_field: Some("slug"),
    active_field: Some("active"),
    search_fields: &["name", "displayName", "description"],
    ..Schema::BASE
};

impl Entity for Subcategory {
    fn schema() -> &'static Schema {
        &SUBCATEGORY
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        fill_slug(&mut self.slug, &self.name);
        if !self.category.is_empty() && !self.slug.is_empty() {
            self.url = format!("/productos/{}/{}", self.category, self.slug);
        }
    }

    fn validate(&self, check: &mut Violations) {
        check.required("name", &self.name);
        check.required("category", &self.category);
        check.required("slug", &self.slug);
        check.pattern("slug", Some(&self.slug), &SLUG_RE, SLUG_MESSAGE);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductType {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    pub subcategory: String,
    /// Product ids, maintained by `sync_products`.
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub metadata: CatalogMetadata,
}

impl ProductType {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        subcategory: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            slug: String::new(),
            url: String::new(),
            display_name: None,
            description: None,
            category: category.into(),
            subcategory: subcategory.into(),
            products: Vec::new(),
            priority: 0,
            active: true,
            featured: false,
            filters: Vec::new(),
            metadata: CatalogMetadata::default(),
        }
    }
}

static PRODUCT_TYPE: Schema = Schema {
    model: "ProductType",
    unique: &["slug", "url"],
    slug_field: Some("slug"),
    active_field: Some("active"),
    search_fields: &["name", "displayName", "description"],
    ..Schema::BASE
};

impl Entity for ProductType {
    fn schema() -> &'static Schema {
        &PRODUCT_TYPE
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        fill_slug(&mut self.slug, &self.name);
        if !self.category.is_empty() && !self.subcategory.is_empty() && !self.slug.is_empty() {
            self.url = format!(
                "/productos/{}/{}/{}",
                self.category, self.subcategory, self.slug
            );
        }
        self.metadata.product_count = self.products.len() as u64;
    }

    fn validate(&self, check: &mut Violations) {
        check.required("name", &self.name);
        check.required("category", &self.category);
        check.required("subcategory", &self.subcategory);
        check.required("slug", &self.slug);
        check.pattern("slug", Some(&self.slug), &SLUG_RE, SLUG_MESSAGE);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_price: Option<f64>,
    /// Percentage, 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ean: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supermarket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_kilo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_liter: Option<f64>,
    #[serde(default = "default_true")]
    pub in_stock: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub featured: bool,
}

impl Product {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            slug: String::new(),
            description: None,
            brand: None,
            price,
            list_price: None,
            discount: None,
            ean: None,
            sku: None,
            url: None,
            images: Vec::new(),
            category: None,
            subcategory: None,
            product_type: None,
            filters: Vec::new(),
            supermarket_id: None,
            weight: None,
            unit: None,
            price_per_kilo: None,
            price_per_liter: None,
            in_stock: true,
            active: true,
            featured: false,
        }
    }

    /// Price after the percentage discount.
    pub fn final_price(&self) -> f64 {
        match self.discount {
            Some(d) if d > 0.0 => self.price * (1.0 - d / 100.0),
            _ => self.price,
        }
    }

    pub fn is_on_sale(&self) -> bool {
        let discounted = self.discount.is_some_and(|d| d > 0.0);
        discounted && self.list_price.is_some_and(|list| self.price < list)
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}

static PRODUCT: Schema = Schema {
    model: "Product",
    unique: &["ean", "sku"],
    slug_field: Some("slug"),
    active_field: Some("active"),
    search_fields: &["name", "displayName", "description", "brand"],
    ..Schema::BASE
};

impl Entity for Product {
    fn schema() -> &'static Schema {
        &PRODUCT
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        fill_slug(&mut self.slug, &self.name);
        if let Some(sku) = &self.sku {
            if sku.trim().is_empty() {
                self.sku = None;
            }
        }
    }

    fn validate(&self, check: &mut Violations) {
        check.required("name", &self.name);
        check.range("price", self.price, Some(0.0), None);
        check.non_negative("listPrice", self.list_price);
        if let Some(d) = self.discount {
            check.range("discount", d, Some(0.0), Some(100.0));
        }
        check.pattern("ean", self.ean.as_deref(), &EAN_RE, "must be exactly 13 digits");
        check.non_negative("weight", self.weight);
        check.non_negative("pricePerKilo", self.price_per_kilo);
        check.non_negative("pricePerLiter", self.price_per_liter);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Select,
    #[default]
    Multiselect,
    Range,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub name: String,
    pub display_name: String,
    pub category: String,
    #[serde(rename = "type", default)]
    pub filter_type: FilterType,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
}

impl Filter {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            category: category.into(),
            filter_type: FilterType::default(),
            values: Vec::new(),
            min_value: None,
            max_value: None,
            unit: None,
            description: None,
            icon: None,
            color: None,
            priority: 0,
            active: true,
            applicable_categories: Vec::new(),
        }
    }
}

static FILTER: Schema = Schema {
    model: "Filter",
    unique: &["name"],
    active_field: Some("active"),
    search_fields: &["name", "displayName", "description"],
    ..Schema::BASE
};

impl Entity for Filter {
    fn schema() -> &'static Schema {
        &FILTER
    }

    fn validate(&self, check: &mut Violations) {
        check.required("name", &self.name);
        check.required("displayName", &self.display_name);
        check.required("category", &self.category);
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                check.push("minValue", "must not exceed maxValue");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferType {
    Percentage,
    Fixed,
    BuyGet,
    FreeShipping,
    Bundle,
    FlashSale,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferDiscount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_purchase: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferMetadata {
    pub total_savings: f64,
    pub unique_users: u64,
    pub average_order_value: f64,
    pub conversion_rate: f64,
}

fn default_badge_color() -> String {
    "#FF5722".to_string()
}

fn default_minimum_quantity() -> u32 {
    1
}

/// Promotion. Offers carry caller-chosen string ids (`create_with_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    #[serde(default)]
    pub discount: OfferDiscount,
    pub supermarket: String,
    #[serde(default)]
    pub applicable_products: Vec<String>,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    #[serde(default)]
    pub applicable_subcategories: Vec<String>,
    #[serde(default)]
    pub applicable_product_types: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_limit: Option<u64>,
    #[serde(default)]
    pub current_usage: u64,
    #[serde(default = "default_minimum_quantity")]
    pub minimum_quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default = "default_badge_color")]
    pub badge_color: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub metadata: OfferMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_apply: bool,
}

impl Offer {
    pub fn new(
        title: impl Into<String>,
        offer_type: OfferType,
        supermarket: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            offer_type,
            discount: OfferDiscount::default(),
            supermarket: supermarket.into(),
            applicable_products: Vec::new(),
            applicable_categories: Vec::new(),
            applicable_subcategories: Vec::new(),
            applicable_product_types: Vec::new(),
            start_date,
            end_date,
            is_active: true,
            usage_limit: None,
            user_limit: None,
            current_usage: 0,
            minimum_quantity: default_minimum_quantity(),
            terms: None,
            image: None,
            badge: None,
            badge_color: default_badge_color(),
            priority: 0,
            metadata: OfferMetadata::default(),
            coupon_code: None,
            auto_apply: false,
        }
    }

    /// Active, inside its window and under its usage limit.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date <= now
            && now <= self.end_date
            && self.usage_limit.map_or(true, |limit| self.current_usage < limit)
    }

    /// Explicit product lists win; otherwise any non-empty scope list must match.
    pub fn applies_to(
        &self,
        product_id: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
        product_type: Option<&str>,
    ) -> bool {
        if !self.applicable_products.is_empty() {
            return self.applicable_products.iter().any(|p| p == product_id);
        }
        let scoped = [
            (&self.applicable_categories, category),
            (&self.applicable_subcategories, subcategory),
            (&self.applicable_product_types, product_type),
        ];
        let mut any_scope = false;
        for (list, value) in scoped {
            if list.is_empty() {
                continue;
            }
            any_scope = true;
            if let Some(value) = value {
                if list.iter().any(|item| item == value) {
                    return true;
                }
            }
        }
        !any_scope
    }
}

static OFFER: Schema = Schema {
    model: "Offer",
    unique: &["couponCode"],
    active_field: Some("isActive"),
    search_fields: &["title", "description", "badge"],
    ..Schema::BASE
};

impl Entity for Offer {
    fn schema() -> &'static Schema {
        &OFFER
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        if let Some(code) = &self.coupon_code {
            let code = code.trim().to_uppercase();
            self.coupon_code = if code.is_empty() { None } else { Some(code) };
        }
    }

    fn validate(&self, check: &mut Violations) {
        check.required("title", &self.title);
        check.required("supermarket", &self.supermarket);
        if self.end_date <= self.start_date {
            check.push("endDate", "must be after startDate");
        }
        if let Some(p) = self.discount.percentage {
            check.range("discount.percentage", p, Some(0.0), Some(100.0));
        }
        check.non_negative("discount.fixedAmount", self.discount.fixed_amount);
        if self.minimum_quantity == 0 {
            check.push("minimumQuantity", "must be at least 1");
        }
        check.pattern(
            "badgeColor",
            Some(&self.badge_color),
            &COLOR_RE,
            "must be a hex color like #FF5722",
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    #[default]
    InStock,
    LowStock,
    OutOfStock,
    Discontinued,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
}

fn default_currency() -> String {
    "ARS".to_string()
}

fn default_confidence() -> f64 {
    1.0
}

/// One scraped price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistory {
    pub product_id: String,
    pub supermarket_id: String,
    pub product_data: ProductSnapshot,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default = "Utc::now")]
    pub scraped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_batch_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub stock_status: StockStatus,
    #[serde(default)]
    pub is_on_offer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl PriceHistory {
    pub fn new(
        product_id: impl Into<String>,
        supermarket_id: impl Into<String>,
        product_name: impl Into<String>,
        price: f64,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            supermarket_id: supermarket_id.into(),
            product_data: ProductSnapshot {
                name: product_name.into(),
                ..ProductSnapshot::default()
            },
            price,
            list_price: None,
            discount: None,
            discount_amount: None,
            currency: default_currency(),
            price_per_unit: None,
            unit: None,
            scraped_at,
            scrape_source: None,
            scrape_batch_id: None,
            is_available: true,
            stock_status: StockStatus::InStock,
            is_on_offer: false,
            offer_type: None,
            offer_description: None,
            notes: None,
            confidence: default_confidence(),
        }
    }
}

static PRICE_HISTORY: Schema = Schema {
    model: "PriceHistory",
    collection: Some("price_history"),
    search_fields: &["productData.name", "productData.brand", "productData.sku"],
    ..Schema::BASE
};

impl Entity for PriceHistory {
    fn schema() -> &'static Schema {
        &PRICE_HISTORY
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        if self.discount_amount.is_none() {
            if let Some(list) = self.list_price.filter(|list| *list > self.price) {
                self.discount_amount = Some(list - self.price);
            }
        }
    }

    fn validate(&self, check: &mut Violations) {
        check.required("productId", &self.product_id);
        check.required("supermarketId", &self.supermarket_id);
        check.required("productData.name", &self.product_data.name);
        check.range("price", self.price, Some(0.0), None);
        check.non_negative("listPrice", self.list_price);
        if let Some(d) = self.discount {
            check.range("discount", d, Some(0.0), Some(100.0));
        }
        check.range("confidence", self.confidence, Some(0.0), Some(1.0));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Regionalization {
    pub enabled: bool,
    pub regions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pwa {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Analytics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_analytics: Option<String>,
    pub google_tag_manager: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_pixel: Option<String>,
}

/// Storefront profile scraped from a chain's homepage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupermarketInfo {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub analytics: Analytics,
    #[serde(default)]
    pub regionalization: Regionalization,
    #[serde(default)]
    pub pwa: Pwa,
    /// Free-form homepage metadata as scraped.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub homepage_metadata: Value,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scraped: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_homepage_scraped: Option<DateTime<Utc>>,
}

impl SupermarketInfo {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            logo: None,
            website: None,
            country: None,
            language: None,
            currency: None,
            timezone: None,
            platform: None,
            platform_version: None,
            domain: None,
            analytics: Analytics::default(),
            regionalization: Regionalization::default(),
            pwa: Pwa::default(),
            homepage_metadata: Value::Null,
            active: true,
            last_scraped: None,
            last_homepage_scraped: None,
        }
    }
}

static SUPERMARKET_INFO: Schema = Schema {
    model: "SupermarketInfo",
    collection: Some("supermarket-info"),
    unique: &["code"],
    active_field: Some("active"),
    search_fields: &["name", "code", "domain"],
    ..Schema::BASE
};

impl Entity for SupermarketInfo {
    fn schema() -> &'static Schema {
        &SUPERMARKET_INFO
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        self.code = self.code.trim().to_lowercase();
    }

    fn validate(&self, check: &mut Violations) {
        check.required("code", &self.code);
        check.required("name", &self.name);
    }
}

/// Chain directory entry in the processed database, keyed by the chain code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupermarketRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub regionalization: Regionalization,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scraped: Option<DateTime<Utc>>,
}

impl SupermarketRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logo: None,
            website: None,
            country: None,
            language: None,
            currency: None,
            timezone: None,
            platform: None,
            domain: None,
            regionalization: Regionalization::default(),
            active: true,
            last_scraped: None,
        }
    }
}

static SUPERMARKET: Schema = Schema {
    model: "Supermarket",
    active_field: Some("active"),
    search_fields: &["name", "domain"],
    ..Schema::BASE
};

impl Entity for SupermarketRecord {
    fn schema() -> &'static Schema {
        &SUPERMARKET
    }

    fn validate(&self, check: &mut Violations) {
        check.required("name", &self.name);
    }
}
