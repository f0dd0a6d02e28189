//! Accounts, addresses, sessions and carts (admin database).
use super::{default_true, Entity, Schema, Violations};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

pub const CART_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Premium,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    pub email: bool,
    pub push: bool,
    pub promotions: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            push: true,
            promotions: false,
        }
    }
}

fn default_priority() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupermarketPreference {
    pub supermarket_id: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub currency: String,
    pub language: String,
    pub notifications: NotificationPreferences,
    pub supermarkets: Vec<SupermarketPreference>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            currency: "ARS".to_string(),
            language: "es-AR".to_string(),
            notifications: NotificationPreferences::default(),
            supermarkets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub product_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub total_searches: u64,
    pub total_lists: u64,
    pub total_favorites: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Account record. `password` holds an already-hashed credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verification_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_expires: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub login_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub favorites: Vec<Favorite>,
    #[serde(default)]
    pub stats: UserStats,
    #[serde(default)]
    pub location: Location,
}

impl User {
    pub fn new(email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            first_name: None,
            last_name: None,
            password: None,
            is_email_verified: false,
            email_verification_token: None,
            password_reset_token: None,
            password_reset_expires: None,
            is_active: true,
            role: Role::User,
            last_login: None,
            login_count: 0,
            avatar: None,
            phone: None,
            gender: None,
            preferences: Preferences::default(),
            favorites: Vec::new(),
            stats: UserStats::default(),
            location: Location::default(),
        }
    }

    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Copy safe to hand to clients: credentials and tokens removed.
    pub fn public_view(&self) -> User {
        User {
            password: None,
            email_verification_token: None,
            password_reset_token: None,
            password_reset_expires: None,
            ..self.clone()
        }
    }

    pub fn record_login(&mut self, at: DateTime<Utc>) {
        self.last_login = Some(at);
        self.login_count += 1;
        self.stats.last_activity = Some(at);
    }
}

static USER: Schema = Schema {
    model: "User",
    unique: &["email", "username"],
    active_field: Some("isActive"),
    search_fields: &["email", "username", "firstName", "lastName"],
    ..Schema::BASE
};

impl Entity for User {
    fn schema() -> &'static Schema {
        &USER
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        self.email = self.email.trim().to_lowercase();
        self.username = self.username.trim().to_string();
        self.stats.total_favorites = self.favorites.len() as u64;
    }

    fn validate(&self, check: &mut Violations) {
        check.required("email", &self.email);
        check.pattern("email", Some(&self.email), &EMAIL_RE, "must be a valid email address");
        check.length("username", &self.username, 3, 30);
        check.max_len("firstName", self.first_name.as_deref(), 50);
        check.max_len("lastName", self.last_name.as_deref(), 50);
        if let Some(password) = &self.password {
            if password.chars().count() < 8 {
                check.push("password", "must be at least 8 characters");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    #[default]
    Home,
    Work,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

fn default_country() -> String {
    "Argentina".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAddress {
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub address_type: AddressType,
    pub name: String,
    pub contact_name: String,
    pub contact_phone: String,
    pub street: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apartment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_validated: bool,
}

impl UserAddress {
    pub fn one_line(&self) -> String {
        let mut line = format!("{} {}", self.street, self.number);
        if let Some(floor) = &self.floor {
            line.push_str(&format!(", piso {floor}"));
        }
        if let Some(apartment) = &self.apartment {
            line.push_str(&format!(", depto {apartment}"));
        }
        line.push_str(&format!(", {}, {} ({})", self.city, self.state, self.postal_code));
        line
    }
}

static USER_ADDRESS: Schema = Schema {
    model: "UserAddress",
    collection: Some("user_addresses"),
    active_field: Some("isActive"),
    search_fields: &["name", "street", "city"],
    ..Schema::BASE
};

impl Entity for UserAddress {
    fn schema() -> &'static Schema {
        &USER_ADDRESS
    }

    fn validate(&self, check: &mut Violations) {
        check.required("userId", &self.user_id);
        for (field, value) in [
            ("name", &self.name),
            ("contactName", &self.contact_name),
            ("contactPhone", &self.contact_phone),
            ("street", &self.street),
            ("number", &self.number),
            ("city", &self.city),
            ("state", &self.state),
            ("postalCode", &self.postal_code),
        ] {
            check.required(field, value);
        }
        if let Some(c) = self.coordinates {
            check.range("coordinates.lat", c.lat, Some(-90.0), Some(90.0));
            check.range("coordinates.lng", c.lng, Some(-180.0), Some(180.0));
        }
        check.max_len("instructions", self.instructions.as_deref(), 500);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    #[default]
    Password,
    Google,
    Facebook,
    Apple,
    MagicLink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub user_id: String,
    pub session_token: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_suspicious: bool,
    #[serde(default)]
    pub login_method: LoginMethod,
    #[serde(default)]
    pub risk_score: u8,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
}

impl UserSession {
    pub fn new(
        user_id: impl Into<String>,
        session_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_token: session_token.into(),
            device_info: DeviceInfo::default(),
            expires_at,
            is_active: true,
            is_suspicious: false,
            login_method: LoginMethod::Password,
            risk_score: 0,
            failed_attempts: 0,
            last_activity: None,
            terminated_at: None,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }

    pub fn invalidate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.terminated_at = Some(now);
    }

    pub fn extend(&mut self, by: Duration, now: DateTime<Utc>) {
        self.expires_at = now + by;
        self.last_activity = Some(now);
    }
}

static USER_SESSION: Schema = Schema {
    model: "UserSession",
    collection: Some("user_sessions"),
    unique: &["sessionToken"],
    active_field: Some("isActive"),
    ..Schema::BASE
};

impl Entity for UserSession {
    fn schema() -> &'static Schema {
        &USER_SESSION
    }

    fn validate(&self, check: &mut Violations) {
        check.required("userId", &self.user_id);
        check.required("sessionToken", &self.session_token);
        check.range("riskScore", f64::from(self.risk_score), Some(0.0), Some(100.0));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub product_name: String,
    pub supermarket_id: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub product_data: Value,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        supermarket_id: impl Into<String>,
        quantity: u32,
        unit_price: f64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            supermarket_id: supermarket_id.into(),
            quantity,
            unit_price,
            total_price: unit_price * f64::from(quantity),
            product_data: Value::Null,
            added_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    #[default]
    Standard,
    Express,
    SameDay,
}

fn default_shipping_days() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedShipping {
    #[serde(default)]
    pub cost: f64,
    #[serde(default = "default_shipping_days")]
    pub days: u32,
    #[serde(default)]
    pub method: ShippingMethod,
}

impl Default for EstimatedShipping {
    fn default() -> Self {
        Self {
            cost: 0.0,
            days: default_shipping_days(),
            method: ShippingMethod::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    #[serde(default = "Utc::now")]
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartSource {
    #[default]
    Web,
    Mobile,
    Api,
}

/// Shopping cart keyed by session. Totals are recomputed on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub shipping: f64,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub estimated_shipping: EstimatedShipping,
    #[serde(default)]
    pub applied_coupons: Vec<AppliedCoupon>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub source: CartSource,
}

impl Cart {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: None,
            session_id: session_id.into(),
            items: Vec::new(),
            subtotal: 0.0,
            tax: 0.0,
            shipping: 0.0,
            discount: 0.0,
            total: 0.0,
            estimated_shipping: EstimatedShipping::default(),
            applied_coupons: Vec::new(),
            is_active: true,
            expires_at: now + Duration::days(CART_TTL_DAYS),
            source: CartSource::Web,
        }
    }

    /// Adds to an existing line for the same product, or appends a new one.
    pub fn add_item(&mut self, item: CartItem) {
        match self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity += item.quantity;
                existing.unit_price = item.unit_price;
            }
            None => self.items.push(item),
        }
    }

    /// Zero removes the line. Returns whether the product was in the cart.
    pub fn update_quantity(&mut self, product_id: &str, quantity: u32) -> bool {
        let Some(pos) = self.items.iter().position(|i| i.product_id == product_id) else {
            return false;
        };
        if quantity == 0 {
            self.items.remove(pos);
        } else {
            self.items[pos].quantity = quantity;
        }
        true
    }

    pub fn remove_item(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.applied_coupons.clear();
        self.discount = 0.0;
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn recalculate(&mut self) {
        for item in &mut self.items {
            item.total_price = item.unit_price * f64::from(item.quantity);
        }
        self.subtotal = self.items.iter().map(|i| i.total_price).sum();
        self.discount = self
            .applied_coupons
            .iter()
            .map(|c| match c.discount_type {
                DiscountType::Percentage => self.subtotal * c.discount_value / 100.0,
                DiscountType::Fixed => c.discount_value,
            })
            .sum::<f64>()
            .min(self.subtotal);
        self.shipping = self.estimated_shipping.cost;
        self.total = self.subtotal + self.tax + self.shipping - self.discount;
    }
}

static CART: Schema = Schema {
    model: "Cart",
    unique: &["sessionId"],
    active_field: Some("isActive"),
    ..Schema::BASE
};

impl Entity for Cart {
    fn schema() -> &'static Schema {
        &CART
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        self.recalculate();
    }

    fn validate(&self, check: &mut Violations) {
        check.required("sessionId", &self.session_id);
        for item in &self.items {
            if item.quantity == 0 {
                check.push("items.quantity", "must be at least 1");
            }
            check.range("items.unitPrice", item.unit_price, Some(0.0), None);
        }
        for coupon in &self.applied_coupons {
            check.required("appliedCoupons.code", &coupon.code);
            check.range("appliedCoupons.discountValue", coupon.discount_value, Some(0.0), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::prepare;

    #[test]
    fn email_normalized_and_checked() {
        let mut user = User::new("  Ana@Example.COM ", "ana");
        prepare(&mut user, Utc::now()).unwrap();
        assert_eq!(user.email, "ana@example.com");

        let mut bad = User::new("not-an-email", "an");
        bad.password = Some("short".into());
        let err = prepare(&mut bad, Utc::now()).unwrap_err();
        match err {
            crate::Error::Validation { violations, .. } => {
                let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "username", "password"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn public_view_strips_secrets() {
        let mut user = User::new("a@b.co", "alice");
        user.password = Some("$argon2id$hash".into());
        user.password_reset_token = Some("tok".into());
        let json = serde_json::to_value(user.public_view()).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("passwordResetToken").is_none());
        assert_eq!(json["preferences"]["language"], "es-AR");
    }

    #[test]
    fn cart_merges_lines_and_totals() {
        let now = Utc::now();
        let mut cart = Cart::new("sess-1", now);
        assert_eq!(cart.expires_at, now + Duration::days(7));
        cart.add_item(CartItem::new("p1", "Leche", "dia", 2, 100.0));
        cart.add_item(CartItem::new("p1", "Leche", "dia", 1, 100.0));
        cart.add_item(CartItem::new("p2", "Pan", "dia", 1, 50.0));
        cart.tax = 10.0;
        cart.estimated_shipping.cost = 20.0;
        cart.applied_coupons.push(AppliedCoupon {
            code: "DIEZ".into(),
            discount_type: DiscountType::Percentage,
            discount_value: 10.0,
            applied_at: now,
        });
        prepare(&mut cart, now).unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.item_count(), 4);
        assert_eq!(cart.subtotal, 350.0);
        assert_eq!(cart.discount, 35.0);
        assert_eq!(cart.total, 350.0 + 10.0 + 20.0 - 35.0);

        assert!(cart.update_quantity("p2", 0));
        assert!(!cart.update_quantity("missing", 3));
        cart.recalculate();
        assert_eq!(cart.subtotal, 300.0);
    }

    #[test]
    fn address_coordinates_bounded() {
        let json = serde_json::json!({
            "userId": "u1", "name": "Casa", "contactName": "Ana", "contactPhone": "123",
            "street": "Corrientes", "number": "1234", "city": "CABA", "state": "BA",
            "postalCode": "1043", "coordinates": {"lat": 91.0, "lng": 0.0}
        });
        let mut address: UserAddress = serde_json::from_value(json).unwrap();
        assert_eq!(address.country, "Argentina");
        assert_eq!(address.address_type, AddressType::Home);
        assert!(prepare(&mut address, Utc::now()).is_err());
        address.coordinates = None;
        prepare(&mut address, Utc::now()).unwrap();
        assert_eq!(address.one_line(), "Corrientes 1234, CABA, BA (1043)");
    }

    #[test]
    fn session_lifecycle() {
        let now = Utc::now();
        let mut session = UserSession::new("u1", "tok", now + Duration::hours(1));
        assert!(session.is_live(now));
        session.extend(Duration::hours(24), now);
        assert_eq!(session.expires_at, now + Duration::hours(24));
        session.invalidate(now);
        assert!(!session.is_live(now));
    }
}
