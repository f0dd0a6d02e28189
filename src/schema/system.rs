//! Operational records: notifications, outbound API logs and settings.
use super::{default_true, Entity, Schema, Violations};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PriceDrop,
    BackInStock,
    OfferAvailable,
    OrderStatus,
    Promotion,
    System,
    Security,
    Marketing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    InApp,
    Email,
    Push,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Channel {
    pub fn pending(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            sent: false,
            sent_at: None,
            error: None,
        }
    }
}

/// Context attached to a notification; which keys are set depends on the type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supermarket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: NotificationData,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub click_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_clicked_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type,
            title: title.into(),
            message: message.into(),
            data: NotificationData::default(),
            is_read: false,
            read_at: None,
            channels: vec![Channel::pending(ChannelType::InApp)],
            priority: Priority::Normal,
            scheduled_for: None,
            expires_at: None,
            source: None,
            category: None,
            click_count: 0,
            last_clicked_at: None,
        }
    }

    pub fn price_drop(
        user_id: impl Into<String>,
        product_id: &str,
        product_name: &str,
        old_price: f64,
        new_price: f64,
        supermarket_id: &str,
    ) -> Self {
        let mut n = Notification::new(
            user_id,
            NotificationType::PriceDrop,
            format!("¡{product_name} bajó de precio!"),
            format!("{product_name} ahora cuesta ${new_price:.2} (antes ${old_price:.2})"),
        );
        n.data = NotificationData {
            product_id: Some(product_id.to_string()),
            product_name: Some(product_name.to_string()),
            old_price: Some(old_price),
            new_price: Some(new_price),
            supermarket_id: Some(supermarket_id.to_string()),
            action_url: Some(format!("/productos/{product_id}")),
            action_text: Some("Ver producto".to_string()),
            ..NotificationData::default()
        };
        n.priority = Priority::High;
        n.channels = vec![
            Channel::pending(ChannelType::InApp),
            Channel::pending(ChannelType::Push),
        ];
        n
    }

    pub fn order_status(
        user_id: impl Into<String>,
        order_id: &str,
        order_number: &str,
        old_status: &str,
        new_status: &str,
    ) -> Self {
        let message = match new_status {
            "confirmed" => format!("Tu pedido {order_number} fue confirmado"),
            "processing" => format!("Tu pedido {order_number} está siendo preparado"),
            "shipped" => format!("Tu pedido {order_number} fue enviado"),
            "delivered" => format!("Tu pedido {order_number} fue entregado"),
            "cancelled" => format!("Tu pedido {order_number} fue cancelado"),
            other => format!("Tu pedido {order_number} cambió a {other}"),
        };
        let mut n = Notification::new(
            user_id,
            NotificationType::OrderStatus,
            format!("Pedido {order_number}"),
            message,
        );
        n.data = NotificationData {
            order_id: Some(order_id.to_string()),
            order_number: Some(order_number.to_string()),
            old_status: Some(old_status.to_string()),
            new_status: Some(new_status.to_string()),
            action_url: Some(format!("/pedidos/{order_id}")),
            action_text: Some("Ver pedido".to_string()),
            ..NotificationData::default()
        };
        n.priority = if new_status == "delivered" {
            Priority::High
        } else {
            Priority::Normal
        };
        n.channels = vec![
            Channel::pending(ChannelType::InApp),
            Channel::pending(ChannelType::Email),
        ];
        n
    }

    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(now);
        }
    }

    pub fn record_click(&mut self, now: DateTime<Utc>) {
        self.click_count += 1;
        self.last_clicked_at = Some(now);
        self.mark_read(now);
    }
}

static NOTIFICATION: Schema = Schema {
    model: "Notification",
    search_fields: &["title", "message"],
    ..Schema::BASE
};

impl Entity for Notification {
    fn schema() -> &'static Schema {
        &NOTIFICATION
    }

    fn validate(&self, check: &mut Violations) {
        check.required("userId", &self.user_id);
        check.required("title", &self.title);
        check.length("title", &self.title, 0, 200);
        check.required("message", &self.message);
        check.length("message", &self.message, 0, 1000);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    SupermarketScraping,
    PaymentGateway,
    ShippingApi,
    Geocoding,
    Validation,
    ExternalService,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// One outbound call to a third-party API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLog {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub api_type: ApiType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supermarket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub retry_count: u32,
}

impl ApiLog {
    pub fn new(method: HttpMethod, url: impl Into<String>, api_type: ApiType) -> Self {
        Self {
            method,
            url: url.into(),
            status_code: None,
            response_time: None,
            response_size: None,
            user_agent: None,
            ip_address: None,
            user_id: None,
            api_type,
            supermarket_id: None,
            endpoint: None,
            success: true,
            error: None,
            timestamp: Utc::now(),
            duration: None,
            retry_count: 0,
        }
    }

    pub fn failed(mut self, message: impl Into<String>, code: Option<String>) -> Self {
        self.success = false;
        self.error = Some(ApiError {
            message: message.into(),
            code,
            details: Value::Null,
        });
        self
    }
}

static API_LOG: Schema = Schema {
    model: "ApiLog",
    collection: Some("api_logs"),
    search_fields: &["url", "endpoint"],
    ..Schema::BASE
};

impl Entity for ApiLog {
    fn schema() -> &'static Schema {
        &API_LOG
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        if let Some(code) = self.status_code {
            if code >= 400 {
                self.success = false;
            }
        }
    }

    fn validate(&self, check: &mut Violations) {
        check.required("url", &self.url);
        check.non_negative("responseTime", self.response_time);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::String => "string",
            SettingType::Number => "number",
            SettingType::Boolean => "boolean",
            SettingType::Object => "object",
            SettingType::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SettingType::String => value.is_string(),
            SettingType::Number => value.is_number(),
            SettingType::Boolean => value.is_boolean(),
            SettingType::Object => value.is_object(),
            SettingType::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingCategory {
    #[default]
    General,
    Scraping,
    Api,
    Security,
    Notifications,
    Payment,
    Shipping,
    Performance,
    Maintenance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingValidation {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettings {
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    #[serde(default)]
    pub category: SettingCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub default_value: Value,
    #[serde(default)]
    pub validation: SettingValidation,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_readonly: bool,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl SystemSettings {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        setting_type: SettingType,
        category: SettingCategory,
    ) -> Self {
        Self {
            key: key.into(),
            default_value: value.clone(),
            value,
            setting_type,
            category,
            description: None,
            validation: SettingValidation::default(),
            is_public: false,
            is_readonly: false,
            version: default_version(),
            last_modified_by: None,
        }
    }

    fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    fn bounded(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.validation.min = min;
        self.validation.max = max;
        self
    }

    /// Checks `value` against this setting's type and declared rules.
    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        let key = &self.key;
        if value.is_null() {
            if self.validation.required {
                return Err(format!("Setting {key} is required"));
            }
            return Ok(());
        }
        if !self.setting_type.matches(value) {
            return Err(format!(
                "Setting {key} must be of type {}",
                self.setting_type.as_str()
            ));
        }
        let measured = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(items) => Some(items.len() as f64),
            _ => None,
        };
        if let Some(size) = measured {
            if let Some(min) = self.validation.min {
                if size < min {
                    return Err(format!("Setting {key} must be at least {min}"));
                }
            }
            if let Some(max) = self.validation.max {
                if size > max {
                    return Err(format!("Setting {key} must be at most {max}"));
                }
            }
        }
        if let (Some(pattern), Value::String(s)) = (&self.validation.pattern, value) {
            let re = Regex::new(pattern)
                .map_err(|e| format!("Setting {key} has an invalid pattern: {e}"))?;
            if !re.is_match(s) {
                return Err(format!("Setting {key} does not match required pattern"));
            }
        }
        if !self.validation.allowed.is_empty() && !self.validation.allowed.contains(value) {
            let options = self
                .validation
                .allowed
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!("Setting {key} must be one of: {options}"));
        }
        Ok(())
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

static SYSTEM_SETTINGS: Schema = Schema {
    model: "SystemSettings",
    collection: Some("system_settings"),
    unique: &["key"],
    search_fields: &["key", "description"],
    ..Schema::BASE
};

impl Entity for SystemSettings {
    fn schema() -> &'static Schema {
        &SYSTEM_SETTINGS
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        self.key = self.key.trim().to_string();
    }

    fn validate(&self, check: &mut Violations) {
        check.required("key", &self.key);
        if let Err(message) = self.check_value(&self.value) {
            check.push("value", message);
        }
    }
}

/// Settings every deployment starts with.
pub fn default_settings() -> Vec<SystemSettings> {
    use SettingCategory as C;
    use SettingType as T;

    let mut app_name = SystemSettings::new("app.name", json!("Caminando Online"), T::String, C::General)
        .describe("Application name");
    app_name.validation.required = true;
    app_name.is_public = true;

    let mut version = SystemSettings::new("app.version", json!("1.0.0"), T::String, C::General)
        .describe("Application version");
    version.is_public = true;
    version.is_readonly = true;

    let mut environment =
        SystemSettings::new("app.environment", json!("development"), T::String, C::General)
            .describe("Deployment environment");
    environment.validation.allowed = vec![json!("development"), json!("staging"), json!("production")];

    vec![
        app_name,
        version,
        environment,
        SystemSettings::new("scraping.enabled", json!(true), T::Boolean, C::Scraping)
            .describe("Enable scheduled scraping"),
        SystemSettings::new("scraping.interval", json!(3_600_000), T::Number, C::Scraping)
            .describe("Scraping interval in milliseconds")
            .bounded(Some(60_000.0), None),
        SystemSettings::new("scraping.timeout", json!(30_000), T::Number, C::Scraping)
            .describe("Scraper request timeout in milliseconds")
            .bounded(Some(5_000.0), Some(120_000.0)),
        SystemSettings::new("scraping.maxRetries", json!(3), T::Number, C::Scraping)
            .describe("Retries per scraper request")
            .bounded(Some(0.0), Some(10.0)),
        SystemSettings::new("api.rateLimit.windowMs", json!(900_000), T::Number, C::Api)
            .describe("Rate limit window in milliseconds"),
        SystemSettings::new("api.rateLimit.max", json!(100), T::Number, C::Api)
            .describe("Requests allowed per window")
            .bounded(Some(1.0), None),
        SystemSettings::new("security.jwt.expiresIn", json!("24h"), T::String, C::Security)
            .describe("Access token lifetime"),
        SystemSettings::new("security.password.minLength", json!(8), T::Number, C::Security)
            .describe("Minimum password length")
            .bounded(Some(6.0), Some(128.0)),
        SystemSettings::new("notifications.email.enabled", json!(true), T::Boolean, C::Notifications)
            .describe("Send email notifications"),
        SystemSettings::new("notifications.push.enabled", json!(true), T::Boolean, C::Notifications)
            .describe("Send push notifications"),
        SystemSettings::new("performance.cache.enabled", json!(true), T::Boolean, C::Performance)
            .describe("Enable response caching"),
        SystemSettings::new("performance.cache.ttl", json!(300), T::Number, C::Performance)
            .describe("Cache TTL in seconds")
            .bounded(Some(60.0), None),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(key: &str) -> SystemSettings {
        default_settings()
            .into_iter()
            .find(|s| s.key == key)
            .unwrap()
    }

    #[test]
    fn defaults_pass_their_own_rules() {
        let defaults = default_settings();
        assert_eq!(defaults.len(), 15);
        for s in &defaults {
            assert_eq!(s.check_value(&s.value), Ok(()), "{}", s.key);
        }
    }

    #[test]
    fn value_rules() {
        let timeout = setting("scraping.timeout");
        assert_eq!(
            timeout.check_value(&json!(1000)).unwrap_err(),
            "Setting scraping.timeout must be at least 5000"
        );
        assert_eq!(
            timeout.check_value(&json!(200_000)).unwrap_err(),
            "Setting scraping.timeout must be at most 120000"
        );
        assert_eq!(
            timeout.check_value(&json!("fast")).unwrap_err(),
            "Setting scraping.timeout must be of type number"
        );
        assert_eq!(
            setting("app.name").check_value(&Value::Null).unwrap_err(),
            "Setting app.name is required"
        );
        assert_eq!(
            setting("app.environment").check_value(&json!("qa")).unwrap_err(),
            "Setting app.environment must be one of: development, staging, production"
        );
    }

    #[test]
    fn pattern_rule() {
        let mut s = SystemSettings::new("security.jwt.expiresIn", json!("24h"), SettingType::String, SettingCategory::Security);
        s.validation.pattern = Some(r"^\d+[smhd]$".into());
        assert!(s.check_value(&json!("7d")).is_ok());
        assert_eq!(
            s.check_value(&json!("forever")).unwrap_err(),
            "Setting security.jwt.expiresIn does not match required pattern"
        );
    }

    #[test]
    fn notification_constructors() {
        let n = Notification::price_drop("u1", "p1", "Leche", 1200.0, 999.5, "dia");
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.channels.len(), 2);
        assert_eq!(n.message, "Leche ahora cuesta $999.50 (antes $1200.00)");

        let n = Notification::order_status("u1", "o1", "ORD-1", "shipped", "delivered");
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.channels[1].channel_type, ChannelType::Email);
        let n = Notification::order_status("u1", "o1", "ORD-1", "pending", "confirmed");
        assert_eq!(n.priority, Priority::Normal);
        assert_eq!(n.message, "Tu pedido ORD-1 fue confirmado");
    }

    #[test]
    fn failed_status_marks_log_unsuccessful() {
        let mut log = ApiLog::new(HttpMethod::Get, "https://api.example/x", ApiType::Geocoding);
        log.status_code = Some(502);
        log.before_save(Utc::now());
        assert!(!log.success);
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["method"], "GET");
        assert_eq!(json["apiType"], "geocoding");
    }
}
