use super::{Entity, Schema, Violations};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    CashOnDelivery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[default]
    HomeDelivery,
    PickupPoint,
    SupermarketPickup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub supermarket_id: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: f64,
}

impl OrderItem {
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
        }
    }
}

fn default_country() -> String {
    "Argentina".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub street: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apartment: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub user_id: String,
    pub order_number: String,
    #[serde(default)]
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
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
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

impl Order {
    pub fn new(
        user_id: impl Into<String>,
        order_number: impl Into<String>,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            order_number: order_number.into(),
            status: OrderStatus::Pending,
            items,
            subtotal: 0.0,
            tax: 0.0,
            shipping: 0.0,
            discount: 0.0,
            total: 0.0,
            shipping_address,
            payment_method,
            payment_status: PaymentStatus::Pending,
            delivery_method: DeliveryMethod::HomeDelivery,
            notes: None,
            tracking_number: None,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    /// Order number like `ORD-20240105-1A2B3C`.
    pub fn generate_number(now: DateTime<Utc>) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        format!("ORD-{}-{suffix}", now.format("%Y%m%d"))
    }

    /// Moves to `status`, stamping the matching transition time.
    pub fn set_status(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        let stamp = match status {
            OrderStatus::Confirmed => &mut self.confirmed_at,
            OrderStatus::Shipped => &mut self.shipped_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
            OrderStatus::Pending | OrderStatus::Processing => return,
        };
        *stamp = Some(now);
    }

    pub fn recalculate(&mut self) {
        for item in &mut self.items {
            item.total_price = item.unit_price * f64::from(item.quantity);
        }
        self.subtotal = self.items.iter().map(|i| i.total_price).sum();
        self.total = self.subtotal + self.tax + self.shipping - self.discount;
    }
}

static ORDER: Schema = Schema {
    model: "Order",
    unique: &["orderNumber"],
    search_fields: &["orderNumber", "notes"],
    ..Schema::BASE
};

impl Entity for Order {
    fn schema() -> &'static Schema {
        &ORDER
    }

    fn before_save(&mut self, _now: DateTime<Utc>) {
        self.recalculate();
    }

    fn validate(&self, check: &mut Violations) {
        check.required("userId", &self.user_id);
        check.required("orderNumber", &self.order_number);
        if self.items.is_empty() {
            check.push("items", "must contain at least one item");
        }
        for item in &self.items {
            if item.quantity == 0 {
                check.push("items.quantity", "must be at least 1");
            }
            check.range("items.unitPrice", item.unit_price, Some(0.0), None);
        }
        let a = &self.shipping_address;
        for (field, value) in [
            ("shippingAddress.street", &a.street),
            ("shippingAddress.number", &a.number),
            ("shippingAddress.city", &a.city),
            ("shippingAddress.state", &a.state),
            ("shippingAddress.postalCode", &a.postal_code),
        ] {
            check.required(field, value);
        }
        check.range("discount", self.discount, Some(0.0), None);
        check.range("total", self.total, Some(0.0), None);
    }
}
