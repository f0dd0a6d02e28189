use super::accounts::AccountStore;
use super::stats::{order_stats, OrderStats};
use crate::db::{Condition, Document, ListParams, Model, ModelBinder, Page, Query, Sort};
use crate::error::{Error, Result};
use crate::model::LogicalDb;
use crate::schema::commerce::{Order, OrderItem, OrderStatus, PaymentMethod, ShippingAddress};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument};

/// Narrowing applied on top of [`ListParams`] when listing orders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub user_id: Option<String>,
    pub status: Option<OrderStatus>,
    /// Orders with at least one line from this supermarket.
    pub supermarket_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn to_query(&self) -> Query {
        let mut query = Query::new();
        if let Some(user) = &self.user_id {
            query = query.eq("userId", user.as_str());
        }
        if let Some(status) = self.status {
            query = query.eq("status", status.as_str());
        }
        if let Some(supermarket) = &self.supermarket_id {
            query = query.filter(Condition::ElementField(
                "items".into(),
                "supermarketId".into(),
                json!(supermarket),
            ));
        }
        if let Some(from) = self.from {
            query = query.filter(Condition::After("createdAt".into(), from));
        }
        if let Some(to) = self.to {
            query = query.filter(Condition::Before("createdAt".into(), to));
        }
        query
    }
}

/// A status change and the status it replaced.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: Document<Order>,
    pub previous: OrderStatus,
}

/// Orders on the operations database.
#[derive(Debug, Clone)]
pub struct OrderStore {
    pub orders: Model<Order>,
}

impl OrderStore {
    pub fn bind(binder: &ModelBinder) -> Result<Self> {
        Ok(Self {
            orders: binder.bind(LogicalDb::Operations.as_str())?,
        })
    }

    /// Stores a new order, numbering it when no number was given.
    #[instrument(skip_all)]
    pub async fn place(&self, mut order: Order) -> Result<Document<Order>> {
        if order.order_number.trim().is_empty() {
            order.order_number = Order::generate_number(Utc::now());
        }
        order.status = OrderStatus::Pending;
        let doc = self.orders.create(order).await?;
        info!(order = %doc.order_number, total = doc.total, "order placed");
        Ok(doc)
    }

    /// Turns the session's cart into an order and empties the cart.
    #[instrument(skip_all)]
    pub async fn place_from_cart(
        &self,
        accounts: &AccountStore,
        session_id: &str,
        user_id: &str,
        address: ShippingAddress,
        payment_method: PaymentMethod,
    ) -> Result<Document<Order>> {
        let cart = accounts.cart_for_session(session_id, Some(user_id)).await?;
        if cart.items.is_empty() {
            return Err(Error::Rejected("Cart is empty".into()));
        }
        let items = cart
            .items
            .iter()
            .map(|i| {
                OrderItem::new(
                    i.product_id.as_str(),
                    i.product_name.as_str(),
                    i.supermarket_id.as_str(),
                    i.quantity,
                    i.unit_price,
                )
            })
            .collect();
        let mut order = Order::new(user_id, "", items, address, payment_method);
        order.tax = cart.tax;
        order.shipping = cart.shipping;
        order.discount = cart.discount;
        let placed = self.place(order).await?;
        accounts.clear_cart(session_id).await?;
        Ok(placed)
    }

    pub async fn get(&self, id: &str) -> Result<Document<Order>> {
        self.orders.get(id).await
    }

    pub async fn by_number(&self, order_number: &str) -> Result<Document<Order>> {
        self.orders
            .find_one(&Query::new().eq("orderNumber", order_number))
            .await?
            .ok_or_else(|| Error::NotFound {
                model: "Order",
                id: order_number.to_string(),
            })
    }

    pub async fn list(&self, filter: &OrderFilter, params: &ListParams) -> Result<Page<Document<Order>>> {
        self.orders.list_with(params, filter.to_query()).await
    }

    /// Newest first.
    pub async fn orders_for_user(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<Document<Order>>> {
        let mut query = Query::new()
            .eq("userId", user_id)
            .sort(Sort::desc("createdAt"));
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.orders.find(&query).await
    }

    #[instrument(skip_all, fields(order_id = id, status = %status))]
    pub async fn update_status(&self, id: &str, status: OrderStatus) -> Result<StatusChange> {
        let mut order = self.orders.get(id).await?;
        let previous = order.status;
        order.data.set_status(status, Utc::now());
        let order = self.orders.replace(order).await?;
        info!(order = %order.order_number, from = %previous, "order status changed");
        Ok(StatusChange { order, previous })
    }

    pub async fn set_tracking_number(&self, id: &str, tracking: &str) -> Result<Document<Order>> {
        self.orders
            .update(id, json!({ "trackingNumber": tracking }))
            .await
    }

    /// Delivered and already-cancelled orders cannot be cancelled.
    pub async fn cancel(&self, id: &str, reason: Option<&str>) -> Result<StatusChange> {
        let mut order = self.orders.get(id).await?;
        let previous = order.status;
        if previous.is_final() {
            return Err(Error::Rejected(format!(
                "Cannot cancel an order that is {previous}"
            )));
        }
        order.data.set_status(OrderStatus::Cancelled, Utc::now());
        order.data.cancellation_reason = reason.map(str::to_owned);
        let order = self.orders.replace(order).await?;
        info!(order = %order.order_number, "order cancelled");
        Ok(StatusChange { order, previous })
    }

    pub async fn stats(&self, filter: &OrderFilter) -> Result<OrderStats> {
        order_stats(&self.orders, &filter.to_query()).await
    }
}
