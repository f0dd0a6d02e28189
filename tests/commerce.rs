use caminando::config::{Config, DatabaseConfig, MEMORY_URL};
use caminando::db::{ConnectionRegistry, ListParams, ModelBinder};
use caminando::schema::commerce::{Order, OrderItem, OrderStatus, PaymentMethod, ShippingAddress};
use caminando::schema::user::{
    AppliedCoupon, CartItem, DeviceInfo, DeviceType, DiscountType, User, UserAddress,
};
use caminando::store::{AccountStore, OrderFilter, OrderStore, Stores};
use caminando::Error;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

async fn stores() -> Stores {
    let cfg = Config::new("./data")
        .with_database("admin", DatabaseConfig::new(MEMORY_URL))
        .with_database("operations", DatabaseConfig::new(MEMORY_URL));
    let registry = ConnectionRegistry::open_all(&cfg).await.unwrap();
    Stores::new(Arc::new(ModelBinder::new(Arc::new(registry))))
}

fn shipping_address() -> ShippingAddress {
    serde_json::from_value(json!({
        "street": "Av. Corrientes",
        "number": "1234",
        "city": "CABA",
        "state": "Buenos Aires",
        "postalCode": "C1043"
    }))
    .unwrap()
}

fn address(user_id: &str, name: &str, is_default: bool) -> UserAddress {
    serde_json::from_value(json!({
        "userId": user_id,
        "name": name,
        "contactName": "Ana",
        "contactPhone": "+54 11 5555-5555",
        "street": "Av. Corrientes",
        "number": "1234",
        "city": "CABA",
        "state": "Buenos Aires",
        "postalCode": "C1043",
        "isDefault": is_default
    }))
    .unwrap()
}

fn coupon(code: &str, percentage: f64) -> AppliedCoupon {
    AppliedCoupon {
        code: code.to_string(),
        discount_type: DiscountType::Percentage,
        discount_value: percentage,
        applied_at: Utc::now(),
    }
}

fn order(user: &str, lines: &[(&str, &str, u32, f64)]) -> Order {
    let items = lines
        .iter()
        .map(|(product, supermarket, qty, price)| {
            OrderItem::new(*product, *product, *supermarket, *qty, *price)
        })
        .collect();
    Order::new(user, "", items, shipping_address(), PaymentMethod::DebitCard)
}

#[tokio::test]
async fn registration_and_lookup() {
    let stores = stores().await;
    let accounts = stores.accounts().unwrap();
    let mut user = User::new("  Ana@Example.com ", "ana");
    user.password = Some("correct horse battery".into());
    let registered = accounts.register(user).await.unwrap();
    assert_eq!(registered.email, "ana@example.com");
    assert!(registered.password.is_none());

    let by_email = accounts.find_by_email_or_username("ANA@example.com").await.unwrap();
    assert_eq!(by_email.unwrap().id, registered.id);
    let by_name = accounts.find_by_email_or_username("ana").await.unwrap();
    assert_eq!(by_name.unwrap().id, registered.id);
    assert!(accounts.find_by_email_or_username("bob").await.unwrap().is_none());

    let err = accounts.register(User::new("ana@example.com", "ana2")).await.unwrap_err();
    assert!(matches!(err, Error::Duplicate { ref field, .. } if field == "email"));

    let logged = accounts.record_login(&registered.id, Utc::now()).await.unwrap();
    assert_eq!(logged.login_count, 1);
    // Credentials are stored even though register hides them.
    assert!(logged.password.is_some());

    accounts.add_favorite(&registered.id, "p1").await.unwrap();
    let twice = accounts.add_favorite(&registered.id, "p1").await.unwrap();
    assert_eq!(twice.favorites.len(), 1);
    assert_eq!(twice.stats.total_favorites, 1);
    let removed = accounts.remove_favorite(&registered.id, "p1").await.unwrap();
    assert!(removed.favorites.is_empty());
}

#[tokio::test]
async fn one_default_address_per_user() {
    let stores = stores().await;
    let accounts = stores.accounts().unwrap();

    let home = accounts.add_address(address("u1", "Casa", false)).await.unwrap();
    assert!(home.is_default);
    let work = accounts.add_address(address("u1", "Oficina", true)).await.unwrap();
    assert!(work.is_default);
    let other = accounts.add_address(address("u1", "Otra", false)).await.unwrap();
    assert!(!other.is_default);

    let listed = accounts.addresses_for("u1").await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].id, work.id);
    assert_eq!(listed.iter().filter(|a| a.is_default).count(), 1);

    accounts.set_default_address(&home.id).await.unwrap();
    let listed = accounts.addresses_for("u1").await.unwrap();
    assert_eq!(listed[0].id, home.id);
    assert_eq!(listed.iter().filter(|a| a.is_default).count(), 1);

    // Another user's first address is their default too.
    let bob = accounts.add_address(address("u2", "Casa", false)).await.unwrap();
    assert!(bob.is_default);
}

#[tokio::test]
async fn rejected_default_address_keeps_the_old_one() {
    let stores = stores().await;
    let accounts = stores.accounts().unwrap();
    let home = accounts.add_address(address("u1", "Casa", true)).await.unwrap();

    let mut blank = address("u1", "Vacia", true);
    blank.street = "   ".into();
    let err = accounts.add_address(blank).await.unwrap_err();
    assert!(matches!(err, Error::Validation { model: "UserAddress", .. }));

    let listed = accounts.addresses_for("u1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, home.id);
    assert!(listed[0].is_default);
}

#[tokio::test]
async fn sessions_open_and_terminate() {
    let stores = stores().await;
    let accounts = stores.accounts().unwrap();
    let device = DeviceInfo {
        device_type: DeviceType::Mobile,
        ..DeviceInfo::default()
    };
    let first = accounts
        .open_session("u1", device.clone(), Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(first.session_token.len(), 32);
    accounts
        .open_session("u1", device, Duration::hours(1))
        .await
        .unwrap();
    accounts
        .open_session("u2", DeviceInfo::default(), Duration::hours(1))
        .await
        .unwrap();

    let found = accounts.session_by_token(&first.session_token).await.unwrap().unwrap();
    assert_eq!(found.device_info.device_type, DeviceType::Mobile);
    assert_eq!(accounts.active_sessions("u1", Utc::now()).await.unwrap().len(), 2);
    // Past their expiry nothing is live.
    let later = Utc::now() + Duration::hours(2);
    assert!(accounts.active_sessions("u1", later).await.unwrap().is_empty());

    let ended = accounts.terminate_session(&first.session_token).await.unwrap();
    assert!(!ended.is_active);
    assert!(ended.terminated_at.is_some());
    assert_eq!(accounts.terminate_all_sessions("u1").await.unwrap(), 1);
    assert_eq!(accounts.terminate_all_sessions("u1").await.unwrap(), 0);
    assert_eq!(accounts.active_sessions("u2", Utc::now()).await.unwrap().len(), 1);

    assert!(matches!(
        accounts.terminate_session("missing").await,
        Err(Error::NotFound { model: "UserSession", .. })
    ));
}

#[tokio::test]
async fn cart_lines_and_coupons() {
    let stores = stores().await;
    let accounts = stores.accounts().unwrap();

    let cart = accounts.cart_for_session("s1", None).await.unwrap();
    assert!(cart.items.is_empty());
    assert!(cart.user_id.is_none());
    let claimed = accounts.cart_for_session("s1", Some("u1")).await.unwrap();
    assert_eq!(claimed.id, cart.id);
    assert_eq!(claimed.user_id.as_deref(), Some("u1"));

    accounts
        .add_to_cart("s1", CartItem::new("leche", "Leche", "dia", 2, 500.0))
        .await
        .unwrap();
    accounts
        .add_to_cart("s1", CartItem::new("pan", "Pan", "vea", 1, 250.0))
        .await
        .unwrap();
    let cart = accounts
        .add_to_cart("s1", CartItem::new("leche", "Leche", "dia", 1, 500.0))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 2);
    assert_eq!(cart.item_count(), 4);
    assert_eq!(cart.subtotal, 1750.0);

    let cart = accounts.update_cart_item("s1", "pan", 4).await.unwrap();
    assert_eq!(cart.subtotal, 2500.0);
    assert!(matches!(
        accounts.update_cart_item("s1", "arroz", 1).await,
        Err(Error::NotFound { model: "CartItem", .. })
    ));

    let cart = accounts.apply_coupon("s1", coupon("save10", 10.0)).await.unwrap();
    assert_eq!(cart.applied_coupons[0].code, "SAVE10");
    assert_eq!(cart.discount, 250.0);
    assert_eq!(cart.total, 2250.0);
    let err = accounts.apply_coupon("s1", coupon("SAVE10", 5.0)).await.unwrap_err();
    assert_eq!(err.to_string(), "Coupon already applied");
    assert_eq!(err.status_code(), 400);

    let cart = accounts.remove_from_cart("s1", "pan").await.unwrap();
    assert_eq!(cart.subtotal, 1500.0);
    assert_eq!(cart.discount, 150.0);
    let cart = accounts.remove_coupon("s1", "save10").await.unwrap();
    assert_eq!(cart.discount, 0.0);

    let cart = accounts.clear_cart("s1").await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.total, 0.0);
}

#[tokio::test]
async fn checkout_turns_cart_into_order() {
    let stores = stores().await;
    let accounts = stores.accounts().unwrap();
    let orders = stores.orders().unwrap();

    accounts
        .add_to_cart("s1", CartItem::new("leche", "Leche", "dia", 3, 500.0))
        .await
        .unwrap();
    accounts.apply_coupon("s1", coupon("save10", 10.0)).await.unwrap();

    let placed = orders
        .place_from_cart(&accounts, "s1", "u1", shipping_address(), PaymentMethod::CreditCard)
        .await
        .unwrap();
    assert!(placed.order_number.starts_with("ORD-"));
    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].total_price, 1500.0);
    assert_eq!(placed.discount, 150.0);
    assert_eq!(placed.total, 1350.0);
    assert_eq!(orders.by_number(&placed.order_number).await.unwrap().id, placed.id);

    let cart = accounts.cart_for_session("s1", None).await.unwrap();
    assert!(cart.items.is_empty());
    assert!(cart.applied_coupons.is_empty());

    let err = orders
        .place_from_cart(&accounts, "s1", "u1", shipping_address(), PaymentMethod::CreditCard)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(ref msg) if msg == "Cart is empty"));
}

async fn seeded_orders(orders: &OrderStore) -> Vec<String> {
    let mut ids = Vec::new();
    for o in [
        order("u1", &[("leche", "dia", 2, 500.0)]),
        order("u1", &[("pan", "vea", 1, 300.0)]),
        order("u2", &[("pan", "vea", 1, 300.0), ("yerba", "dia", 1, 1200.0)]),
    ] {
        ids.push(orders.place(o).await.unwrap().id);
    }
    ids
}

#[tokio::test]
async fn order_listing_filters() {
    let stores = stores().await;
    let orders = stores.orders().unwrap();
    let ids = seeded_orders(&orders).await;
    orders.update_status(&ids[2], OrderStatus::Shipped).await.unwrap();

    let params = ListParams::default();
    let by_user = OrderFilter {
        user_id: Some("u1".into()),
        ..OrderFilter::default()
    };
    assert_eq!(orders.list(&by_user, &params).await.unwrap().pagination.total, 2);

    let by_chain = OrderFilter {
        supermarket_id: Some("dia".into()),
        ..OrderFilter::default()
    };
    let page = orders.list(&by_chain, &params).await.unwrap();
    let mut found: Vec<_> = page.items.iter().map(|o| o.id.clone()).collect();
    found.sort();
    let mut expected = vec![ids[0].clone(), ids[2].clone()];
    expected.sort();
    assert_eq!(found, expected);

    let shipped_dia = OrderFilter {
        status: Some(OrderStatus::Shipped),
        supermarket_id: Some("dia".into()),
        ..OrderFilter::default()
    };
    assert_eq!(orders.list(&shipped_dia, &params).await.unwrap().pagination.total, 1);

    let future = OrderFilter {
        from: Some(Utc::now() + Duration::days(1)),
        ..OrderFilter::default()
    };
    assert_eq!(orders.list(&future, &params).await.unwrap().pagination.total, 0);

    assert_eq!(orders.orders_for_user("u1", Some(1)).await.unwrap().len(), 1);
    assert_eq!(orders.orders_for_user("u2", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn status_changes_and_cancellation() {
    let stores = stores().await;
    let orders = stores.orders().unwrap();
    let ids = seeded_orders(&orders).await;

    let change = orders.update_status(&ids[0], OrderStatus::Confirmed).await.unwrap();
    assert_eq!(change.previous, OrderStatus::Pending);
    assert!(change.order.confirmed_at.is_some());
    let change = orders.update_status(&ids[0], OrderStatus::Delivered).await.unwrap();
    assert_eq!(change.previous, OrderStatus::Confirmed);
    assert!(change.order.delivered_at.is_some());

    let err = orders.cancel(&ids[0], Some("changed my mind")).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot cancel an order that is delivered");

    let cancelled = orders.cancel(&ids[1], Some("out of stock")).await.unwrap();
    assert_eq!(cancelled.previous, OrderStatus::Pending);
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.order.cancellation_reason.as_deref(), Some("out of stock"));
    assert!(orders.cancel(&ids[1], None).await.is_err());

    let tracked = orders.set_tracking_number(&ids[2], "AR123").await.unwrap();
    assert_eq!(tracked.tracking_number.as_deref(), Some("AR123"));

    let stats = orders.stats(&OrderFilter::default()).await.unwrap();
    assert_eq!(stats.total_orders, 3);
    assert_eq!(stats.total_revenue, 2800.0);
    assert_eq!(stats.average_order_value, 933.33);
    assert_eq!(stats.status_breakdown["delivered"], 1);
    assert_eq!(stats.status_breakdown["cancelled"], 1);
    assert_eq!(stats.status_breakdown["pending"], 1);

    let u2 = orders
        .stats(&OrderFilter {
            user_id: Some("u2".into()),
            ..OrderFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(u2.total_orders, 1);
    assert_eq!(u2.total_revenue, 1500.0);
}

#[tokio::test]
async fn accounts_fall_back_without_admin_database() {
    let cfg = Config::new("./data").with_database("operations", DatabaseConfig::new(MEMORY_URL));
    let registry = ConnectionRegistry::open_all(&cfg).await.unwrap();
    let binder = ModelBinder::new(Arc::new(registry));
    // Unconfigured admin falls back to the default connection.
    let accounts = AccountStore::bind(&binder).unwrap();
    assert_eq!(accounts.users.collection().database().name(), "default");
}
