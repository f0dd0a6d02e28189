use caminando::config::{Config, DatabaseConfig, MEMORY_URL};
use caminando::db::{ConnectionRegistry, ListParams, ModelBinder, Query, Sort};
use caminando::schema::catalog::{
    Category, Filter, FilterType, Offer, OfferType, PriceHistory, Product, ProductType,
    Subcategory, SupermarketInfo,
};
use caminando::store::stats::{
    category_stats, filter_stats, offer_stats, price_stats, supermarket_info_stats,
};
use caminando::store::{CatalogStore, ScrapeKind};
use caminando::Error;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

async fn catalog_store() -> CatalogStore {
    let cfg = Config::new("./data")
        .with_database("processed", DatabaseConfig::new(MEMORY_URL))
        .with_database("dia", DatabaseConfig::new(MEMORY_URL))
        .with_database("vea", DatabaseConfig::new(MEMORY_URL));
    let registry = ConnectionRegistry::open_all(&cfg).await.unwrap();
    CatalogStore::new(Arc::new(ModelBinder::new(Arc::new(registry))))
}

fn subcategory(name: &str, category: &str, priority: i64) -> Subcategory {
    let mut sub = Subcategory::new(name, category);
    sub.priority = priority;
    sub
}

#[tokio::test]
async fn sync_subcategories_collects_children_by_priority() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();

    let lacteos = dia.categories.create(Category::new("Lacteos")).await.unwrap();
    assert_eq!(lacteos.slug, "lacteos");
    let lacteos = dia
        .categories
        .update(&lacteos.id, json!({ "displayName": "Lácteos y Huevos" }))
        .await
        .unwrap();
    assert_eq!(lacteos.url, "/productos/lacteos");

    let yogures = dia.subcategories.create(subcategory("Yogures", "lacteos", 1)).await.unwrap();
    let leches = dia.subcategories.create(subcategory("Leches", "lacteos", 5)).await.unwrap();
    dia.subcategories.create(subcategory("Aguas", "bebidas", 9)).await.unwrap();

    let synced = dia.sync_subcategories(&lacteos.id).await.unwrap();
    assert_eq!(synced.subcategories, vec![leches.id.clone(), yogures.id.clone()]);
    assert_eq!(synced.metadata.subcategory_count, 2);
    assert!(synced.metadata.last_updated.is_some());

    let children = dia.subcategories_of("lacteos").await.unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].url, "/productos/lacteos/leches");

    // The raw catalog of another chain is a separate database.
    let vea = store.raw("VEA").unwrap();
    assert_eq!(vea.categories.count(&Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicates_surface_with_their_field() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    dia.subcategories.create(subcategory("Leches", "lacteos", 0)).await.unwrap();
    let err = dia
        .subcategories
        .create(subcategory("Leches", "almacen", 0))
        .await
        .unwrap_err();
    match err {
        Error::Duplicate { model, ref field } => {
            assert_eq!(model, "Subcategory");
            assert_eq!(field, "slug");
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut a = Product::new("Leche Entera", 1000.0);
    a.ean = Some("7790001000011".into());
    let mut b = Product::new("Leche Descremada", 990.0);
    b.ean = Some("7790001000011".into());
    let err = dia.products.bulk_create(vec![a, b]).await.unwrap_err();
    assert_eq!(err.to_string(), "Product with this ean already exists");
    assert_eq!(err.status_code(), 409);
    // bulk_create is all-or-nothing.
    assert_eq!(dia.products.count(&Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn product_types_and_products_sync() {
    let store = catalog_store().await;
    let processed = store.processed().unwrap();

    let mut hidden = ProductType::new("Yogur Firme", "lacteos", "yogures");
    hidden.active = false;
    processed.product_types.create(hidden).await.unwrap();
    let mut bebible = ProductType::new("Yogur Bebible", "lacteos", "yogures");
    bebible.priority = 3;
    let bebible = processed.product_types.create(bebible).await.unwrap();
    processed
        .product_types
        .create(ProductType::new("Manteca", "lacteos", "mantecas"))
        .await
        .unwrap();

    let types = processed
        .product_types_by_category("lacteos", None)
        .await
        .unwrap();
    assert_eq!(types.len(), 2);
    assert_eq!(types[0].slug, "yogur-bebible");
    let types = processed
        .product_types_by_category("lacteos", Some("yogures"))
        .await
        .unwrap();
    assert_eq!(types.len(), 1);

    let mut frutilla = Product::new("Yogur Frutilla", 800.0);
    frutilla.product_type = Some("yogur-bebible".into());
    let frutilla = processed.products.create(frutilla).await.unwrap();
    let mut vainilla = Product::new("Yogur Vainilla", 820.0);
    vainilla.product_type = Some(bebible.id.clone());
    processed.products.create(vainilla).await.unwrap();
    processed.products.create(Product::new("Pan", 500.0)).await.unwrap();

    let synced = processed.sync_products(&bebible.id).await.unwrap();
    assert_eq!(synced.products.len(), 2);
    assert!(synced.products.contains(&frutilla.id));
    assert_eq!(synced.metadata.product_count, 2);

    let by_slug = processed.product_types.get_by_slug("yogur-bebible").await.unwrap();
    assert_eq!(by_slug.id, bebible.id);
    assert!(matches!(
        processed.product_types.get_by_slug("yogur-firme").await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn listing_searches_filters_and_pages() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    let mut items = Vec::new();
    for i in 0..25i32 {
        let mut p = Product::new(format!("Galletitas {i:02}"), 100.0 + f64::from(i));
        p.category = Some(if i % 5 == 0 { "almacen" } else { "snacks" }.to_string());
        p.featured = i % 2 == 0;
        items.push(p);
    }
    items.push(Product::new("Leche Entera", 1000.0));
    dia.products.bulk_create(items).await.unwrap();

    let page = dia
        .products
        .list(&ListParams {
            search: Some("GALLE".into()),
            limit: Some(10),
            page: Some(3),
            sort: Some("price".into()),
            ..ListParams::default()
        })
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 25);
    assert_eq!(page.pagination.pages, 3);
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.items[0].name, "Galletitas 20");

    let params = ListParams {
        featured: Some(true),
        ..ListParams::default()
    }
    .with_filter("category", "almacen");
    let page = dia.products.list(&params).await.unwrap();
    // 0, 10 and 20 are both featured and in "almacen".
    assert_eq!(page.pagination.total, 3);

    let bad = ListParams {
        sort: Some("price desc".into()),
        ..ListParams::default()
    };
    assert!(matches!(dia.products.list(&bad).await, Err(Error::InvalidQuery(_))));
}

#[tokio::test]
async fn soft_delete_and_toggle() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    let cat = dia.categories.create(Category::new("Bebidas")).await.unwrap();

    let off = dia.categories.deactivate(&cat.id).await.unwrap();
    assert!(!off.active);
    let on = dia.categories.toggle_active(&cat.id).await.unwrap();
    assert!(on.active);
    assert_eq!(on.created_at, cat.created_at);

    let removed = dia.categories.delete(&cat.id).await.unwrap();
    assert_eq!(removed.id, cat.id);
    assert!(matches!(
        dia.categories.get(&cat.id).await,
        Err(Error::NotFound { model: "Category", .. })
    ));
}

#[tokio::test]
async fn offers_in_window() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    let now = Utc::now();
    let running = (now - Duration::days(1), now + Duration::days(1));

    let mut current = Offer::new("2x1 Lácteos", OfferType::BuyGet, "dia", running.0, running.1);
    current.priority = 2;
    current.applicable_categories = vec!["lacteos".into()];
    current.coupon_code = Some(" lacteos2x1 ".into());
    let current = dia.offers.create_with_id("dia-2x1", current).await.unwrap();
    assert_eq!(current.coupon_code.as_deref(), Some("LACTEOS2X1"));

    let expired = Offer::new(
        "Viejo",
        OfferType::Percentage,
        "dia",
        now - Duration::days(10),
        now - Duration::days(5),
    );
    dia.offers.create(expired).await.unwrap();
    let mut exhausted = Offer::new("Agotado", OfferType::Fixed, "dia", running.0, running.1);
    exhausted.usage_limit = Some(5);
    exhausted.current_usage = 5;
    dia.offers.create(exhausted).await.unwrap();

    let active = dia.active_offers(now).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "dia-2x1");
    assert_eq!(dia.offers_by_supermarket("dia").await.unwrap().len(), 3);

    let mut leche = Product::new("Leche", 1000.0);
    leche.category = Some("lacteos".into());
    let leche = dia.products.create(leche).await.unwrap();
    assert_eq!(dia.offers_for_product(&leche, now).await.unwrap().len(), 1);
    let pan = dia.products.create(Product::new("Pan", 500.0)).await.unwrap();
    assert!(dia.offers_for_product(&pan, now).await.unwrap().is_empty());

    let stats = offer_stats(&dia.offers).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 3);
    assert_eq!(stats.total_usage, 5);
    assert_eq!(stats.by_type["buy_get"], 1);
}

#[tokio::test]
async fn filters_by_category() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    let mut marca = Filter::new("marca", "Marca", "almacen");
    marca.applicable_categories = vec!["lacteos".into()];
    dia.filters.create(marca).await.unwrap();
    let mut precio = Filter::new("precio", "Precio", "bebidas");
    precio.filter_type = FilterType::Range;
    dia.filters.create(precio).await.unwrap();
    let mut old = Filter::new("envase", "Envase", "limpieza");
    old.active = false;
    dia.filters.create(old).await.unwrap();

    assert_eq!(dia.filter_categories().await.unwrap(), vec!["almacen", "bebidas"]);
    let lacteos = dia.filters_for_category("lacteos").await.unwrap();
    assert_eq!(lacteos.len(), 1);
    assert_eq!(lacteos[0].name, "marca");

    let stats = filter_stats(&dia.filters).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.categories, 3);
    assert_eq!(stats.by_type["multiselect"], 2);
    assert_eq!(stats.by_type["range"], 1);
}

#[tokio::test]
async fn price_history_and_stats() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    let now = Utc::now();
    let history = [
        (40, 1500.0),
        (20, 1300.0),
        (10, 1250.0),
        (1, 1199.99),
    ]
    .into_iter()
    .map(|(days, price)| PriceHistory::new("p1", "dia", "Aceite", price, now - Duration::days(days)))
    .collect();
    dia.price_history.bulk_create(history).await.unwrap();
    dia.price_history
        .create(PriceHistory::new("p1", "vea", "Aceite", 900.0, now))
        .await
        .unwrap();

    let latest = dia.latest_price("p1", Some("dia")).await.unwrap().unwrap();
    assert_eq!(latest.price, 1199.99);
    assert_eq!(dia.latest_price("p1", None).await.unwrap().unwrap().price, 900.0);
    assert!(dia.latest_price("nope", None).await.unwrap().is_none());

    let recent = dia.price_history_for("p1", Some("dia"), Some(2)).await.unwrap();
    assert_eq!(recent.iter().map(|p| p.price).collect::<Vec<_>>(), vec![1199.99, 1250.0]);
    assert_eq!(dia.price_history_for("p1", None, None).await.unwrap().len(), 5);

    let stats = price_stats(&dia.price_history, "p1", Some("dia"), now).await.unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.min, Some(1199.99));
    assert_eq!(stats.max, Some(1300.0));
    assert_eq!(stats.avg, Some(1250.0));
    assert_eq!(stats.first, Some(1300.0));
    assert_eq!(stats.latest, Some(1199.99));
    assert_eq!(stats.change(), Some(-100.01));

    let empty = price_stats(&dia.price_history, "nope", None, now).await.unwrap();
    assert_eq!(empty.count, 0);
    assert_eq!(empty.min, None);
}

#[tokio::test]
async fn supermarket_profile_and_stats() {
    let store = catalog_store().await;
    let info = store.supermarket_info("dia").unwrap();
    let mut profile = SupermarketInfo::new("DIA", "Supermercados DIA");
    profile.pwa.enabled = true;
    profile.platform = Some("vtex".into());
    info.create(profile).await.unwrap();

    let touched = store
        .touch_last_scraped("Dia", ScrapeKind::Homepage, Utc::now())
        .await
        .unwrap();
    assert!(touched.last_homepage_scraped.is_some());
    assert!(touched.last_scraped.is_none());
    assert!(matches!(
        store.touch_last_scraped("vea", ScrapeKind::Products, Utc::now()).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        store.touch_last_scraped("walmart", ScrapeKind::Products, Utc::now()).await,
        Err(Error::InvalidSupermarket(_))
    ));

    let stats = supermarket_info_stats(&info).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.with_pwa, 1);
    assert_eq!(stats.with_regionalization, 0);
    assert_eq!(stats.by_platform["vtex"], 1);

    let (ok, failed) = store.raw_catalogs();
    assert_eq!(ok.len(), 5);
    assert!(failed.is_empty());
}

#[tokio::test]
async fn category_counts() {
    let store = catalog_store().await;
    let processed = store.processed().unwrap();
    let mut almacen = Category::new("Almacen");
    almacen.featured = true;
    almacen.subcategories = vec!["a".into(), "b".into()];
    processed.categories.create(almacen).await.unwrap();
    let mut limpieza = Category::new("Limpieza");
    limpieza.active = false;
    limpieza.subcategories = vec!["c".into()];
    processed.categories.create(limpieza).await.unwrap();

    let stats = category_stats(&processed.categories).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.featured, 1);
    assert_eq!(stats.total_subcategories, 3);
}

#[tokio::test]
async fn timestamps_sort_chronologically_across_precisions() {
    let store = catalog_store().await;
    let dia = store.raw("dia").unwrap();
    let stored = [
        ("whole", "2024-05-01T10:00:00Z"),
        ("half", "2024-05-01T10:00:00.500Z"),
        ("early", "2024-05-01T09:59:59.999999999Z"),
    ];
    for (id, at) in stored {
        let doc = json!({ "_id": id, "name": id, "createdAt": at, "updatedAt": at });
        dia.categories.collection().insert(id, &doc).await.unwrap();
    }

    let newest_first = dia
        .categories
        .find(&Query::new().sort(Sort::desc("createdAt")))
        .await
        .unwrap();
    let ids: Vec<_> = newest_first.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["half", "whole", "early"]);

    let by_name = dia
        .categories
        .find(&Query::new().sort(Sort::asc("name")))
        .await
        .unwrap();
    let names: Vec<_> = by_name.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["early", "half", "whole"]);
}
