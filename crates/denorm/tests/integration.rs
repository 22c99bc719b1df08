//! Integration tests: registration → sync_all → notifications against the in-memory store.

use denorm::{
    DenormEngine, DenormError, EngineConfig, Operation, ReferenceConfig, WriteOutcome,
};
use document_store::{
    Document, DocumentId, DocumentStore, DocumentStoreExt, Filter, InMemoryDocumentStore,
    StoreError, WriteStatement,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn name_only(doc: &Document) -> Value {
    json!({ "name": doc.get("name") })
}

async fn seed(store: &InMemoryDocumentStore) {
    store
        .insert_many(
            "Category",
            vec![
                Document::new(1)
                    .with_field("name", "category1")
                    .with_field("productIds", json!([1])),
                Document::new(2)
                    .with_field("name", "category2")
                    .with_field("productIds", json!([2])),
                Document::new(3).with_field("name", "category3"),
                Document::new(4)
                    .with_field("name", "category4")
                    .with_field("productIds", json!([3, 4])),
            ],
        )
        .await
        .unwrap();

    store
        .insert_many(
            "Product",
            vec![
                Document::new(1)
                    .with_field("name", "product1")
                    .with_field("categoryId", 1),
                Document::new(2)
                    .with_field("name", "product2")
                    .with_field("categoryId", 2),
                Document::new(3)
                    .with_field("name", "product3")
                    .with_field("categoryId", 4),
                Document::new(4)
                    .with_field("name", "product4")
                    .with_field("categoryId", 4),
            ],
        )
        .await
        .unwrap();
}

fn engine_with(store: &InMemoryDocumentStore, config: EngineConfig) -> DenormEngine<InMemoryDocumentStore> {
    let mut engine = DenormEngine::with_config(store.clone(), config);
    engine
        .register(ReferenceConfig::new("Product", "Category").extractor(name_only))
        .unwrap();
    engine
        .register(
            ReferenceConfig::new("Category", "Product")
                .many()
                .extractor(name_only),
        )
        .unwrap();
    engine
}

/// Seeds both collections, registers both references and runs a full sync.
async fn setup() -> (InMemoryDocumentStore, DenormEngine<InMemoryDocumentStore>) {
    init_tracing();
    let store = InMemoryDocumentStore::new();
    seed(&store).await;
    let engine = engine_with(&store, EngineConfig::default());
    engine.sync_all(None).await.unwrap();
    store.reset_counters();
    (store, engine)
}

async fn get(store: &InMemoryDocumentStore, collection: &str, id: impl Into<DocumentId>) -> Document {
    let id = id.into();
    store
        .find_one(collection, id.clone())
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{collection}#{id} should exist"))
}

#[tokio::test]
async fn test_sync_populates_one_reference() {
    let (store, _engine) = setup().await;

    let product = get(&store, "Product", 1).await;
    assert_eq!(product.get("_category"), Some(&json!({"name": "category1"})));

    for id in [3, 4] {
        let product = get(&store, "Product", id).await;
        assert_eq!(product.get("_category"), Some(&json!({"name": "category4"})));
    }
}

#[tokio::test]
async fn test_sync_populates_many_reference() {
    let (store, _engine) = setup().await;

    let category = get(&store, "Category", 4).await;
    assert_eq!(
        category.get("_products"),
        Some(&json!({"3": {"name": "product3"}, "4": {"name": "product4"}}))
    );

    let category = get(&store, "Category", 1).await;
    assert_eq!(category.get("_products"), Some(&json!({"1": {"name": "product1"}})));

    let without_refs = get(&store, "Category", 3).await;
    assert_eq!(without_refs.get("_products"), None);
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let (store, engine) = setup().await;
    let products = store.all("Product").await;
    let categories = store.all("Category").await;

    let reports = engine.sync_all(None).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(store.all("Product").await, products);
    assert_eq!(store.all("Category").await, categories);
}

#[tokio::test]
async fn test_update_propagates_to_one_references() {
    let (store, engine) = setup().await;
    let untouched = vec![get(&store, "Product", 1).await, get(&store, "Product", 2).await];

    store
        .update(
            "Category",
            WriteStatement::update_one(Filter::id(4)).set("name", json!("category 4 updated")),
        )
        .await
        .unwrap();
    let outcomes = engine.notify_update("Category", Filter::id(4)).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].modified(), 2);
    for id in [3, 4] {
        let product = get(&store, "Product", id).await;
        assert_eq!(
            product.get("_category"),
            Some(&json!({"name": "category 4 updated"}))
        );
    }
    assert_eq!(
        vec![get(&store, "Product", 1).await, get(&store, "Product", 2).await],
        untouched
    );
}

#[tokio::test]
async fn test_update_propagates_to_many_references() {
    let (store, engine) = setup().await;
    let untouched = get(&store, "Category", 1).await;

    store
        .update(
            "Product",
            WriteStatement::update_many(Filter::ids([3, 4]))
                .set("name", json!("update product name")),
        )
        .await
        .unwrap();
    engine
        .notify_update("Product", Filter::ids([3, 4]))
        .await
        .unwrap();

    let category = get(&store, "Category", 4).await;
    assert_eq!(
        category.get("_products"),
        Some(&json!({
            "3": {"name": "update product name"},
            "4": {"name": "update product name"}
        }))
    );
    assert_eq!(get(&store, "Category", 1).await, untouched);
}

#[tokio::test]
async fn test_remove_clears_one_references() {
    let (store, engine) = setup().await;
    let untouched = get(&store, "Product", 1).await;

    engine.notify_remove("Category", Filter::id(4)).await.unwrap();
    store.delete_many("Category", &Filter::id(4)).await.unwrap();

    for id in [3, 4] {
        let product = get(&store, "Product", id).await;
        assert_eq!(product.get("_category"), None);
        assert_eq!(product.get("categoryId"), None);
        assert_eq!(product.get("name"), Some(&json!(format!("product{id}"))));
    }
    assert_eq!(get(&store, "Product", 1).await, untouched);
}

#[tokio::test]
async fn test_remove_pulls_many_references() {
    let (store, engine) = setup().await;
    let untouched = get(&store, "Category", 1).await;

    engine.notify_remove("Product", Filter::id(3)).await.unwrap();
    store.delete_many("Product", &Filter::id(3)).await.unwrap();

    let category = get(&store, "Category", 4).await;
    assert_eq!(category.get("productIds"), Some(&json!([4])));
    assert_eq!(
        category.get("_products"),
        Some(&json!({"4": {"name": "product4"}}))
    );
    assert_eq!(get(&store, "Category", 1).await, untouched);

    // A later full sync must not resurrect the removed product.
    engine.sync_all(None).await.unwrap();
    let category = get(&store, "Category", 4).await;
    assert_eq!(
        category.get("_products"),
        Some(&json!({"4": {"name": "product4"}}))
    );
}

#[tokio::test]
async fn test_notifications_that_match_nothing_are_noops() {
    let (store, engine) = setup().await;

    let outcomes = engine.notify_update("Category", Filter::id(99)).await.unwrap();
    assert_eq!(outcomes, vec![WriteOutcome::NoOp]);

    let outcomes = engine.notify_remove("Category", Filter::id(99)).await.unwrap();
    assert_eq!(outcomes, vec![WriteOutcome::NoOp]);

    let outcomes = engine.notify_update("Brand", Filter::id(1)).await.unwrap();
    assert!(outcomes.is_empty());

    assert_eq!(store.bulk_write_count(), 0);
}

#[tokio::test]
async fn test_store_failure_surfaces() {
    let (store, engine) = setup().await;
    store.set_fail_on_bulk_write(true);

    let result = engine.notify_update("Category", Filter::id(4)).await;
    assert!(matches!(
        result,
        Err(DenormError::Store(StoreError::BulkWrite { index: 0, .. }))
    ));

    let result = engine.sync_all(None).await;
    assert!(matches!(result, Err(DenormError::Store(_))));
}

#[tokio::test]
async fn test_streamed_sync_uses_bounded_batches() {
    init_tracing();
    let store = InMemoryDocumentStore::new();
    seed(&store).await;
    let engine = engine_with(&store, EngineConfig::default().with_batch_size(3));

    let report = engine.sync_collection("Product").await.unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(report.documents_scanned, 4);
    assert_eq!(report.documents_written, 4);
    // One destination lookup and one bulk write per batch.
    assert_eq!(store.find_count(), 2);
    assert_eq!(store.bulk_write_count(), 2);

    let product = get(&store, "Product", 4).await;
    assert_eq!(product.get("_category"), Some(&json!({"name": "category4"})));
}

#[tokio::test]
async fn test_sync_of_explicit_documents_and_subset() {
    init_tracing();
    let store = InMemoryDocumentStore::new();
    seed(&store).await;
    let engine = engine_with(&store, EngineConfig::default());

    let products = store.find("Product", &Filter::ids([1, 2])).await.unwrap();
    let report = engine
        .sync("Product", products, Some(&["categoryId"][..]))
        .await
        .unwrap();

    assert_eq!(report.documents_written, 2);
    assert!(get(&store, "Product", 1).await.get("_category").is_some());
    assert!(get(&store, "Product", 3).await.get("_category").is_none());

    let err = engine
        .sync("Product", Vec::<Document>::new(), Some(&["brandId"][..]))
        .await
        .unwrap_err();
    assert!(matches!(err, DenormError::UnknownReference { .. }));
}

#[tokio::test]
async fn test_insert_fills_cache_of_new_sources() {
    let (store, engine) = setup().await;

    let product = Document::new(5)
        .with_field("name", "product5")
        .with_field("categoryId", 2);
    store.insert_one("Product", product.clone()).await.unwrap();
    engine.notify_insert("Product", vec![product]).await.unwrap();

    let product = get(&store, "Product", 5).await;
    assert_eq!(product.get("_category"), Some(&json!({"name": "category2"})));

    let category = Document::new(5)
        .with_field("name", "category5")
        .with_field("productIds", json!([1, 5]));
    store.insert_one("Category", category.clone()).await.unwrap();
    engine.notify_insert("Category", vec![category]).await.unwrap();

    let category = get(&store, "Category", 5).await;
    assert_eq!(
        category.get("_products"),
        Some(&json!({"1": {"name": "product1"}, "5": {"name": "product5"}}))
    );
}

#[tokio::test]
async fn test_sync_on_limits_propagation() {
    init_tracing();
    let store = InMemoryDocumentStore::new();
    seed(&store).await;

    let mut engine = DenormEngine::new(store.clone());
    engine
        .register(
            ReferenceConfig::new("Product", "Category")
                .extractor(name_only)
                .sync_on([Operation::Update]),
        )
        .unwrap();
    engine.sync_all(None).await.unwrap();

    let outcomes = engine.notify_remove("Category", Filter::id(4)).await.unwrap();
    assert!(outcomes.is_empty());
    assert_eq!(get(&store, "Product", 3).await.get("categoryId"), Some(&json!(4)));
}

#[tokio::test]
async fn test_engines_are_independent() {
    let (store, engine) = setup().await;
    let other = DenormEngine::new(store.clone());

    let outcomes = other.notify_update("Category", Filter::id(4)).await.unwrap();
    assert!(outcomes.is_empty());
    assert!(other.registry().is_empty());
    assert_eq!(engine.registry().len(), 2);
    assert_eq!(store.bulk_write_count(), 0);
}

/// One category and one product sharing the string id `id`, each
/// referencing the other.
async fn string_id_setup(id: &str) -> (InMemoryDocumentStore, DenormEngine<InMemoryDocumentStore>) {
    init_tracing();
    let store = InMemoryDocumentStore::new();
    store
        .insert_one(
            "Category",
            Document::new(id)
                .with_field("name", format!("category {id}"))
                .with_field("productIds", json!([id])),
        )
        .await
        .unwrap();
    store
        .insert_one(
            "Product",
            Document::new(id)
                .with_field("name", format!("product {id}"))
                .with_field("categoryId", id),
        )
        .await
        .unwrap();
    let engine = engine_with(&store, EngineConfig::default());
    engine.sync_all(None).await.unwrap();
    (store, engine)
}

#[tokio::test]
async fn test_string_ids_propagate_verbatim() {
    let ids = [
        "d41d8cd98f00b204e9800998ecf8427e",
        "3F2504E0-4F89-11D3-9A0C-0305E82C3301",
        "sku-1",
    ];

    for id in ids {
        let (store, engine) = string_id_setup(id).await;
        assert_eq!(
            get(&store, "Product", id).await.get("_category"),
            Some(&json!({"name": format!("category {id}")}))
        );
        assert_eq!(
            get(&store, "Category", id).await.get("_products"),
            Some(&json!({ id: {"name": format!("product {id}")} }))
        );

        store
            .update(
                "Category",
                WriteStatement::update_one(Filter::id(id)).set("name", json!("renamed category")),
            )
            .await
            .unwrap();
        let outcomes = engine.notify_update("Category", Filter::id(id)).await.unwrap();
        assert_eq!(outcomes[0].modified(), 1, "update of category {id}");
        assert_eq!(
            get(&store, "Product", id).await.get("_category"),
            Some(&json!({"name": "renamed category"}))
        );

        store
            .update(
                "Product",
                WriteStatement::update_one(Filter::id(id)).set("name", json!("renamed product")),
            )
            .await
            .unwrap();
        let outcomes = engine.notify_update("Product", Filter::id(id)).await.unwrap();
        assert_eq!(outcomes[0].modified(), 1, "update of product {id}");
        assert_eq!(
            get(&store, "Category", id).await.get("_products"),
            Some(&json!({ id: {"name": "renamed product"} }))
        );

        let outcomes = engine.notify_remove("Category", Filter::id(id)).await.unwrap();
        assert_eq!(outcomes[0].modified(), 1, "removal of category {id}");
        let product = get(&store, "Product", id).await;
        assert_eq!(product.get("_category"), None);
        assert_eq!(product.get("categoryId"), None);

        let outcomes = engine.notify_remove("Product", Filter::id(id)).await.unwrap();
        assert_eq!(outcomes[0].modified(), 1, "removal of product {id}");
        let category = get(&store, "Category", id).await;
        assert_eq!(category.get("productIds"), Some(&json!([])));
        assert_eq!(category.get("_products"), Some(&json!({})));
    }
}

#[tokio::test]
async fn test_dotted_ids_stay_single_cache_keys() {
    let (store, engine) = string_id_setup("sku.1").await;
    let key = DocumentId::from("sku.1").as_key();

    let category = get(&store, "Category", "sku.1").await;
    assert_eq!(
        category.get("_products"),
        Some(&json!({ key.clone(): {"name": "product sku.1"} }))
    );

    store
        .update(
            "Product",
            WriteStatement::update_one(Filter::id("sku.1")).set("name", json!("renamed product")),
        )
        .await
        .unwrap();
    engine.notify_update("Product", Filter::id("sku.1")).await.unwrap();
    let category = get(&store, "Category", "sku.1").await;
    assert_eq!(
        category.get("_products"),
        Some(&json!({ key.clone(): {"name": "renamed product"} }))
    );

    // A resync yields the same shape as the propagated update.
    engine.sync_all(None).await.unwrap();
    assert_eq!(get(&store, "Category", "sku.1").await, category);

    engine.notify_remove("Product", Filter::id("sku.1")).await.unwrap();
    let category = get(&store, "Category", "sku.1").await;
    assert_eq!(category.get("productIds"), Some(&json!([])));
    assert_eq!(category.get("_products"), Some(&json!({})));
}
