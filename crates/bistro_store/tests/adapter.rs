//! End-to-end tests of the engine through the async adapter.

use bistro_storage::{FileLog, InMemoryLog};
use bistro_store::{
    CursorDirection, Database, Engine, EngineConfig, ErrorCode, Key, KeyRange, StoreParams,
    TransactionMode,
};
use serde_json::{json, Value};

async fn open_reviews(engine: &Engine) -> Database {
    Database::open(engine, "restaurant-db", 1, |vc| {
        vc.create_object_store("reviews", StoreParams::key_path("id"))?;
        vc.create_index("reviews", "restaurant_id", "restaurant_id", false)?;
        vc.create_object_store("offline-queue", StoreParams::key_path("queue_key").auto_increment())?;
        vc.create_index("offline-queue", "restaurant_id", "restaurant_id", false)
    })
    .await
    .unwrap()
}

async fn seed(db: &Database) {
    let tx = db.transaction(&["reviews"], TransactionMode::ReadWrite);
    let store = tx.object_store("reviews");
    for (id, restaurant) in [(3, 1), (1, 2), (2, 1), (4, 3)] {
        store
            .put(json!({"id": id, "restaurant_id": restaurant, "rating": 4}))
            .await
            .unwrap();
    }
    drop(store);
    tx.complete().await.unwrap();
}

fn ids(values: &[Value]) -> Vec<i64> {
    values.iter().map(|v| v["id"].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn cursor_walks_store_in_key_order() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;
    seed(&db).await;

    let tx = db.transaction(&["reviews"], TransactionMode::ReadOnly);
    let store = tx.object_store("reviews");
    let mut seen = Vec::new();
    let mut cursor = store.open_cursor(KeyRange::all(), CursorDirection::Next).await.unwrap();
    while let Some(c) = cursor {
        seen.push(c.primary_key().as_i64().unwrap());
        cursor = c.advance().await.unwrap();
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);

    let reversed = store
        .open_cursor(KeyRange::all(), CursorDirection::Prev)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reversed.primary_key(), &Key::from(4i64));
}

#[tokio::test]
async fn get_all_honours_limit_and_index_order() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;
    seed(&db).await;

    let tx = db.transaction(&["reviews"], TransactionMode::ReadOnly);
    let store = tx.object_store("reviews");
    assert_eq!(ids(&store.get_all(KeyRange::all(), Some(2)).await.unwrap()), vec![1, 2]);
    assert!(store.get_all(KeyRange::all(), Some(0)).await.unwrap().is_empty());

    let by_restaurant = store.index("restaurant_id");
    assert_eq!(
        ids(&by_restaurant.get_all(KeyRange::only(1i64), None).await.unwrap()),
        vec![2, 3]
    );
    assert_eq!(by_restaurant.count(KeyRange::all()).await.unwrap(), 4);
    assert_eq!(
        by_restaurant.get(3i64).await.unwrap().unwrap()["id"],
        json!(4)
    );
}

#[tokio::test]
async fn dropped_transaction_commits() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;
    {
        let tx = db.transaction(&["reviews"], TransactionMode::ReadWrite);
        tx.object_store("reviews")
            .put(json!({"id": 9, "restaurant_id": 1}))
            .await
            .unwrap();
    }

    let tx = db.transaction(&["reviews"], TransactionMode::ReadOnly);
    let value = tx.object_store("reviews").get(9i64).await.unwrap();
    assert_eq!(value.unwrap()["restaurant_id"], json!(1));
}

#[tokio::test]
async fn aborted_transaction_leaves_no_trace() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;

    let tx = db.transaction(&["reviews"], TransactionMode::ReadWrite);
    tx.object_store("reviews")
        .put(json!({"id": 1, "restaurant_id": 1}))
        .await
        .unwrap();
    tx.abort();

    let tx = db.transaction(&["reviews"], TransactionMode::ReadOnly);
    assert_eq!(tx.object_store("reviews").count(KeyRange::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn completion_reports_failed_request() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;
    seed(&db).await;

    let tx = db.transaction(&["reviews"], TransactionMode::ReadWrite);
    let store = tx.object_store("reviews");
    let err = store.add(json!({"id": 1, "restaurant_id": 5})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ConstraintError);
    drop(store);
    assert_eq!(tx.complete().await.unwrap_err().code, ErrorCode::ConstraintError);
}

#[tokio::test]
async fn auto_increment_keys_are_injected() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;

    let tx = db.transaction(&["offline-queue"], TransactionMode::ReadWrite);
    let queue = tx.object_store("offline-queue");
    let a = queue.add(json!({"restaurant_id": 7})).await.unwrap();
    let b = queue.add(json!({"restaurant_id": 7})).await.unwrap();
    assert_eq!((a.as_i64(), b.as_i64()), (Some(1), Some(2)));
    let stored = queue.get(2i64).await.unwrap().unwrap();
    assert_eq!(stored["queue_key"], json!(2));
}

#[tokio::test]
async fn cursor_delete_keeps_position() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;
    seed(&db).await;

    let tx = db.transaction(&["reviews"], TransactionMode::ReadWrite);
    let store = tx.object_store("reviews");
    let mut cursor = store.open_cursor(KeyRange::all(), CursorDirection::Next).await.unwrap();
    while let Some(c) = cursor {
        if c.value()["restaurant_id"] == json!(1) {
            c.delete().await.unwrap();
        }
        cursor = c.advance().await.unwrap();
    }
    assert_eq!(ids(&store.get_all(KeyRange::all(), None).await.unwrap()), vec![1, 4]);
}

#[tokio::test]
async fn unknown_store_fails_requests() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;
    let tx = db.transaction(&["menus"], TransactionMode::ReadOnly);
    let err = tx.object_store("menus").count(KeyRange::all()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn lower_version_opens_at_stored_version() {
    let engine = Engine::in_memory().unwrap();
    Database::open(&engine, "db", 3, |vc| {
        vc.create_object_store("a", StoreParams::default())
    })
    .await
    .unwrap();

    let db = Database::open(&engine, "db", 2, |_| panic!("no upgrade expected"))
        .await
        .unwrap();
    assert_eq!(db.version(), 3);
}

#[tokio::test]
async fn deleted_database_is_gone() {
    let engine = Engine::in_memory().unwrap();
    open_reviews(&engine).await;
    engine.delete_database("restaurant-db").await.unwrap();
    assert!(engine.databases(None).await.unwrap().is_empty());
    engine.delete_database("never-existed").await.unwrap();
}

#[tokio::test]
async fn journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bistro.journal");
    {
        let engine = Engine::start(EngineConfig::new().journal(FileLog::open(&path).unwrap())).unwrap();
        let db = open_reviews(&engine).await;
        seed(&db).await;
        let tx = db.transaction(&["reviews"], TransactionMode::ReadWrite);
        tx.object_store("reviews").delete(4i64).await.unwrap();
        tx.complete().await.unwrap();
    }

    let engine = Engine::start(EngineConfig::new().journal(FileLog::open(&path).unwrap())).unwrap();
    let infos = engine.databases(None).await.unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].store("reviews").unwrap().record_count, 3);

    let db = open_reviews(&engine).await;
    let tx = db.transaction(&["offline-queue"], TransactionMode::ReadWrite);
    let key = tx.object_store("offline-queue").add(json!({"restaurant_id": 2})).await.unwrap();
    assert_eq!(key, Key::from(1i64));
}

#[tokio::test]
async fn compacted_journal_reopens_with_the_same_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bistro.journal");
    let stats = {
        let engine = Engine::start(EngineConfig::new().journal(FileLog::open(&path).unwrap())).unwrap();
        let db = open_reviews(&engine).await;
        seed(&db).await;
        for round in 0..10 {
            let tx = db.transaction(&["reviews", "offline-queue"], TransactionMode::ReadWrite);
            tx.object_store("reviews")
                .put(json!({"id": 1, "restaurant_id": 2, "rating": round}))
                .await
                .unwrap();
            tx.object_store("offline-queue").add(json!({"restaurant_id": 5})).await.unwrap();
            tx.complete().await.unwrap();
        }
        let tx = db.transaction(&["offline-queue"], TransactionMode::ReadWrite);
        tx.object_store("offline-queue").clear().await.unwrap();
        tx.complete().await.unwrap();

        let stats = engine.compact().await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), stats.bytes_after);
        stats
    };
    assert_eq!(stats.entries_after, 1);
    assert!(stats.bytes_after < stats.bytes_before);

    let engine = Engine::start(EngineConfig::new().journal(FileLog::open(&path).unwrap())).unwrap();
    let db = open_reviews(&engine).await;
    let tx = db.transaction(&["reviews", "offline-queue"], TransactionMode::ReadWrite);
    let reviews = tx.object_store("reviews");
    assert_eq!(reviews.count(KeyRange::all()).await.unwrap(), 4);
    assert_eq!(reviews.get(1i64).await.unwrap().unwrap()["rating"], json!(9));
    let by_restaurant = reviews.index("restaurant_id");
    assert_eq!(by_restaurant.count(KeyRange::only(1i64)).await.unwrap(), 2);

    let key = tx.object_store("offline-queue").add(json!({"restaurant_id": 5})).await.unwrap();
    assert_eq!(key, Key::from(11i64));
}

#[tokio::test]
async fn compacting_without_a_journal_reports_nothing() {
    let engine = Engine::in_memory().unwrap();
    open_reviews(&engine).await;
    assert_eq!(engine.compact().await.unwrap(), bistro_store::CompactStats::default());
}

#[tokio::test]
async fn auto_increment_state_is_journaled() {
    let log = InMemoryLog::new();
    {
        let engine = Engine::start(EngineConfig::new().journal(log.clone())).unwrap();
        let db = open_reviews(&engine).await;
        let tx = db.transaction(&["offline-queue"], TransactionMode::ReadWrite);
        let queue = tx.object_store("offline-queue");
        queue.add(json!({"restaurant_id": 1})).await.unwrap();
        queue.add(json!({"restaurant_id": 1})).await.unwrap();
        queue.delete(2i64).await.unwrap();
        drop(queue);
        tx.complete().await.unwrap();
    }

    let engine = Engine::start(EngineConfig::new().journal(log)).unwrap();
    let db = open_reviews(&engine).await;
    let tx = db.transaction(&["offline-queue"], TransactionMode::ReadWrite);
    let key = tx.object_store("offline-queue").add(json!({"restaurant_id": 1})).await.unwrap();
    assert_eq!(key, Key::from(3i64));
}

#[tokio::test]
async fn writers_are_serialized() {
    let engine = Engine::in_memory().unwrap();
    let db = open_reviews(&engine).await;

    let first = db.transaction(&["reviews"], TransactionMode::ReadWrite);
    let second = db.transaction(&["reviews"], TransactionMode::ReadWrite);

    let second_store = second.object_store("reviews");
    let pending = tokio::spawn(async move {
        let count = second_store.count(KeyRange::all()).await.unwrap();
        drop(second_store);
        second.complete().await.unwrap();
        count
    });

    first
        .object_store("reviews")
        .put(json!({"id": 1, "restaurant_id": 1}))
        .await
        .unwrap();
    first.complete().await.unwrap();

    assert_eq!(pending.await.unwrap(), 1);
}
