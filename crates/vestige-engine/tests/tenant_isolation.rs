//! Tenant isolation over a shared database file
//!
//! Two engines bound to different tenants share one SQLite file. Nothing
//! one tenant writes may surface through the other's handle, whatever the
//! query path.

use std::sync::Arc;

use tempfile::TempDir;
use vestige_engine::{
    EngineConfig, IngestInput, MemoryEngine, Rating, SearchOptions, SqliteDatabase,
};

async fn engine_on(path: std::path::PathBuf, tenant: &str) -> MemoryEngine {
    let db = SqliteDatabase::open(path, tenant).await.unwrap();
    MemoryEngine::new(Arc::new(db), EngineConfig::default()).unwrap()
}

fn input(content: &str) -> IngestInput {
    IngestInput {
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn reads_never_cross_tenants() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let alpha = engine_on(path.clone(), "alpha").await;
    let beta = engine_on(path.clone(), "beta").await;

    let secret = alpha
        .ingest(input("alpha's launch codes are stored in the vault"))
        .await
        .unwrap()
        .item
        .unwrap();
    beta.ingest(input("beta's grocery list says buy oat milk"))
        .await
        .unwrap();

    // Search, stats, due, and direct lookup all stay inside the tenant
    let results = beta
        .search("launch codes", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.total, 0);

    assert_eq!(alpha.stats().await.unwrap().total_items, 1);
    assert_eq!(beta.stats().await.unwrap().total_items, 1);

    assert!(beta.get(&secret.id).await.unwrap().is_none());
    assert!(alpha.get(&secret.id).await.unwrap().is_some());
}

#[tokio::test]
async fn writes_never_cross_tenants() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let alpha = engine_on(path.clone(), "alpha").await;
    let beta = engine_on(path.clone(), "beta").await;

    let item = alpha
        .ingest(input("alpha owns this memory outright"))
        .await
        .unwrap()
        .item
        .unwrap();

    // Deleting through the wrong tenant is a no-op, not an error
    assert!(!beta.delete(&item.id).await.unwrap());
    assert!(alpha.get(&item.id).await.unwrap().is_some());

    // Reviewing through the wrong tenant cannot find the item
    assert!(beta.review(&item.id, Rating::Good, None).await.is_err());
    let untouched = alpha.repository().peek(&item.id).await.unwrap().unwrap();
    assert_eq!(untouched.reps, 0);
}

#[tokio::test]
async fn ticks_are_scoped_to_their_tenant() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let alpha = engine_on(path.clone(), "alpha").await;
    let beta = engine_on(path.clone(), "beta").await;

    alpha.ingest(input("alpha memory one")).await.unwrap();
    alpha.ingest(input("alpha memory two")).await.unwrap();
    beta.ingest(input("beta memory one")).await.unwrap();

    let report = alpha.consolidate_tick(true).await.unwrap();
    assert_eq!(report.processed, 2);

    let report = beta.consolidate_tick(true).await.unwrap();
    assert_eq!(report.processed, 1);
}

#[tokio::test]
async fn intentions_and_edges_are_scoped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let alpha = engine_on(path.clone(), "alpha").await;
    let beta = engine_on(path.clone(), "beta").await;

    alpha
        .create_intention(
            "rotate the credentials",
            "time",
            serde_json::json!({}),
            vestige_engine::Priority::High,
            None,
            vec![],
        )
        .await
        .unwrap();

    assert_eq!(alpha.list_intentions(None).await.unwrap().len(), 1);
    assert!(beta.list_intentions(None).await.unwrap().is_empty());
}
