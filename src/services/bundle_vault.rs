use serde::Serialize;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::bundle::{BundlePool, CreateBundleData};
use crate::models::card::Environment;

/// Bundle with its derived availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSnapshot {
    #[serde(flatten)]
    pub pool: BundlePool,
    pub available: i32,
}

impl From<BundlePool> for BundleSnapshot {
    fn from(pool: BundlePool) -> Self {
        let available = pool.available();
        Self { pool, available }
    }
}

#[tracing::instrument(skip(store))]
pub async fn create(
    store: &dyn Store,
    environment: Environment,
    bundle_name: &str,
    total: i32,
) -> Result<BundleSnapshot> {
    let bundle_name = bundle_name.trim();
    if bundle_name.is_empty() {
        return Err(AppError::Validation("Bundle name is required".to_string()));
    }
    if total < 0 {
        return Err(AppError::Validation(
            "Bundle total must not be negative".to_string(),
        ));
    }

    let pool = store
        .insert_bundle(CreateBundleData {
            environment,
            bundle_name: bundle_name.to_string(),
            total,
        })
        .await?;

    tracing::info!(bundle_id = %pool.id, total, "Bundle created");

    Ok(pool.into())
}

/// Changes the total. Refuses any total below what is already assigned.
#[tracing::instrument(skip(store))]
pub async fn update(store: &dyn Store, id: Uuid, total: i32) -> Result<BundleSnapshot> {
    if total < 0 {
        return Err(AppError::Validation(
            "Bundle total must not be negative".to_string(),
        ));
    }

    if let Some(pool) = store.update_bundle_total(id, total).await? {
        tracing::info!(bundle_id = %id, total, available = pool.available(), "Bundle total updated");
        return Ok(pool.into());
    }

    let current = store
        .find_bundle(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Bundle {}", id)))?;

    Err(AppError::Validation(format!(
        "Total {} is below the {} units already assigned",
        total, current.assigned
    )))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<BundleSnapshot> {
    store
        .find_bundle(id)
        .await?
        .map(BundleSnapshot::from)
        .ok_or_else(|| AppError::NotFound(format!("Bundle {}", id)))
}

pub async fn find_by_name(
    store: &dyn Store,
    environment: Environment,
    bundle_name: &str,
) -> Result<BundlePool> {
    store
        .find_bundle_by_name(environment, bundle_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Bundle '{}'", bundle_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_create_and_duplicate_name() {
        let store = MemoryStore::new();
        let created = create(&store, Environment::Test, "visa-test", 10)
            .await
            .unwrap();
        assert_eq!(created.available, 10);

        let duplicate = create(&store, Environment::Test, "visa-test", 5).await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));

        // Same name in another environment is a different pool
        assert!(create(&store, Environment::Qa, "visa-test", 5).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_recomputes_available() {
        let store = MemoryStore::new();
        let created = create(&store, Environment::Test, "mc-test", 10)
            .await
            .unwrap();
        for _ in 0..3 {
            assert!(store.try_reserve_bundle_unit(created.pool.id).await.unwrap());
        }

        let updated = update(&store, created.pool.id, 5).await.unwrap();
        assert_eq!(updated.pool.total, 5);
        assert_eq!(updated.available, 2);
    }

    #[tokio::test]
    async fn test_update_below_assigned_rejected() {
        let store = MemoryStore::new();
        let created = create(&store, Environment::Test, "amex-test", 4)
            .await
            .unwrap();
        for _ in 0..3 {
            store.try_reserve_bundle_unit(created.pool.id).await.unwrap();
        }

        let result = update(&store, created.pool.id, 2).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let current = get(&store, created.pool.id).await.unwrap();
        assert_eq!(current.pool.total, 4);
        assert_eq!(current.available, 1);
    }

    #[tokio::test]
    async fn test_update_missing_bundle() {
        let store = MemoryStore::new();
        let result = update(&store, Uuid::new_v4(), 2).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reserve_stops_at_total() {
        let store = MemoryStore::new();
        let created = create(&store, Environment::Test, "tiny", 1).await.unwrap();
        assert!(store.try_reserve_bundle_unit(created.pool.id).await.unwrap());
        assert!(!store.try_reserve_bundle_unit(created.pool.id).await.unwrap());
        assert_eq!(get(&store, created.pool.id).await.unwrap().available, 0);
    }
}
