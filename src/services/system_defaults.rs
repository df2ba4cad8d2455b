use chrono::Utc;
use serde::Deserialize;
use sqlx::types::Json;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::card::Environment;
use crate::models::system_defaults::SystemDefaults;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDefaults {
    pub offline_days: i32,
    pub total_usage: i32,
    pub key_expiry_days: i32,
    pub grace_days: i32,
    pub release_card_after_days: i32,
    #[serde(default)]
    pub supported_brands: Vec<String>,
}

pub async fn get(store: &dyn Store, environment: Environment) -> Result<SystemDefaults> {
    store
        .system_defaults(environment)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("System defaults for {:?}", environment)))
}

#[tracing::instrument(skip(store, update))]
pub async fn upsert(
    store: &dyn Store,
    environment: Environment,
    update: UpdateDefaults,
) -> Result<SystemDefaults> {
    let brands = update
        .supported_brands
        .into_iter()
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .collect();

    let defaults = SystemDefaults {
        environment,
        offline_days: update.offline_days,
        total_usage: update.total_usage,
        key_expiry_days: update.key_expiry_days,
        grace_days: update.grace_days,
        release_card_after_days: update.release_card_after_days,
        supported_brands: Json(brands),
        updated_at: Utc::now(),
    };
    defaults.validate().map_err(AppError::Validation)?;

    let saved = store.upsert_system_defaults(defaults).await?;
    tracing::info!(environment = ?environment, "System defaults updated");

    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn update() -> UpdateDefaults {
        UpdateDefaults {
            offline_days: 3,
            total_usage: 10,
            key_expiry_days: 30,
            grace_days: 0,
            release_card_after_days: 7,
            supported_brands: vec![" Visa ".to_string(), "".to_string()],
        }
    }

    #[tokio::test]
    async fn test_missing_defaults_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            get(&store, Environment::Prod).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_per_environment() {
        let store = MemoryStore::new();
        upsert(&store, Environment::Qa, update()).await.unwrap();

        let mut second = update();
        second.total_usage = 99;
        upsert(&store, Environment::Qa, second).await.unwrap();

        let saved = get(&store, Environment::Qa).await.unwrap();
        assert_eq!(saved.total_usage, 99);
        assert_eq!(saved.supported_brands.0, vec!["visa".to_string()]);
        assert!(get(&store, Environment::Prod).await.is_err());
    }

    #[tokio::test]
    async fn test_non_positive_counts_rejected() {
        let store = MemoryStore::new();
        let mut bad = update();
        bad.key_expiry_days = 0;
        assert!(matches!(
            upsert(&store, Environment::Qa, bad).await,
            Err(AppError::Validation(_))
        ));
    }
}
