use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::card::Environment;

/// Fungible test-card stock, tracked by count.
/// `available` is always derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BundlePool {
    pub id: Uuid,
    pub environment: Environment,
    pub bundle_name: String,
    pub total: i32,
    pub assigned: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateBundleData {
    pub environment: Environment,
    pub bundle_name: String,
    pub total: i32,
}

impl BundlePool {
    pub fn available(&self) -> i32 {
        (self.total - self.assigned).max(0)
    }

    /// Creates a new bundle; the unique (environment, bundle_name) index
    /// rejects duplicates
    pub async fn create(pool: &PgPool, data: CreateBundleData) -> Result<Self, sqlx::Error> {
        let bundle = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO bundle_pools (environment, bundle_name, total, assigned)
            VALUES ($1, $2, $3, 0)
            RETURNING *
            "#,
        )
        .bind(data.environment)
        .bind(&data.bundle_name)
        .bind(data.total)
        .fetch_one(pool)
        .await?;

        Ok(bundle)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let bundle = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bundle_pools WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(bundle)
    }

    pub async fn find_by_name(
        pool: &PgPool,
        environment: Environment,
        bundle_name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let bundle = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bundle_pools
            WHERE environment = $1 AND bundle_name = $2
            "#,
        )
        .bind(environment)
        .bind(bundle_name)
        .fetch_optional(pool)
        .await?;

        Ok(bundle)
    }

    /// Sets a new total. Returns None when the row is missing or the new
    /// total would drop below the assigned count.
    pub async fn update_total(
        pool: &PgPool,
        id: Uuid,
        total: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let bundle = sqlx::query_as::<_, Self>(
            r#"
            UPDATE bundle_pools
            SET total = $2, updated_at = NOW()
            WHERE id = $1 AND assigned <= $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(total)
        .fetch_optional(pool)
        .await?;

        Ok(bundle)
    }

    /// Takes one unit while assigned < total
    pub async fn try_reserve_unit(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE bundle_pools
            SET assigned = assigned + 1, updated_at = NOW()
            WHERE id = $1 AND assigned < total
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns one unit to the pool
    pub async fn release_unit(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE bundle_pools
            SET assigned = assigned - 1, updated_at = NOW()
            WHERE id = $1 AND assigned > 0
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
