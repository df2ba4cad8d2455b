use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};

use super::card::Environment;

/// Environment-wide fallbacks used when assigning cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SystemDefaults {
    pub environment: Environment,
    pub offline_days: i32,
    pub total_usage: i32,
    pub key_expiry_days: i32,
    pub grace_days: i32,
    pub release_card_after_days: i32,
    pub supported_brands: Json<Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

impl SystemDefaults {
    pub fn validate(&self) -> Result<(), String> {
        let counts = [
            ("offlineDays", self.offline_days),
            ("totalUsage", self.total_usage),
            ("keyExpiryDays", self.key_expiry_days),
            ("releaseCardAfterDays", self.release_card_after_days),
        ];
        for (name, value) in counts {
            if value <= 0 {
                return Err(format!("{} must be positive", name));
            }
        }
        if self.grace_days < 0 {
            return Err("graceDays must not be negative".to_string());
        }
        Ok(())
    }

    pub async fn find(
        pool: &PgPool,
        environment: Environment,
    ) -> Result<Option<Self>, sqlx::Error> {
        let defaults = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM system_defaults WHERE environment = $1
            "#,
        )
        .bind(environment)
        .fetch_optional(pool)
        .await?;

        Ok(defaults)
    }

    pub async fn upsert(pool: &PgPool, defaults: &SystemDefaults) -> Result<Self, sqlx::Error> {
        let saved = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO system_defaults (
                environment, offline_days, total_usage, key_expiry_days,
                grace_days, release_card_after_days, supported_brands
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (environment) DO UPDATE SET
                offline_days = EXCLUDED.offline_days,
                total_usage = EXCLUDED.total_usage,
                key_expiry_days = EXCLUDED.key_expiry_days,
                grace_days = EXCLUDED.grace_days,
                release_card_after_days = EXCLUDED.release_card_after_days,
                supported_brands = EXCLUDED.supported_brands,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(defaults.environment)
        .bind(defaults.offline_days)
        .bind(defaults.total_usage)
        .bind(defaults.key_expiry_days)
        .bind(defaults.grace_days)
        .bind(defaults.release_card_after_days)
        .bind(&defaults.supported_brands)
        .fetch_one(pool)
        .await?;

        Ok(saved)
    }
}
