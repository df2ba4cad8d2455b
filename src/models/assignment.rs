use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use super::card::Environment;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLimits {
    pub max_amount_minor: Option<i64>,
    pub daily_amount_minor: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimits {
    pub offline_days: i32,
    pub online_usages: i32,
    pub total_usage: i32,
    pub last_use_date: NaiveDate,
}

/// A tester bound to one card, or to one unit of a bundle
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserCardAssignment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub card_id: Option<Uuid>,
    pub bundle_id: Option<Uuid>,
    pub environment: Environment,
    pub tester_name: String,
    pub tester_email: String,
    pub offline_days: i32,
    pub online_usages: i32,
    pub total_usage: i32,
    pub last_use_date: NaiveDate,
    pub transaction_limits: Json<TransactionLimits>,
    pub allowed_mccs: Json<Vec<String>>,
    pub allowed_countries: Json<Vec<String>>,
    pub assigned_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateAssignmentData {
    pub request_id: Uuid,
    pub card_id: Option<Uuid>,
    pub bundle_id: Option<Uuid>,
    pub environment: Environment,
    pub tester_name: String,
    pub tester_email: String,
    pub limits: UsageLimits,
    pub transaction_limits: TransactionLimits,
    pub allowed_mccs: Vec<String>,
    pub allowed_countries: Vec<String>,
}

impl UserCardAssignment {
    pub fn is_live(&self) -> bool {
        self.released_at.is_none()
    }

    pub fn usage_limits(&self) -> UsageLimits {
        UsageLimits {
            offline_days: self.offline_days,
            online_usages: self.online_usages,
            total_usage: self.total_usage,
            last_use_date: self.last_use_date,
        }
    }

    /// Inserts an assignment. The partial unique index on
    /// (request_id, tester_email) rejects a second live row.
    pub async fn create(pool: &PgPool, data: CreateAssignmentData) -> Result<Self, sqlx::Error> {
        let assignment = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO user_card_assignments (
                request_id, card_id, bundle_id, environment, tester_name, tester_email,
                offline_days, online_usages, total_usage, last_use_date,
                transaction_limits, allowed_mccs, allowed_countries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(data.request_id)
        .bind(data.card_id)
        .bind(data.bundle_id)
        .bind(data.environment)
        .bind(&data.tester_name)
        .bind(&data.tester_email)
        .bind(data.limits.offline_days)
        .bind(data.limits.online_usages)
        .bind(data.limits.total_usage)
        .bind(data.limits.last_use_date)
        .bind(Json(&data.transaction_limits))
        .bind(Json(&data.allowed_mccs))
        .bind(Json(&data.allowed_countries))
        .fetch_one(pool)
        .await?;

        Ok(assignment)
    }

    pub async fn list_by_request(
        pool: &PgPool,
        request_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let assignments = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_card_assignments
            WHERE request_id = $1
            ORDER BY assigned_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(pool)
        .await?;

        Ok(assignments)
    }

    pub async fn find_live_for_tester(
        pool: &PgPool,
        request_id: Uuid,
        tester_email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let assignment = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_card_assignments
            WHERE request_id = $1 AND tester_email = $2 AND released_at IS NULL
            "#,
        )
        .bind(request_id)
        .bind(tester_email)
        .fetch_optional(pool)
        .await?;

        Ok(assignment)
    }

    /// Every card previously held by this tester, most recent first
    pub async fn list_card_history_for_tester(
        pool: &PgPool,
        tester_email: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let assignments = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_card_assignments
            WHERE tester_email = $1 AND card_id IS NOT NULL
            ORDER BY assigned_at DESC
            "#,
        )
        .bind(tester_email)
        .fetch_all(pool)
        .await?;

        Ok(assignments)
    }

    pub async fn find_live_for_card(
        pool: &PgPool,
        card_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let assignment = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_card_assignments
            WHERE card_id = $1 AND released_at IS NULL
            "#,
        )
        .bind(card_id)
        .fetch_optional(pool)
        .await?;

        Ok(assignment)
    }

    pub async fn list_live(
        pool: &PgPool,
        environment: Environment,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let assignments = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_card_assignments
            WHERE environment = $1 AND released_at IS NULL
            ORDER BY last_use_date ASC
            "#,
        )
        .bind(environment)
        .fetch_all(pool)
        .await?;

        Ok(assignments)
    }

    /// Marks a live assignment released. Returns false if it already was.
    pub async fn mark_released(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE user_card_assignments
            SET released_at = NOW()
            WHERE id = $1 AND released_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
