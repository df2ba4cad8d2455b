use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::card::TerminalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum IssuerStatus {
    Active,
    Draft,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issuer {
    pub id: Uuid,
    pub name: String,
    pub terminal_type: TerminalType,
    pub status: IssuerStatus,
    pub secured_connection: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIssuerData {
    pub name: String,
    pub terminal_type: TerminalType,
    #[serde(default)]
    pub secured_connection: bool,
}

impl Issuer {
    /// Only active issuers may have new cards issued or surfaced by the vault
    pub fn is_issuable(&self) -> bool {
        self.status == IssuerStatus::Active
    }

    /// A Pos issuer can only go live over a secured connection.
    pub fn check_status_change(&self, next: IssuerStatus) -> Result<(), String> {
        if next == IssuerStatus::Active
            && self.terminal_type == TerminalType::Pos
            && !self.secured_connection
        {
            return Err(format!(
                "Issuer {} cannot be activated without a secured connection",
                self.name
            ));
        }
        Ok(())
    }

    /// Creates a new issuer in draft status
    pub async fn create(pool: &PgPool, data: CreateIssuerData) -> Result<Self, sqlx::Error> {
        let issuer = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO issuers (name, terminal_type, status, secured_connection)
            VALUES ($1, $2, 'draft', $3)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(data.terminal_type)
        .bind(data.secured_connection)
        .fetch_one(pool)
        .await?;

        Ok(issuer)
    }

    /// Finds an issuer by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let issuer = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM issuers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(issuer)
    }

    /// Updates issuer status
    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: IssuerStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE issuers
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

        Ok(())
    }
}
