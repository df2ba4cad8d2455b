use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Qa,
    Test,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Prod, Environment::Qa, Environment::Test];

    /// Test stock is tracked as fungible bundles rather than individual cards
    pub fn uses_bundles(self) -> bool {
        self == Environment::Test
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum TerminalType {
    Pos,
    Ecomm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum BinProduct {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Feature {
    Transit,
    OnlinePin,
    TransitOnlinePin,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Region {
    Domestic,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AssignmentStatus {
    Unassigned,
    Assigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OperStatus {
    Active,
    Blocked,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CardRecord {
    pub id: Uuid,
    pub issuer_id: Uuid,
    pub bin: String,
    pub bin_product: BinProduct,
    pub feature: Option<Feature>, // Pos only
    pub region: Option<Region>,   // Pos only
    pub environment: Environment,
    pub card_type: TerminalType,
    pub assignment_status: AssignmentStatus,
    pub oper_status: OperStatus,
    pub is_deleted: bool,
    #[serde(skip_serializing)]
    pub ciphertext: String, // base64 AES-256-CBC
    #[serde(skip_serializing)]
    pub iv: String, // base64, 16 bytes
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCardData {
    pub issuer_id: Uuid,
    pub bin: String,
    pub bin_product: BinProduct,
    pub feature: Option<Feature>,
    pub region: Option<Region>,
    pub environment: Environment,
    pub card_type: TerminalType,
    pub ciphertext: String,
    pub iv: String,
}

/// Inventory filter. `None` on feature/region matches any value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardCriteria {
    pub bin_product: BinProduct,
    pub feature: Option<Feature>,
    pub region: Option<Region>,
    pub environment: Environment,
    pub terminal_type: TerminalType,
    #[serde(default = "default_assignment_status")]
    pub assignment_status: AssignmentStatus,
}

fn default_assignment_status() -> AssignmentStatus {
    AssignmentStatus::Unassigned
}

impl CardCriteria {
    /// Exact-equality match on the card's own columns. Issuer gating is
    /// applied separately since it needs the issuer directory.
    pub fn matches(&self, card: &CardRecord) -> bool {
        !card.is_deleted
            && card.oper_status == OperStatus::Active
            && card.bin_product == self.bin_product
            && self.feature.map_or(true, |f| card.feature == Some(f))
            && self.region.map_or(true, |r| card.region == Some(r))
            && card.environment == self.environment
            && card.card_type == self.terminal_type
            && card.assignment_status == self.assignment_status
    }
}

const MATCHING_FILTER: &str = r#"
    FROM cards c
    JOIN issuers i ON i.id = c.issuer_id
    WHERE i.status = 'active'
      AND c.is_deleted = FALSE
      AND c.oper_status = 'active'
      AND c.bin_product = $1
      AND ($2::text IS NULL OR c.feature = $2)
      AND ($3::text IS NULL OR c.region = $3)
      AND c.environment = $4
      AND c.card_type = $5
      AND c.assignment_status = $6
"#;

impl CardRecord {
    /// Creates a new, unassigned and active card
    pub async fn create(pool: &PgPool, data: CreateCardData) -> Result<Self, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO cards (
                issuer_id, bin, bin_product, feature, region, environment,
                card_type, ciphertext, iv
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(data.issuer_id)
        .bind(&data.bin)
        .bind(data.bin_product)
        .bind(data.feature)
        .bind(data.region)
        .bind(data.environment)
        .bind(data.card_type)
        .bind(&data.ciphertext)
        .bind(&data.iv)
        .fetch_one(pool)
        .await?;

        Ok(card)
    }

    /// Finds a card by ID, including soft-deleted ones
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let card = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM cards WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(card)
    }

    /// Lists matching cards in insertion order
    pub async fn find_matching(
        pool: &PgPool,
        criteria: &CardCriteria,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT c.* {} ORDER BY c.created_at ASC, c.id ASC",
            MATCHING_FILTER
        );

        let cards = sqlx::query_as::<_, Self>(&query)
            .bind(criteria.bin_product)
            .bind(criteria.feature)
            .bind(criteria.region)
            .bind(criteria.environment)
            .bind(criteria.terminal_type)
            .bind(criteria.assignment_status)
            .fetch_all(pool)
            .await?;

        Ok(cards)
    }

    /// Counts matching cards
    pub async fn count_matching(
        pool: &PgPool,
        criteria: &CardCriteria,
    ) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) {}", MATCHING_FILTER);

        let count = sqlx::query_scalar::<_, i64>(&query)
            .bind(criteria.bin_product)
            .bind(criteria.feature)
            .bind(criteria.region)
            .bind(criteria.environment)
            .bind(criteria.terminal_type)
            .bind(criteria.assignment_status)
            .fetch_one(pool)
            .await?;

        Ok(count)
    }

    /// Flips unassigned -> assigned in one statement.
    /// Returns false when another caller got there first.
    pub async fn try_mark_assigned(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET assignment_status = 'assigned', updated_at = NOW()
            WHERE id = $1
              AND assignment_status = 'unassigned'
              AND is_deleted = FALSE
              AND oper_status = 'active'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Flips assigned -> unassigned. Returns false if the card was not assigned.
    pub async fn release(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET assignment_status = 'unassigned', updated_at = NOW()
            WHERE id = $1 AND assignment_status = 'assigned'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Updates operational status (active/blocked)
    pub async fn set_oper_status(
        pool: &PgPool,
        id: Uuid,
        status: OperStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET oper_status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Soft delete; cards are never removed
    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET is_deleted = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
