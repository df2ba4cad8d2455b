use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    assignment::{CreateAssignmentData, UserCardAssignment},
    bundle::{BundlePool, CreateBundleData},
    card::{CardCriteria, CardRecord, CreateCardData, Environment, OperStatus},
    card_request::{CardRequest, CreateRequestData},
    issuer::{CreateIssuerData, Issuer, IssuerStatus},
    system_defaults::SystemDefaults,
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub async fn create_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persistent store for the provisioning core.
///
/// Plain CRUD is last-write-wins. The `try_*` / `release_*` operations are
/// atomic check-and-set: two concurrent callers on the same row get exactly
/// one `true`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Round trip to the backing store
    async fn ping(&self) -> Result<()>;

    // Issuer directory
    async fn insert_issuer(&self, data: CreateIssuerData) -> Result<Issuer>;
    async fn find_issuer(&self, id: Uuid) -> Result<Option<Issuer>>;
    async fn set_issuer_status(&self, id: Uuid, status: IssuerStatus) -> Result<()>;

    // System defaults
    async fn system_defaults(&self, environment: Environment) -> Result<Option<SystemDefaults>>;
    async fn upsert_system_defaults(&self, defaults: SystemDefaults) -> Result<SystemDefaults>;

    // Cards
    async fn insert_card(&self, data: CreateCardData) -> Result<CardRecord>;
    async fn find_card(&self, id: Uuid) -> Result<Option<CardRecord>>;
    /// Matching cards from issuable issuers, in insertion order
    async fn find_cards(&self, criteria: &CardCriteria) -> Result<Vec<CardRecord>>;
    async fn count_cards(&self, criteria: &CardCriteria) -> Result<i64>;
    async fn try_mark_assigned(&self, card_id: Uuid) -> Result<bool>;
    async fn release_card(&self, card_id: Uuid) -> Result<bool>;
    async fn set_card_oper_status(&self, card_id: Uuid, status: OperStatus) -> Result<bool>;
    async fn soft_delete_card(&self, card_id: Uuid) -> Result<bool>;

    // Bundle pools
    async fn insert_bundle(&self, data: CreateBundleData) -> Result<BundlePool>;
    async fn find_bundle(&self, id: Uuid) -> Result<Option<BundlePool>>;
    async fn find_bundle_by_name(
        &self,
        environment: Environment,
        bundle_name: &str,
    ) -> Result<Option<BundlePool>>;
    /// None when the bundle is missing or `assigned > total` would result
    async fn update_bundle_total(&self, id: Uuid, total: i32) -> Result<Option<BundlePool>>;
    async fn try_reserve_bundle_unit(&self, id: Uuid) -> Result<bool>;
    async fn release_bundle_unit(&self, id: Uuid) -> Result<bool>;

    // Card requests
    async fn insert_request(&self, data: CreateRequestData) -> Result<CardRequest>;
    async fn find_request(&self, id: Uuid) -> Result<Option<CardRequest>>;
    async fn save_request(&self, request: &CardRequest) -> Result<CardRequest>;

    // Assignments
    /// Conflict when the tester already holds a live assignment on the request
    async fn insert_assignment(&self, data: CreateAssignmentData) -> Result<UserCardAssignment>;
    async fn assignments_for_request(&self, request_id: Uuid) -> Result<Vec<UserCardAssignment>>;
    async fn live_assignment_for_tester(
        &self,
        request_id: Uuid,
        tester_email: &str,
    ) -> Result<Option<UserCardAssignment>>;
    async fn live_assignment_for_card(&self, card_id: Uuid) -> Result<Option<UserCardAssignment>>;
    /// Card assignments ever held by this tester, most recent first
    async fn card_history_for_tester(&self, tester_email: &str)
        -> Result<Vec<UserCardAssignment>>;
    async fn live_assignments(&self, environment: Environment) -> Result<Vec<UserCardAssignment>>;
    async fn mark_assignment_released(&self, id: Uuid) -> Result<bool>;
}
