use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::Store;
use crate::error::{AppError, Result};
use crate::models::{
    assignment::{CreateAssignmentData, UserCardAssignment},
    bundle::{BundlePool, CreateBundleData},
    card::{CardCriteria, CardRecord, CreateCardData, Environment, OperStatus},
    card_request::{CardRequest, CreateRequestData},
    issuer::{CreateIssuerData, Issuer, IssuerStatus},
    system_defaults::SystemDefaults,
};

/// Postgres-backed store; the queries live on the model types
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn insert_issuer(&self, data: CreateIssuerData) -> Result<Issuer> {
        Ok(Issuer::create(&self.pool, data).await?)
    }

    async fn find_issuer(&self, id: Uuid) -> Result<Option<Issuer>> {
        Ok(Issuer::find_by_id(&self.pool, id).await?)
    }

    async fn set_issuer_status(&self, id: Uuid, status: IssuerStatus) -> Result<()> {
        Ok(Issuer::set_status(&self.pool, id, status).await?)
    }

    async fn system_defaults(&self, environment: Environment) -> Result<Option<SystemDefaults>> {
        Ok(SystemDefaults::find(&self.pool, environment).await?)
    }

    async fn upsert_system_defaults(&self, defaults: SystemDefaults) -> Result<SystemDefaults> {
        Ok(SystemDefaults::upsert(&self.pool, &defaults).await?)
    }

    async fn insert_card(&self, data: CreateCardData) -> Result<CardRecord> {
        Ok(CardRecord::create(&self.pool, data).await?)
    }

    async fn find_card(&self, id: Uuid) -> Result<Option<CardRecord>> {
        Ok(CardRecord::find_by_id(&self.pool, id).await?)
    }

    async fn find_cards(&self, criteria: &CardCriteria) -> Result<Vec<CardRecord>> {
        Ok(CardRecord::find_matching(&self.pool, criteria).await?)
    }

    async fn count_cards(&self, criteria: &CardCriteria) -> Result<i64> {
        Ok(CardRecord::count_matching(&self.pool, criteria).await?)
    }

    async fn try_mark_assigned(&self, card_id: Uuid) -> Result<bool> {
        Ok(CardRecord::try_mark_assigned(&self.pool, card_id).await?)
    }

    async fn release_card(&self, card_id: Uuid) -> Result<bool> {
        Ok(CardRecord::release(&self.pool, card_id).await?)
    }

    async fn set_card_oper_status(&self, card_id: Uuid, status: OperStatus) -> Result<bool> {
        Ok(CardRecord::set_oper_status(&self.pool, card_id, status).await?)
    }

    async fn soft_delete_card(&self, card_id: Uuid) -> Result<bool> {
        Ok(CardRecord::soft_delete(&self.pool, card_id).await?)
    }

    async fn insert_bundle(&self, data: CreateBundleData) -> Result<BundlePool> {
        let name = data.bundle_name.clone();
        BundlePool::create(&self.pool, data)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Conflict(_) => {
                    AppError::Conflict(format!("Bundle '{}' already exists", name))
                }
                other => other,
            })
    }

    async fn find_bundle(&self, id: Uuid) -> Result<Option<BundlePool>> {
        Ok(BundlePool::find_by_id(&self.pool, id).await?)
    }

    async fn find_bundle_by_name(
        &self,
        environment: Environment,
        bundle_name: &str,
    ) -> Result<Option<BundlePool>> {
        Ok(BundlePool::find_by_name(&self.pool, environment, bundle_name).await?)
    }

    async fn update_bundle_total(&self, id: Uuid, total: i32) -> Result<Option<BundlePool>> {
        Ok(BundlePool::update_total(&self.pool, id, total).await?)
    }

    async fn try_reserve_bundle_unit(&self, id: Uuid) -> Result<bool> {
        Ok(BundlePool::try_reserve_unit(&self.pool, id).await?)
    }

    async fn release_bundle_unit(&self, id: Uuid) -> Result<bool> {
        Ok(BundlePool::release_unit(&self.pool, id).await?)
    }

    async fn insert_request(&self, data: CreateRequestData) -> Result<CardRequest> {
        Ok(CardRequest::create(&self.pool, data).await?)
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<CardRequest>> {
        Ok(CardRequest::find_by_id(&self.pool, id).await?)
    }

    async fn save_request(&self, request: &CardRequest) -> Result<CardRequest> {
        Ok(CardRequest::save(&self.pool, request).await?)
    }

    async fn insert_assignment(&self, data: CreateAssignmentData) -> Result<UserCardAssignment> {
        let email = data.tester_email.clone();
        UserCardAssignment::create(&self.pool, data)
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Conflict(_) => {
                    AppError::Conflict(format!("{} already holds an assignment", email))
                }
                other => other,
            })
    }

    async fn assignments_for_request(&self, request_id: Uuid) -> Result<Vec<UserCardAssignment>> {
        Ok(UserCardAssignment::list_by_request(&self.pool, request_id).await?)
    }

    async fn live_assignment_for_tester(
        &self,
        request_id: Uuid,
        tester_email: &str,
    ) -> Result<Option<UserCardAssignment>> {
        Ok(UserCardAssignment::find_live_for_tester(&self.pool, request_id, tester_email).await?)
    }

    async fn live_assignment_for_card(&self, card_id: Uuid) -> Result<Option<UserCardAssignment>> {
        Ok(UserCardAssignment::find_live_for_card(&self.pool, card_id).await?)
    }

    async fn card_history_for_tester(
        &self,
        tester_email: &str,
    ) -> Result<Vec<UserCardAssignment>> {
        Ok(UserCardAssignment::list_card_history_for_tester(&self.pool, tester_email).await?)
    }

    async fn live_assignments(&self, environment: Environment) -> Result<Vec<UserCardAssignment>> {
        Ok(UserCardAssignment::list_live(&self.pool, environment).await?)
    }

    async fn mark_assignment_released(&self, id: Uuid) -> Result<bool> {
        Ok(UserCardAssignment::mark_released(&self.pool, id).await?)
    }
}
