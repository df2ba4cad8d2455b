use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Store;
use crate::error::{AppError, Result};
use crate::models::{
    assignment::{CreateAssignmentData, UserCardAssignment},
    bundle::{BundlePool, CreateBundleData},
    card::{AssignmentStatus, CardCriteria, CardRecord, CreateCardData, Environment, OperStatus},
    card_request::{CardRequest, CreateRequestData, RequestStatus},
    issuer::{CreateIssuerData, Issuer, IssuerStatus},
    system_defaults::SystemDefaults,
};

#[derive(Default)]
struct Tables {
    issuers: Vec<Issuer>,
    defaults: Vec<SystemDefaults>,
    cards: Vec<CardRecord>,
    bundles: Vec<BundlePool>,
    requests: Vec<CardRequest>,
    assignments: Vec<UserCardAssignment>,
}

impl Tables {
    fn issuer_is_issuable(&self, issuer_id: Uuid) -> bool {
        self.issuers
            .iter()
            .any(|i| i.id == issuer_id && i.is_issuable())
    }

    fn matching_cards<'a>(
        &'a self,
        criteria: &'a CardCriteria,
    ) -> impl Iterator<Item = &'a CardRecord> + 'a {
        self.cards
            .iter()
            .filter(move |c| criteria.matches(c) && self.issuer_is_issuable(c.issuer_id))
    }

    fn card_mut(&mut self, id: Uuid) -> Option<&mut CardRecord> {
        self.cards.iter_mut().find(|c| c.id == id)
    }

    fn bundle_mut(&mut self, id: Uuid) -> Option<&mut BundlePool> {
        self.bundles.iter_mut().find(|b| b.id == id)
    }
}

/// In-process store with the same semantics as the Postgres one.
///
/// Every call yields to the scheduler first so that concurrent callers
/// interleave between store round trips.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    #[cfg(test)]
    insert_delay: Option<std::time::Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose assignment writes take `delay` to land
    #[cfg(test)]
    pub fn with_insert_delay(delay: std::time::Duration) -> Self {
        Self {
            insert_delay: Some(delay),
            ..Self::default()
        }
    }

    #[cfg(test)]
    async fn insert_latency(&self) {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn round_trip(&self) -> tokio::sync::MutexGuard<'_, Tables> {
        tokio::task::yield_now().await;
        self.tables.lock().await
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        let _tables = self.round_trip().await;
        Ok(())
    }

    async fn insert_issuer(&self, data: CreateIssuerData) -> Result<Issuer> {
        let mut tables = self.round_trip().await;
        let now = Utc::now();
        let issuer = Issuer {
            id: Uuid::new_v4(),
            name: data.name,
            terminal_type: data.terminal_type,
            status: IssuerStatus::Draft,
            secured_connection: data.secured_connection,
            created_at: now,
            updated_at: now,
        };
        tables.issuers.push(issuer.clone());
        Ok(issuer)
    }

    async fn find_issuer(&self, id: Uuid) -> Result<Option<Issuer>> {
        let tables = self.round_trip().await;
        Ok(tables.issuers.iter().find(|i| i.id == id).cloned())
    }

    async fn set_issuer_status(&self, id: Uuid, status: IssuerStatus) -> Result<()> {
        let mut tables = self.round_trip().await;
        if let Some(issuer) = tables.issuers.iter_mut().find(|i| i.id == id) {
            issuer.status = status;
            issuer.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn system_defaults(&self, environment: Environment) -> Result<Option<SystemDefaults>> {
        let tables = self.round_trip().await;
        Ok(tables
            .defaults
            .iter()
            .find(|d| d.environment == environment)
            .cloned())
    }

    async fn upsert_system_defaults(&self, mut defaults: SystemDefaults) -> Result<SystemDefaults> {
        let mut tables = self.round_trip().await;
        defaults.updated_at = Utc::now();
        tables
            .defaults
            .retain(|d| d.environment != defaults.environment);
        tables.defaults.push(defaults.clone());
        Ok(defaults)
    }

    async fn insert_card(&self, data: CreateCardData) -> Result<CardRecord> {
        let mut tables = self.round_trip().await;
        if !tables.issuers.iter().any(|i| i.id == data.issuer_id) {
            return Err(AppError::NotFound(format!("Issuer {}", data.issuer_id)));
        }
        let now = Utc::now();
        let card = CardRecord {
            id: Uuid::new_v4(),
            issuer_id: data.issuer_id,
            bin: data.bin,
            bin_product: data.bin_product,
            feature: data.feature,
            region: data.region,
            environment: data.environment,
            card_type: data.card_type,
            assignment_status: AssignmentStatus::Unassigned,
            oper_status: OperStatus::Active,
            is_deleted: false,
            ciphertext: data.ciphertext,
            iv: data.iv,
            created_at: now,
            updated_at: now,
        };
        tables.cards.push(card.clone());
        Ok(card)
    }

    async fn find_card(&self, id: Uuid) -> Result<Option<CardRecord>> {
        let tables = self.round_trip().await;
        Ok(tables.cards.iter().find(|c| c.id == id).cloned())
    }

    async fn find_cards(&self, criteria: &CardCriteria) -> Result<Vec<CardRecord>> {
        let tables = self.round_trip().await;
        Ok(tables.matching_cards(criteria).cloned().collect())
    }

    async fn count_cards(&self, criteria: &CardCriteria) -> Result<i64> {
        let tables = self.round_trip().await;
        Ok(tables.matching_cards(criteria).count() as i64)
    }

    async fn try_mark_assigned(&self, card_id: Uuid) -> Result<bool> {
        let mut tables = self.round_trip().await;
        match tables.card_mut(card_id) {
            Some(card)
                if card.assignment_status == AssignmentStatus::Unassigned
                    && !card.is_deleted
                    && card.oper_status == OperStatus::Active =>
            {
                card.assignment_status = AssignmentStatus::Assigned;
                card.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_card(&self, card_id: Uuid) -> Result<bool> {
        let mut tables = self.round_trip().await;
        match tables.card_mut(card_id) {
            Some(card) if card.assignment_status == AssignmentStatus::Assigned => {
                card.assignment_status = AssignmentStatus::Unassigned;
                card.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_card_oper_status(&self, card_id: Uuid, status: OperStatus) -> Result<bool> {
        let mut tables = self.round_trip().await;
        Ok(tables
            .card_mut(card_id)
            .map(|card| {
                card.oper_status = status;
                card.updated_at = Utc::now();
            })
            .is_some())
    }

    async fn soft_delete_card(&self, card_id: Uuid) -> Result<bool> {
        let mut tables = self.round_trip().await;
        Ok(tables
            .card_mut(card_id)
            .map(|card| {
                card.is_deleted = true;
                card.updated_at = Utc::now();
            })
            .is_some())
    }

    async fn insert_bundle(&self, data: CreateBundleData) -> Result<BundlePool> {
        let mut tables = self.round_trip().await;
        let exists = tables
            .bundles
            .iter()
            .any(|b| b.environment == data.environment && b.bundle_name == data.bundle_name);
        if exists {
            return Err(AppError::Conflict(format!(
                "Bundle '{}' already exists",
                data.bundle_name
            )));
        }
        let now = Utc::now();
        let bundle = BundlePool {
            id: Uuid::new_v4(),
            environment: data.environment,
            bundle_name: data.bundle_name,
            total: data.total,
            assigned: 0,
            created_at: now,
            updated_at: now,
        };
        tables.bundles.push(bundle.clone());
        Ok(bundle)
    }

    async fn find_bundle(&self, id: Uuid) -> Result<Option<BundlePool>> {
        let tables = self.round_trip().await;
        Ok(tables.bundles.iter().find(|b| b.id == id).cloned())
    }

    async fn find_bundle_by_name(
        &self,
        environment: Environment,
        bundle_name: &str,
    ) -> Result<Option<BundlePool>> {
        let tables = self.round_trip().await;
        Ok(tables
            .bundles
            .iter()
            .find(|b| b.environment == environment && b.bundle_name == bundle_name)
            .cloned())
    }

    async fn update_bundle_total(&self, id: Uuid, total: i32) -> Result<Option<BundlePool>> {
        let mut tables = self.round_trip().await;
        match tables.bundle_mut(id) {
            Some(bundle) if bundle.assigned <= total => {
                bundle.total = total;
                bundle.updated_at = Utc::now();
                Ok(Some(bundle.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn try_reserve_bundle_unit(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.round_trip().await;
        match tables.bundle_mut(id) {
            Some(bundle) if bundle.assigned < bundle.total => {
                bundle.assigned += 1;
                bundle.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_bundle_unit(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.round_trip().await;
        match tables.bundle_mut(id) {
            Some(bundle) if bundle.assigned > 0 => {
                bundle.assigned -= 1;
                bundle.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_request(&self, data: CreateRequestData) -> Result<CardRequest> {
        let mut tables = self.round_trip().await;
        let now = Utc::now();
        let request = CardRequest {
            id: Uuid::new_v4(),
            environment: data.environment,
            terminal_type: data.ship_details.terminal_type(),
            status: RequestStatus::Draft,
            ship_details: Json(data.ship_details),
            reviewer_comment: None,
            sn_status_verify: false,
            shipments: Json(Vec::new()),
            created_by: data.created_by,
            created_at: now,
            updated_at: now,
        };
        tables.requests.push(request.clone());
        Ok(request)
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<CardRequest>> {
        let tables = self.round_trip().await;
        Ok(tables.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn save_request(&self, request: &CardRequest) -> Result<CardRequest> {
        let mut tables = self.round_trip().await;
        let stored = tables
            .requests
            .iter_mut()
            .find(|r| r.id == request.id)
            .ok_or_else(|| AppError::NotFound(format!("Card request {}", request.id)))?;
        *stored = request.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn insert_assignment(&self, data: CreateAssignmentData) -> Result<UserCardAssignment> {
        #[cfg(test)]
        self.insert_latency().await;
        let mut tables = self.round_trip().await;
        let duplicate = tables.assignments.iter().any(|a| {
            a.is_live()
                && ((a.request_id == data.request_id && a.tester_email == data.tester_email)
                    || (data.card_id.is_some() && a.card_id == data.card_id))
        });
        if duplicate {
            return Err(AppError::Conflict(format!(
                "{} already holds an assignment",
                data.tester_email
            )));
        }
        let assignment = UserCardAssignment {
            id: Uuid::new_v4(),
            request_id: data.request_id,
            card_id: data.card_id,
            bundle_id: data.bundle_id,
            environment: data.environment,
            tester_name: data.tester_name,
            tester_email: data.tester_email,
            offline_days: data.limits.offline_days,
            online_usages: data.limits.online_usages,
            total_usage: data.limits.total_usage,
            last_use_date: data.limits.last_use_date,
            transaction_limits: Json(data.transaction_limits),
            allowed_mccs: Json(data.allowed_mccs),
            allowed_countries: Json(data.allowed_countries),
            assigned_at: Utc::now(),
            released_at: None,
        };
        tables.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn assignments_for_request(&self, request_id: Uuid) -> Result<Vec<UserCardAssignment>> {
        let tables = self.round_trip().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn live_assignment_for_tester(
        &self,
        request_id: Uuid,
        tester_email: &str,
    ) -> Result<Option<UserCardAssignment>> {
        let tables = self.round_trip().await;
        Ok(tables
            .assignments
            .iter()
            .find(|a| a.is_live() && a.request_id == request_id && a.tester_email == tester_email)
            .cloned())
    }

    async fn live_assignment_for_card(&self, card_id: Uuid) -> Result<Option<UserCardAssignment>> {
        let tables = self.round_trip().await;
        Ok(tables
            .assignments
            .iter()
            .find(|a| a.is_live() && a.card_id == Some(card_id))
            .cloned())
    }

    async fn card_history_for_tester(
        &self,
        tester_email: &str,
    ) -> Result<Vec<UserCardAssignment>> {
        let tables = self.round_trip().await;
        Ok(tables
            .assignments
            .iter()
            .rev()
            .filter(|a| a.tester_email == tester_email && a.card_id.is_some())
            .cloned()
            .collect())
    }

    async fn live_assignments(&self, environment: Environment) -> Result<Vec<UserCardAssignment>> {
        let tables = self.round_trip().await;
        let mut live: Vec<_> = tables
            .assignments
            .iter()
            .filter(|a| a.is_live() && a.environment == environment)
            .cloned()
            .collect();
        live.sort_by_key(|a| a.last_use_date);
        Ok(live)
    }

    async fn mark_assignment_released(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.round_trip().await;
        match tables.assignments.iter_mut().find(|a| a.id == id) {
            Some(assignment) if assignment.is_live() => {
                assignment.released_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
