use chrono::{Duration as Days, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{
    assignment::{CreateAssignmentData, TransactionLimits, UsageLimits, UserCardAssignment},
    card::Environment,
    card_request::{Selection, Tester},
    system_defaults::SystemDefaults,
};
use crate::services::{bundle_vault, card_vault};

/// Per-tester values that sit between a prior assignment and the
/// environment defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TesterOverrides {
    pub offline_days: Option<i32>,
    pub online_usages: Option<i32>,
    pub total_usage: Option<i32>,
    pub last_use_date: Option<NaiveDate>,
    pub transaction_limits: Option<TransactionLimits>,
    pub allowed_mccs: Option<Vec<String>>,
    pub allowed_countries: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Card/unit taken by someone else, or tester already assigned
    Conflict,
    /// Outcome unknown; re-read the store before retrying
    TimedOut,
    /// Store unreachable; safe to retry
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTester {
    pub tester: Tester,
    pub kind: FailureKind,
    pub message: String,
}

/// Partial-success report; callers re-drive only `failed`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentReport {
    pub request_id: Uuid,
    pub succeeded: Vec<UserCardAssignment>,
    pub failed: Vec<FailedTester>,
}

impl AssignmentReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Card(Uuid),
    BundleUnit(Uuid),
}

#[derive(Clone)]
struct Plan {
    tester: Tester,
    target: Target,
    prior: Option<UserCardAssignment>,
}

/// Usage limits: prior assignment of the same card to the same tester,
/// then per-tester overrides, then environment defaults.
/// `last_use_date` never lands before `today`.
pub fn resolve_limits(
    prior: Option<&UserCardAssignment>,
    overrides: &TesterOverrides,
    defaults: &SystemDefaults,
    today: NaiveDate,
) -> UsageLimits {
    let prior_limits = prior.map(UserCardAssignment::usage_limits);

    let total_usage = prior_limits
        .as_ref()
        .map(|l| l.total_usage)
        .or(overrides.total_usage)
        .unwrap_or(defaults.total_usage);

    let offline_days = prior_limits
        .as_ref()
        .map(|l| l.offline_days)
        .or(overrides.offline_days)
        .unwrap_or(defaults.offline_days);

    let online_usages = prior_limits
        .as_ref()
        .map(|l| l.online_usages)
        .or(overrides.online_usages)
        .unwrap_or(total_usage);

    let last_use_date = prior_limits
        .as_ref()
        .map(|l| l.last_use_date)
        .filter(|d| *d >= today)
        .or(overrides.last_use_date.filter(|d| *d >= today))
        .unwrap_or(today + Days::days(i64::from(defaults.key_expiry_days)));

    UsageLimits {
        offline_days,
        online_usages,
        total_usage,
        last_use_date: last_use_date.max(today),
    }
}

fn normalize_testers(testers: &[Tester]) -> Result<Vec<Tester>> {
    if testers.is_empty() {
        return Err(AppError::Validation("No testers to assign".to_string()));
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(testers.len());
    for tester in testers {
        let email = tester.normalized_email();
        if email.is_empty() {
            return Err(AppError::Validation("Tester email is required".to_string()));
        }
        if !seen.insert(email.clone()) {
            return Err(AppError::Validation(format!(
                "Tester email '{}' appears more than once",
                tester.email
            )));
        }
        normalized.push(Tester {
            name: tester.name.trim().to_string(),
            email,
        });
    }
    Ok(normalized)
}

/// Checks capacity and picks a target per tester. Reads only.
async fn plan(
    store: &dyn Store,
    environment: Environment,
    testers: Vec<Tester>,
    selection: &Selection,
) -> Result<Vec<Plan>> {
    let requested = testers.len();

    match selection {
        Selection::Bundle { bundle_name } => {
            let pool = bundle_vault::find_by_name(store, environment, bundle_name).await?;
            let available = i64::from(pool.available());
            if available < requested as i64 {
                return Err(AppError::InsufficientInventory {
                    requested,
                    available,
                });
            }

            Ok(testers
                .into_iter()
                .map(|tester| Plan {
                    tester,
                    target: Target::BundleUnit(pool.id),
                    prior: None,
                })
                .collect())
        }
        Selection::Cards(criteria) => {
            let available = card_vault::count(store, criteria).await?;
            if available < requested as i64 {
                return Err(AppError::InsufficientInventory {
                    requested,
                    available,
                });
            }

            let candidates = card_vault::find(store, criteria).await?;
            let mut claimed = HashSet::new();
            let mut plans = Vec::with_capacity(requested);

            for tester in testers {
                let history = store.card_history_for_tester(&tester.email).await?;

                // Hand a tester back a card they held before when it is free
                let preferred = history.iter().find_map(|prior| {
                    let card_id = prior.card_id?;
                    let free = candidates.iter().any(|c| c.id == card_id)
                        && !claimed.contains(&card_id);
                    free.then(|| (card_id, prior.clone()))
                });

                let (card_id, prior) = match preferred {
                    Some((card_id, prior)) => (card_id, Some(prior)),
                    None => {
                        let card = candidates
                            .iter()
                            .find(|c| !claimed.contains(&c.id))
                            .ok_or(AppError::InsufficientInventory {
                                requested,
                                available: candidates.len() as i64,
                            })?;
                        let prior = history
                            .iter()
                            .find(|a| a.card_id == Some(card.id))
                            .cloned();
                        (card.id, prior)
                    }
                };

                claimed.insert(card_id);
                plans.push(Plan {
                    tester,
                    target: Target::Card(card_id),
                    prior,
                });
            }

            Ok(plans)
        }
    }
}

/// One tester: reserve the target, then record the assignment.
///
/// Runs as its own task so that a caller giving up on it cannot leave a
/// reservation behind without an assignment row.
async fn attempt(
    store: Arc<dyn Store>,
    request_id: Uuid,
    environment: Environment,
    plan: Plan,
    overrides: TesterOverrides,
    defaults: SystemDefaults,
) -> Result<UserCardAssignment> {
    let email = &plan.tester.email;

    if store
        .live_assignment_for_tester(request_id, email)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!(
            "{} is already assigned on this request",
            email
        )));
    }

    let reserved = match plan.target {
        Target::Card(card_id) => store.try_mark_assigned(card_id).await?,
        Target::BundleUnit(bundle_id) => store.try_reserve_bundle_unit(bundle_id).await?,
    };
    if !reserved {
        return Err(AppError::Conflict(match plan.target {
            Target::Card(card_id) => format!("Card {} is no longer available", card_id),
            Target::BundleUnit(_) => "Bundle has no units left".to_string(),
        }));
    }

    let today = Utc::now().date_naive();
    let limits = resolve_limits(plan.prior.as_ref(), &overrides, &defaults, today);
    let prior = plan.prior.as_ref();

    let (card_id, bundle_id) = match plan.target {
        Target::Card(id) => (Some(id), None),
        Target::BundleUnit(id) => (None, Some(id)),
    };

    let data = CreateAssignmentData {
        request_id,
        card_id,
        bundle_id,
        environment,
        tester_name: plan.tester.name.clone(),
        tester_email: email.clone(),
        limits,
        transaction_limits: prior
            .map(|a| a.transaction_limits.0.clone())
            .or_else(|| overrides.transaction_limits.clone())
            .unwrap_or_default(),
        allowed_mccs: prior
            .map(|a| a.allowed_mccs.0.clone())
            .or_else(|| overrides.allowed_mccs.clone())
            .unwrap_or_default(),
        allowed_countries: prior
            .map(|a| a.allowed_countries.0.clone())
            .or_else(|| overrides.allowed_countries.clone())
            .unwrap_or_default(),
    };

    match store.insert_assignment(data).await {
        Ok(assignment) => Ok(assignment),
        Err(e) => {
            // Give the reservation back so the card/unit is not stranded
            let released = match plan.target {
                Target::Card(id) => store.release_card(id).await,
                Target::BundleUnit(id) => store.release_bundle_unit(id).await,
            };
            if let Err(release_err) = released {
                tracing::error!(
                    tester = %email,
                    error = %release_err,
                    "Failed to release reservation after assignment write failed"
                );
            }
            Err(e)
        }
    }
}

/// Override keys are matched against normalized tester emails
fn normalize_overrides(
    overrides: &HashMap<String, TesterOverrides>,
) -> HashMap<String, TesterOverrides> {
    overrides
        .iter()
        .map(|(email, o)| (email.trim().to_lowercase(), o.clone()))
        .collect()
}

fn classify(err: &AppError) -> FailureKind {
    match err {
        AppError::Conflict(_) => FailureKind::Conflict,
        AppError::TransientIo(_) => FailureKind::Unavailable,
        _ => FailureKind::Error,
    }
}

/// Assigns one card (or bundle unit) to each tester.
///
/// Capacity is checked up front and nothing is written if it is short.
/// After that every tester is attempted independently, each under
/// `timeout`, and all outcomes are collected before returning. Successes
/// are never rolled back because a sibling failed. A tester reported as
/// timed out may still end up assigned once the write lands.
#[tracing::instrument(skip(store, testers, selection, overrides), fields(testers = testers.len()))]
pub async fn assign(
    store: &Arc<dyn Store>,
    request_id: Uuid,
    environment: Environment,
    testers: &[Tester],
    selection: &Selection,
    overrides: &HashMap<String, TesterOverrides>,
    timeout: Duration,
) -> Result<AssignmentReport> {
    let testers = normalize_testers(testers)?;
    let overrides = normalize_overrides(overrides);
    let store_ref = store.as_ref();

    let prepared = tokio::time::timeout(timeout, async {
        let defaults = store_ref
            .system_defaults(environment)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("System defaults for {:?}", environment))
            })?;
        let plans = plan(store_ref, environment, testers, selection).await?;
        Ok::<_, AppError>((defaults, plans))
    })
    .await
    .map_err(|_| AppError::TransientIo("Timed out checking inventory".to_string()))?;

    let (defaults, plans) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::warn!(error = %e, "Assignment precheck failed, nothing written");
            return Err(e);
        }
    };

    let attempts = plans.into_iter().map(|plan| {
        let tester = plan.tester.clone();
        let task = tokio::spawn(
            attempt(
                Arc::clone(store),
                request_id,
                environment,
                plan,
                overrides.get(&tester.email).cloned().unwrap_or_default(),
                defaults.clone(),
            )
            .in_current_span(),
        );
        // On timeout only the handle is dropped; the task runs to completion
        async move { (tester, tokio::time::timeout(timeout, task).await) }
    });

    let mut report = AssignmentReport {
        request_id,
        succeeded: Vec::new(),
        failed: Vec::new(),
    };

    for (tester, outcome) in join_all(attempts).await {
        match outcome {
            Ok(Ok(Ok(assignment))) => {
                tracing::info!(
                    tester = %tester.email,
                    card_id = ?assignment.card_id,
                    bundle_id = ?assignment.bundle_id,
                    "Tester assigned"
                );
                report.succeeded.push(assignment);
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(tester = %tester.email, error = %e, "Tester assignment failed");
                report.failed.push(FailedTester {
                    kind: classify(&e),
                    message: e.to_string(),
                    tester,
                });
            }
            Ok(Err(join_err)) => {
                tracing::error!(tester = %tester.email, error = %join_err, "Assignment task aborted");
                report.failed.push(FailedTester {
                    kind: FailureKind::Error,
                    message: join_err.to_string(),
                    tester,
                });
            }
            Err(_) => {
                tracing::warn!(tester = %tester.email, "Tester assignment timed out");
                report.failed.push(FailedTester {
                    tester,
                    kind: FailureKind::TimedOut,
                    message: "Timed out; outcome unknown".to_string(),
                });
            }
        }
    }

    tracing::info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Assignment round completed"
    );

    Ok(report)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use sqlx::types::Json;

    use crate::db::Store;
    use crate::models::card::Environment;
    use crate::models::system_defaults::SystemDefaults;

    pub fn defaults(environment: Environment) -> SystemDefaults {
        SystemDefaults {
            environment,
            offline_days: 3,
            total_usage: 20,
            key_expiry_days: 30,
            grace_days: 2,
            release_card_after_days: 7,
            supported_brands: Json(vec!["visa".to_string()]),
            updated_at: Utc::now(),
        }
    }

    pub async fn seed_defaults(store: &dyn Store) {
        for environment in Environment::ALL {
            store
                .upsert_system_defaults(defaults(environment))
                .await
                .unwrap();
        }
    }
}
