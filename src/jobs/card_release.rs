use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{card::Environment, UserCardAssignment};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReleaseStats {
    pub checked: usize,
    pub released: usize,
    pub failures: usize,
}

/// Background job that returns expired cards to the vault
///
/// For each environment with defaults configured:
/// 1. Load live assignments
/// 2. Skip those still inside `last_use_date + release_card_after_days`
/// 3. Mark the rest released and give back the card or bundle unit
pub async fn release_expired_cards(store: &dyn Store, today: NaiveDate) -> Result<ReleaseStats> {
    let mut stats = ReleaseStats::default();

    for environment in Environment::ALL {
        let Some(defaults) = store.system_defaults(environment).await? else {
            tracing::debug!(environment = ?environment, "No defaults, skipping release");
            continue;
        };
        let after = Duration::days(i64::from(defaults.release_card_after_days));

        let live = store.live_assignments(environment).await?;
        stats.checked += live.len();

        for assignment in live {
            if assignment.last_use_date + after >= today {
                continue;
            }

            match release_single(store, &assignment).await {
                Ok(true) => stats.released += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        assignment_id = %assignment.id,
                        error = %e,
                        "Failed to release assignment"
                    );
                    stats.failures += 1;
                }
            }
        }
    }

    tracing::info!(?stats, "Card release job completed");

    Ok(stats)
}

async fn release_single(store: &dyn Store, assignment: &UserCardAssignment) -> Result<bool> {
    // Someone else got here first
    if !store.mark_assignment_released(assignment.id).await? {
        return Ok(false);
    }

    if let Some(card_id) = assignment.card_id {
        store.release_card(card_id).await?;
    }
    if let Some(bundle_id) = assignment.bundle_id {
        store.release_bundle_unit(bundle_id).await?;
    }

    tracing::info!(
        assignment_id = %assignment.id,
        tester = %assignment.tester_email,
        last_use_date = %assignment.last_use_date,
        "Assignment expired and released"
    );

    Ok(true)
}

/// Schedules the release job on `schedule` (six-field cron, seconds first)
pub async fn start_scheduler(store: Arc<dyn Store>, schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let store = store.clone();
        Box::pin(async move {
            let today = Utc::now().date_naive();
            if let Err(e) = release_expired_cards(store.as_ref(), today).await {
                tracing::error!(error = %e, "Card release job failed");
            }
        })
    })
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    scheduler
        .start()
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    tracing::info!(schedule = %schedule, "Card release job scheduled");

    Ok(scheduler)
}
