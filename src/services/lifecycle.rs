use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{
    actor::Actor,
    card::Environment,
    card_request::{CardRequest, CreateRequestData, RequestStatus, ShipDetails, ShipmentRecord},
    UserCardAssignment,
};
use crate::services::assignment::{self, AssignmentReport, TesterOverrides};

/// Actions a caller may currently take on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    EditDetails,
    Submit,
    VerifySn,
    Approve,
    Return,
    Assign,
    Ship,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Return { comment: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOutcome {
    pub request: CardRequest,
    /// None when every tester already held a card
    pub report: Option<AssignmentReport>,
}

fn is_owner(request: &CardRequest, actor: &Actor) -> bool {
    request.created_by == actor.email || actor.is_admin()
}

/// Steps enabled for `actor`, derived from the persisted status only
pub fn enabled_steps(request: &CardRequest, actor: &Actor) -> Vec<Step> {
    let mut steps = Vec::new();

    match request.status {
        RequestStatus::Draft | RequestStatus::Returned => {
            if is_owner(request, actor) {
                steps.push(Step::EditDetails);
                steps.push(Step::Submit);
            }
        }
        RequestStatus::Submitted => {
            if actor.can_review() {
                steps.push(Step::VerifySn);
                if request.sn_status_verify {
                    steps.push(Step::Approve);
                }
                steps.push(Step::Return);
            }
        }
        RequestStatus::Approved => {
            if actor.is_admin() {
                steps.push(Step::Assign);
            }
        }
        RequestStatus::AssignCard => {
            if actor.is_admin() && request.ship_details.requires_shipment() {
                steps.push(Step::Ship);
            }
        }
        RequestStatus::Shipped => {}
    }

    steps
}

fn advance(request: &mut CardRequest, next: RequestStatus) -> Result<()> {
    if !request.status.can_transition_to(next) {
        return Err(AppError::Authorization(format!(
            "Request cannot move from {:?} to {:?}",
            request.status, next
        )));
    }

    tracing::info!(
        request_id = %request.id,
        from = ?request.status,
        to = ?next,
        "Request status changed"
    );
    request.status = next;
    Ok(())
}

fn require_owner(request: &CardRequest, actor: &Actor) -> Result<()> {
    if !is_owner(request, actor) {
        return Err(AppError::Authorization(
            "Only the requester can change this request".to_string(),
        ));
    }
    Ok(())
}

fn require_reviewer(actor: &Actor) -> Result<()> {
    if !actor.can_review() {
        return Err(AppError::Authorization(
            "Reviewer role required".to_string(),
        ));
    }
    Ok(())
}

fn require_admin(actor: &Actor) -> Result<()> {
    if !actor.is_admin() {
        return Err(AppError::Authorization("Admin role required".to_string()));
    }
    Ok(())
}

fn require_status(request: &CardRequest, expected: RequestStatus) -> Result<()> {
    if request.status != expected {
        return Err(AppError::Authorization(format!(
            "Request is {:?}, expected {:?}",
            request.status, expected
        )));
    }
    Ok(())
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<CardRequest> {
    store
        .find_request(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Card request {}", id)))
}

/// Opens a draft. Drafts may be incomplete.
#[tracing::instrument(skip(store, ship_details), fields(actor = %actor.email))]
pub async fn create(
    store: &dyn Store,
    actor: &Actor,
    environment: Environment,
    ship_details: ShipDetails,
) -> Result<CardRequest> {
    let request = store
        .insert_request(CreateRequestData {
            environment,
            ship_details,
            created_by: actor.email.clone(),
        })
        .await?;

    tracing::info!(request_id = %request.id, terminal_type = ?request.terminal_type, "Card request created");

    Ok(request)
}

#[tracing::instrument(skip(store, ship_details), fields(actor = %actor.email))]
pub async fn update_details(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    ship_details: ShipDetails,
) -> Result<CardRequest> {
    let mut request = get(store, id).await?;
    require_owner(&request, actor)?;

    if !request.status.is_editable() {
        return Err(AppError::Authorization(format!(
            "Request is read-only while {:?}",
            request.status
        )));
    }

    request.terminal_type = ship_details.terminal_type();
    request.ship_details.0 = ship_details;
    store.save_request(&request).await
}

/// draft/returned -> submitted, once the details are complete
#[tracing::instrument(skip(store), fields(actor = %actor.email))]
pub async fn submit(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<CardRequest> {
    let mut request = get(store, id).await?;
    require_owner(&request, actor)?;

    request
        .ship_details
        .validate_complete(request.environment)
        .map_err(AppError::Validation)?;

    advance(&mut request, RequestStatus::Submitted)?;
    // Each submission is verified afresh
    request.sn_status_verify = false;

    store.save_request(&request).await
}

#[tracing::instrument(skip(store), fields(actor = %actor.email))]
pub async fn set_sn_status_verify(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    verified: bool,
) -> Result<CardRequest> {
    require_reviewer(actor)?;
    let mut request = get(store, id).await?;
    require_status(&request, RequestStatus::Submitted)?;

    request.sn_status_verify = verified;
    store.save_request(&request).await
}

/// submitted -> approved | returned
#[tracing::instrument(skip(store), fields(actor = %actor.email))]
pub async fn review(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    decision: ReviewDecision,
) -> Result<CardRequest> {
    require_reviewer(actor)?;
    let mut request = get(store, id).await?;
    require_status(&request, RequestStatus::Submitted)?;

    match decision {
        ReviewDecision::Approve => {
            if !request.sn_status_verify {
                return Err(AppError::Validation(
                    "Serial number status must be verified before approval".to_string(),
                ));
            }
            advance(&mut request, RequestStatus::Approved)?;
        }
        ReviewDecision::Return { comment } => {
            let comment = comment.trim();
            if comment.is_empty() {
                return Err(AppError::Validation(
                    "A comment is required when returning a request".to_string(),
                ));
            }
            request.reviewer_comment = Some(comment.to_string());
            advance(&mut request, RequestStatus::Returned)?;
        }
    }

    store.save_request(&request).await
}

/// approved -> assign_card.
///
/// Runs the assignment engine for every tester that does not yet hold a
/// live card on this request. The status only advances once all testers
/// are assigned; otherwise the request stays approved and the report says
/// who to retry.
#[tracing::instrument(skip(store, overrides), fields(actor = %actor.email))]
pub async fn assign(
    store: &Arc<dyn Store>,
    actor: &Actor,
    id: Uuid,
    overrides: &HashMap<String, TesterOverrides>,
    timeout: Duration,
) -> Result<AssignOutcome> {
    require_admin(actor)?;
    let mut request = get(store.as_ref(), id).await?;
    require_status(&request, RequestStatus::Approved)?;

    let selection = request
        .ship_details
        .selection(request.environment)
        .map_err(AppError::Validation)?;

    let held: HashSet<String> = store
        .assignments_for_request(request.id)
        .await?
        .into_iter()
        .filter(UserCardAssignment::is_live)
        .map(|a| a.tester_email)
        .collect();

    let pending: Vec<_> = request
        .ship_details
        .testers()
        .into_iter()
        .filter(|t| !held.contains(&t.normalized_email()))
        .cloned()
        .collect();

    let report = if pending.is_empty() {
        None
    } else {
        Some(
            assignment::assign(
                store,
                request.id,
                request.environment,
                &pending,
                &selection,
                overrides,
                timeout,
            )
            .await?,
        )
    };

    if report.as_ref().map_or(true, AssignmentReport::is_complete) {
        advance(&mut request, RequestStatus::AssignCard)?;
        request = store.save_request(&request).await?;
    } else if let Some(report) = &report {
        tracing::warn!(
            request_id = %request.id,
            failed = report.failed.len(),
            "Request stays approved until remaining testers are assigned"
        );
    }

    Ok(AssignOutcome { request, report })
}

/// assign_card -> shipped, with one shipment record per address group
#[tracing::instrument(skip(store, shipments), fields(actor = %actor.email))]
pub async fn ship(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    shipments: Vec<ShipmentRecord>,
) -> Result<CardRequest> {
    require_admin(actor)?;
    let mut request = get(store, id).await?;
    require_status(&request, RequestStatus::AssignCard)?;

    if !request.ship_details.requires_shipment() {
        return Err(AppError::Authorization(
            "Request completes at card assignment and is not shipped".to_string(),
        ));
    }

    let groups = request.ship_details.group_count();
    let mut covered = HashSet::new();
    for shipment in &shipments {
        if shipment.group_index >= groups {
            return Err(AppError::Validation(format!(
                "Shipment refers to group {} but the request has {}",
                shipment.group_index + 1,
                groups
            )));
        }
        if shipment.tracking_number.trim().is_empty() {
            return Err(AppError::Validation(
                "Tracking number is required".to_string(),
            ));
        }
        if !covered.insert(shipment.group_index) {
            return Err(AppError::Validation(format!(
                "Group {} has more than one shipment",
                shipment.group_index + 1
            )));
        }
    }
    if covered.len() != groups {
        return Err(AppError::Validation(format!(
            "{} of {} address groups have shipment details",
            covered.len(),
            groups
        )));
    }

    request.shipments.0 = shipments;
    advance(&mut request, RequestStatus::Shipped)?;
    store.save_request(&request).await
}
