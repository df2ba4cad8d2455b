use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::{auth::require_admin, state::AppState};
use crate::error::AppError;
use crate::models::{
    actor::Actor,
    card::{CardCriteria, CardRecord, OperStatus},
};
use crate::services::{
    card_issuer::{self, CardView, IssueCardRequest},
    card_vault,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperStatusBody {
    oper_status: OperStatus,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: i64,
}

/// Issue a card into the vault
async fn issue_card(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<IssueCardRequest>,
) -> Result<(StatusCode, Json<CardRecord>), AppError> {
    require_admin(&actor)?;
    let card = card_issuer::issue_card(state.store.as_ref(), &state.field_key, req).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// Show a card with its decrypted payload
async fn show_card(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<CardView>, AppError> {
    require_admin(&actor)?;
    let view = card_issuer::card_view(state.store.as_ref(), &state.field_key, id).await?;

    tracing::info!(card_id = %id, actor = %actor.email, "Card payload viewed");

    Ok(Json(view))
}

/// Vault count for a selection
async fn count_cards(
    State(state): State<AppState>,
    _actor: Actor,
    Json(criteria): Json<CardCriteria>,
) -> Result<Json<CountResponse>, AppError> {
    let count = card_vault::count(state.store.as_ref(), &criteria).await?;
    Ok(Json(CountResponse { count }))
}

async fn set_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<OperStatusBody>,
) -> Result<Json<CardRecord>, AppError> {
    require_admin(&actor)?;
    let card = card_issuer::set_oper_status(state.store.as_ref(), id, body.oper_status).await?;
    Ok(Json(card))
}

async fn unassign(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<CardRecord>, AppError> {
    require_admin(&actor)?;
    let card = card_issuer::unassign_card(state.store.as_ref(), id).await?;
    Ok(Json(card))
}

async fn delete_card(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_admin(&actor)?;
    card_issuer::soft_delete(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cards", post(issue_card))
        .route("/cards/count", post(count_cards))
        .route("/cards/:id", get(show_card).delete(delete_card))
        .route("/cards/:id/status", post(set_status))
        .route("/cards/:id/unassign", post(unassign))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::api::test_support::{app, body_json};
    use crate::models::card::TerminalType;
    use crate::services::card_vault::fixtures::active_issuer;

    fn admin_call(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-email", "admin@example.com")
            .header("x-user-role", "admin")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_view_count_and_delete() {
        let (router, store) = app();
        let issuer = active_issuer(store.as_ref(), TerminalType::Ecomm).await;

        let res = router
            .clone()
            .oneshot(admin_call(
                "POST",
                "/cards",
                json!({
                    "issuerId": issuer.id,
                    "bin": "511122",
                    "binProduct": "Credit",
                    "feature": null,
                    "region": null,
                    "environment": "prod",
                    "cardType": "Ecomm",
                    "payload": {
                        "pan": "5111222233334444",
                        "cvv": "999",
                        "pin": null,
                        "expiry": "08/28",
                        "cardholderName": "Web Tester",
                        "billingAddress": null
                    }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let card = body_json(res).await;
        assert!(card.get("ciphertext").is_none());
        let id = card["id"].as_str().unwrap().to_string();

        let res = router
            .clone()
            .oneshot(admin_call("GET", &format!("/cards/{}", id), Value::Null))
            .await
            .unwrap();
        let view = body_json(res).await;
        assert_eq!(view["payload"]["state"], "available");
        assert_eq!(view["payload"]["pan"], "5111222233334444");

        let criteria = json!({
            "binProduct": "Credit",
            "feature": null,
            "region": null,
            "environment": "prod",
            "terminalType": "Ecomm"
        });
        let res = router
            .clone()
            .oneshot(admin_call("POST", "/cards/count", criteria.clone()))
            .await
            .unwrap();
        assert_eq!(body_json(res).await["count"], 1);

        let res = router
            .clone()
            .oneshot(admin_call("DELETE", &format!("/cards/{}", id), Value::Null))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = router
            .clone()
            .oneshot(admin_call("POST", "/cards/count", criteria))
            .await
            .unwrap();
        assert_eq!(body_json(res).await["count"], 0);
    }

    #[tokio::test]
    async fn test_requester_cannot_view_payload() {
        let (router, _store) = app();
        let res = router
            .oneshot(
                Request::builder()
                    .uri(format!("/cards/{}", uuid::Uuid::new_v4()))
                    .header("x-user-email", "req@example.com")
                    .header("x-user-role", "requester")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
