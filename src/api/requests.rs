use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::api::middleware::state::AppState;
use crate::error::AppError;
use crate::models::{
    actor::Actor,
    card::Environment,
    card_request::{CardRequest, ShipDetails, ShipmentRecord},
    UserCardAssignment,
};
use crate::services::{
    assignment::TesterOverrides,
    lifecycle::{self, AssignOutcome, ReviewDecision, Step},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequestBody {
    environment: Environment,
    ship_details: ShipDetails,
}

#[derive(Debug, Deserialize)]
struct SnVerifyBody {
    verified: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AssignBody {
    /// Keyed by tester email
    #[serde(default)]
    overrides: HashMap<String, TesterOverrides>,
}

#[derive(Debug, Deserialize)]
struct ShipBody {
    shipments: Vec<ShipmentRecord>,
}

/// A request as seen by the caller: persisted record, what they may do
/// next and who holds which card.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestView {
    #[serde(flatten)]
    request: CardRequest,
    enabled_steps: Vec<Step>,
    assignments: Vec<UserCardAssignment>,
}

async fn view(
    state: &AppState,
    actor: &Actor,
    request: CardRequest,
) -> Result<RequestView, AppError> {
    let assignments = state.store.assignments_for_request(request.id).await?;
    Ok(RequestView {
        enabled_steps: lifecycle::enabled_steps(&request, actor),
        request,
        assignments,
    })
}

/// Create a draft request
async fn create_request(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestView>), AppError> {
    let request =
        lifecycle::create(state.store.as_ref(), &actor, body.environment, body.ship_details)
            .await?;
    Ok((StatusCode::CREATED, Json(view(&state, &actor, request).await?)))
}

/// Get a request (JSON)
async fn get_request(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestView>, AppError> {
    let request = lifecycle::get(state.store.as_ref(), id).await?;
    Ok(Json(view(&state, &actor, request).await?))
}

/// Replace ship details while the request is editable
async fn update_details(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(details): Json<ShipDetails>,
) -> Result<Json<RequestView>, AppError> {
    let request = lifecycle::update_details(state.store.as_ref(), &actor, id, details).await?;
    Ok(Json(view(&state, &actor, request).await?))
}

async fn submit(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestView>, AppError> {
    let request = lifecycle::submit(state.store.as_ref(), &actor, id).await?;
    Ok(Json(view(&state, &actor, request).await?))
}

async fn sn_verify(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<SnVerifyBody>,
) -> Result<Json<RequestView>, AppError> {
    let request =
        lifecycle::set_sn_status_verify(state.store.as_ref(), &actor, id, body.verified).await?;
    Ok(Json(view(&state, &actor, request).await?))
}

async fn review(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(decision): Json<ReviewDecision>,
) -> Result<Json<RequestView>, AppError> {
    let request = lifecycle::review(state.store.as_ref(), &actor, id, decision).await?;
    Ok(Json(view(&state, &actor, request).await?))
}

/// Assign cards. Returns 200 when every tester holds a card and 207 when
/// some still need a retry.
async fn assign(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignBody>,
) -> Result<(StatusCode, Json<AssignOutcome>), AppError> {
    let outcome = lifecycle::assign(
        &state.store,
        &actor,
        id,
        &body.overrides,
        state.config.assignment_timeout(),
    )
    .await?;

    let complete = outcome
        .report
        .as_ref()
        .map_or(true, |report| report.is_complete());
    let status = if complete {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };

    Ok((status, Json(outcome)))
}

async fn ship(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<ShipBody>,
) -> Result<Json<RequestView>, AppError> {
    let request = lifecycle::ship(state.store.as_ref(), &actor, id, body.shipments).await?;
    Ok(Json(view(&state, &actor, request).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/details", put(update_details))
        .route("/requests/:id/submit", post(submit))
        .route("/requests/:id/sn-verify", post(sn_verify))
        .route("/requests/:id/review", post(review))
        .route("/requests/:id/assign", post(assign))
        .route("/requests/:id/ship", post(ship))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::api::test_support::{app, app_with, body_json, config};
    use crate::db::MemoryStore;
    use std::time::Duration;
    use crate::models::card::TerminalType;
    use crate::services::assignment::fixtures::seed_defaults;
    use crate::services::card_vault::fixtures::{active_issuer, pos_criteria, stock};

    fn call(method: &str, uri: &str, role: &str, email: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-email", email)
            .header("x-user-role", role)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn pos_body() -> Value {
        json!({
            "environment": "qa",
            "shipDetails": {
                "terminalType": "Pos",
                "binProduct": "Debit",
                "feature": "transit",
                "region": "Domestic",
                "bundleName": null,
                "shipTo": "address",
                "groups": [{
                    "address": {
                        "recipient": "Lab Desk",
                        "line1": "1 Test Street",
                        "line2": null,
                        "city": "Springfield",
                        "state": null,
                        "postalCode": "12345",
                        "country": "US",
                        "phone": null
                    },
                    "testers": [{"name": "Ana", "email": "Ana@Example.com"}]
                }]
            }
        })
    }

    #[tokio::test]
    async fn test_request_flow_over_http() {
        let (router, store) = app();
        seed_defaults(store.as_ref()).await;
        let issuer = active_issuer(store.as_ref(), TerminalType::Pos).await;
        stock(store.as_ref(), &issuer, &pos_criteria(Environment::Qa), 1).await;

        let res = router
            .clone()
            .oneshot(call("POST", "/requests", "requester", "req@example.com", pos_body()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = body_json(res).await;
        assert_eq!(created["status"], "draft");
        assert_eq!(created["enabledSteps"], json!(["edit_details", "submit"]));
        let id = created["id"].as_str().unwrap().to_string();

        let steps = [
            ("requester", "req@example.com", "submit", json!({})),
            ("reviewer", "rev@example.com", "sn-verify", json!({"verified": true})),
            ("reviewer", "rev@example.com", "review", json!({"decision": "approve"})),
        ];
        for (role, email, action, body) in steps {
            let res = router
                .clone()
                .oneshot(call(
                    "POST",
                    &format!("/requests/{}/{}", id, action),
                    role,
                    email,
                    body,
                ))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "step {}", action);
        }

        let res = router
            .clone()
            .oneshot(call(
                "POST",
                &format!("/requests/{}/assign", id),
                "admin",
                "admin@example.com",
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let outcome = body_json(res).await;
        assert_eq!(outcome["request"]["status"], "assign_card");
        assert_eq!(
            outcome["report"]["succeeded"][0]["testerEmail"],
            "ana@example.com"
        );

        let res = router
            .clone()
            .oneshot(call(
                "GET",
                &format!("/requests/{}", id),
                "admin",
                "admin@example.com",
                Value::Null,
            ))
            .await
            .unwrap();
        let fetched = body_json(res).await;
        assert_eq!(fetched["enabledSteps"], json!(["ship"]));
        assert_eq!(fetched["assignments"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_without_sn_verify_is_bad_request() {
        let (router, _store) = app();
        let res = router
            .clone()
            .oneshot(call("POST", "/requests", "requester", "req@example.com", pos_body()))
            .await
            .unwrap();
        let id = body_json(res).await["id"].as_str().unwrap().to_string();

        router
            .clone()
            .oneshot(call(
                "POST",
                &format!("/requests/{}/submit", id),
                "requester",
                "req@example.com",
                json!({}),
            ))
            .await
            .unwrap();

        let res = router
            .clone()
            .oneshot(call(
                "POST",
                &format!("/requests/{}/review", id),
                "reviewer",
                "rev@example.com",
                json!({"decision": "approve"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let (router, _store) = app();
        let res = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/requests")
                    .header("content-type", "application/json")
                    .body(Body::from(pos_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_insufficient_inventory_is_unprocessable() {
        let (router, store) = app();
        seed_defaults(store.as_ref()).await;

        let res = router
            .clone()
            .oneshot(call("POST", "/requests", "requester", "req@example.com", pos_body()))
            .await
            .unwrap();
        let id = body_json(res).await["id"].as_str().unwrap().to_string();
        for (role, action, body) in [
            ("requester", "submit", json!({})),
            ("reviewer", "sn-verify", json!({"verified": true})),
            ("reviewer", "review", json!({"decision": "approve"})),
        ] {
            router
                .clone()
                .oneshot(call(
                    "POST",
                    &format!("/requests/{}/{}", id, action),
                    role,
                    "req@example.com",
                    body,
                ))
                .await
                .unwrap();
        }

        let res = router
            .clone()
            .oneshot(call(
                "POST",
                &format!("/requests/{}/assign", id),
                "admin",
                "admin@example.com",
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_partial_assignment_is_multi_status() {
        let mut slow = config();
        slow.assignment_timeout_ms = 50;
        let (router, store) = app_with(
            MemoryStore::with_insert_delay(Duration::from_millis(300)),
            slow,
        );
        seed_defaults(store.as_ref()).await;
        let issuer = active_issuer(store.as_ref(), TerminalType::Pos).await;
        stock(store.as_ref(), &issuer, &pos_criteria(Environment::Qa), 1).await;

        let res = router
            .clone()
            .oneshot(call("POST", "/requests", "requester", "req@example.com", pos_body()))
            .await
            .unwrap();
        let id = body_json(res).await["id"].as_str().unwrap().to_string();
        for (role, email, action, body) in [
            ("requester", "req@example.com", "submit", json!({})),
            ("reviewer", "rev@example.com", "sn-verify", json!({"verified": true})),
            ("reviewer", "rev@example.com", "review", json!({"decision": "approve"})),
        ] {
            let res = router
                .clone()
                .oneshot(call(
                    "POST",
                    &format!("/requests/{}/{}", id, action),
                    role,
                    email,
                    body,
                ))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "step {}", action);
        }

        let assign_call = || {
            call(
                "POST",
                &format!("/requests/{}/assign", id),
                "admin",
                "admin@example.com",
                json!({}),
            )
        };

        let res = router.clone().oneshot(assign_call()).await.unwrap();
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        let outcome = body_json(res).await;
        assert_eq!(outcome["request"]["status"], "approved");
        assert_eq!(outcome["report"]["failed"][0]["kind"], "timed_out");
        assert_eq!(
            outcome["report"]["failed"][0]["tester"]["email"],
            "ana@example.com"
        );

        tokio::time::sleep(Duration::from_millis(600)).await;

        let res = router.clone().oneshot(assign_call()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let outcome = body_json(res).await;
        assert_eq!(outcome["request"]["status"], "assign_card");
        assert!(outcome["report"].is_null());
    }
}
