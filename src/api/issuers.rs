use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{auth::require_admin, state::AppState};
use crate::error::AppError;
use crate::models::{
    actor::Actor,
    issuer::{CreateIssuerData, Issuer, IssuerStatus},
};
use crate::services::issuer_directory;

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: IssuerStatus,
}

/// Create a new issuer
async fn create_issuer(
    State(state): State<AppState>,
    actor: Actor,
    Json(data): Json<CreateIssuerData>,
) -> Result<(StatusCode, Json<Issuer>), AppError> {
    require_admin(&actor)?;
    let issuer = issuer_directory::create_issuer(state.store.as_ref(), data).await?;
    Ok((StatusCode::CREATED, Json(issuer)))
}

/// Change issuer status
async fn set_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Issuer>, AppError> {
    require_admin(&actor)?;
    let issuer = issuer_directory::set_issuer_status(state.store.as_ref(), id, body.status).await?;
    Ok(Json(issuer))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/issuers", post(create_issuer))
        .route("/issuers/:id/status", post(set_status))
}
