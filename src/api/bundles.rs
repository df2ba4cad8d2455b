use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{auth::require_admin, state::AppState};
use crate::error::AppError;
use crate::models::{actor::Actor, card::Environment};
use crate::services::bundle_vault::{self, BundleSnapshot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBundleBody {
    environment: Environment,
    bundle_name: String,
    total: i32,
}

#[derive(Debug, Deserialize)]
struct UpdateBundleBody {
    total: i32,
}

async fn create_bundle(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateBundleBody>,
) -> Result<(StatusCode, Json<BundleSnapshot>), AppError> {
    require_admin(&actor)?;
    let bundle = bundle_vault::create(
        state.store.as_ref(),
        body.environment,
        &body.bundle_name,
        body.total,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

async fn update_bundle(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateBundleBody>,
) -> Result<Json<BundleSnapshot>, AppError> {
    require_admin(&actor)?;
    let bundle = bundle_vault::update(state.store.as_ref(), id, body.total).await?;
    Ok(Json(bundle))
}

async fn get_bundle(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<BundleSnapshot>, AppError> {
    Ok(Json(bundle_vault::get(state.store.as_ref(), id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bundles", post(create_bundle))
        .route("/bundles/:id", get(get_bundle).put(update_bundle))
}
