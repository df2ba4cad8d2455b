use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::api::middleware::{auth::require_admin, state::AppState};
use crate::error::AppError;
use crate::models::{actor::Actor, card::Environment, SystemDefaults};
use crate::services::system_defaults::{self, UpdateDefaults};

async fn get_defaults(
    State(state): State<AppState>,
    _actor: Actor,
    Path(environment): Path<Environment>,
) -> Result<Json<SystemDefaults>, AppError> {
    Ok(Json(
        system_defaults::get(state.store.as_ref(), environment).await?,
    ))
}

async fn put_defaults(
    State(state): State<AppState>,
    actor: Actor,
    Path(environment): Path<Environment>,
    Json(update): Json<UpdateDefaults>,
) -> Result<Json<SystemDefaults>, AppError> {
    require_admin(&actor)?;
    let saved = system_defaults::upsert(state.store.as_ref(), environment, update).await?;
    Ok(Json(saved))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/defaults/:environment",
        get(get_defaults).put(put_defaults),
    )
}
