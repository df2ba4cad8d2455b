use uuid::Uuid;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::issuer::{CreateIssuerData, Issuer, IssuerStatus};

/// Registers an issuer in draft status
#[tracing::instrument(skip(store, data), fields(name = %data.name))]
pub async fn create_issuer(store: &dyn Store, data: CreateIssuerData) -> Result<Issuer> {
    if data.name.trim().is_empty() {
        return Err(AppError::Validation("Issuer name is required".to_string()));
    }

    let issuer = store
        .insert_issuer(CreateIssuerData {
            name: data.name.trim().to_string(),
            ..data
        })
        .await?;

    tracing::info!(issuer_id = %issuer.id, terminal_type = ?issuer.terminal_type, "Issuer created");

    Ok(issuer)
}

/// Moves an issuer between active, draft and inactive.
///
/// Deactivating only stops new cards from surfacing in the vault;
/// cards already assigned from this issuer stay assigned.
#[tracing::instrument(skip(store))]
pub async fn set_issuer_status(
    store: &dyn Store,
    id: Uuid,
    status: IssuerStatus,
) -> Result<Issuer> {
    let issuer = store
        .find_issuer(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Issuer {}", id)))?;

    issuer
        .check_status_change(status)
        .map_err(AppError::Validation)?;

    store.set_issuer_status(id, status).await?;

    tracing::info!(issuer_id = %id, from = ?issuer.status, to = ?status, "Issuer status changed");

    store
        .find_issuer(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Issuer {}", id)))
}
