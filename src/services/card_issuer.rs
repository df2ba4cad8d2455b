use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Store;
use crate::error::AppError;
use crate::models::card::{
    AssignmentStatus, BinProduct, CardRecord, CreateCardData, Environment, Feature, OperStatus,
    Region, TerminalType,
};
use crate::services::encryption::{
    decrypt_payload, encrypt_payload, CardPayload, DecryptedPayload, EncryptionError, FieldKey,
};

#[derive(thiserror::Error, Debug)]
pub enum CardIssuanceError {
    #[error("Issuer not found")]
    IssuerNotFound,

    #[error("Issuer {0} is not active")]
    IssuerNotActive(String),

    #[error("Issuer handles {issuer:?} cards, not {requested:?}")]
    TerminalTypeMismatch {
        issuer: TerminalType,
        requested: TerminalType,
    },

    #[error("Invalid card data: {0}")]
    InvalidCard(String),

    #[error("Failed to encrypt card payload: {0}")]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<CardIssuanceError> for AppError {
    fn from(err: CardIssuanceError) -> Self {
        match err {
            CardIssuanceError::IssuerNotFound => AppError::NotFound("Issuer".to_string()),
            CardIssuanceError::Store(inner) => inner,
            CardIssuanceError::Encryption(e) => AppError::Internal(anyhow::anyhow!(e)),
            other => AppError::Validation(other.to_string()),
        }
    }
}

/// Request to add a card to the vault
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCardRequest {
    pub issuer_id: Uuid,
    pub bin: String,
    pub bin_product: BinProduct,
    pub feature: Option<Feature>,
    pub region: Option<Region>,
    pub environment: Environment,
    pub card_type: TerminalType,
    pub payload: CardPayload,
}

/// A card record with its sensitive fields opened for display
#[derive(Debug, Clone, Serialize)]
pub struct CardView {
    #[serde(flatten)]
    pub card: CardRecord,
    pub payload: DecryptedPayload,
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

fn valid_expiry(expiry: &str) -> bool {
    match expiry.split_once('/') {
        Some((month, year))
            if month.len() == 2 && year.len() == 2 && all_digits(month) && all_digits(year) =>
        {
            matches!(month.parse::<u8>(), Ok(1..=12))
        }
        _ => false,
    }
}

/// Field rules per terminal type. Pos cards carry feature, region and PIN;
/// Ecomm cards carry none of them.
fn validate_card(request: &IssueCardRequest) -> Result<(), CardIssuanceError> {
    let invalid = |msg: &str| Err(CardIssuanceError::InvalidCard(msg.to_string()));
    let payload = &request.payload;

    if !all_digits(&request.bin) || !(6..=8).contains(&request.bin.len()) {
        return invalid("BIN must be 6 to 8 digits");
    }
    if !all_digits(&payload.pan) || !(12..=19).contains(&payload.pan.len()) {
        return invalid("PAN must be 12 to 19 digits");
    }
    if !payload.pan.starts_with(&request.bin) {
        return invalid("PAN does not start with the BIN");
    }
    if !all_digits(&payload.cvv) || !(3..=4).contains(&payload.cvv.len()) {
        return invalid("CVV must be 3 or 4 digits");
    }
    if !valid_expiry(&payload.expiry) {
        return invalid("Expiry must be MM/YY");
    }
    if payload.cardholder_name.trim().is_empty() {
        return invalid("Cardholder name is required");
    }

    match request.card_type {
        TerminalType::Pos => {
            if request.feature.is_none() || request.region.is_none() {
                return invalid("Pos cards need a feature and a region");
            }
            match payload.pin.as_deref() {
                Some(pin) if all_digits(pin) && (4..=6).contains(&pin.len()) => {}
                _ => return invalid("Pos cards need a 4 to 6 digit PIN"),
            }
        }
        TerminalType::Ecomm => {
            if request.feature.is_some() || request.region.is_some() {
                return invalid("Ecomm cards do not carry a feature or region");
            }
            if payload.pin.is_some() {
                return invalid("Ecomm cards do not carry a PIN");
            }
        }
    }

    Ok(())
}

/// Issues a new card into the vault
///
/// 1. Validates the issuer exists, is active and matches the card type
/// 2. Validates the card fields for its terminal type
/// 3. Encrypts the sensitive payload
/// 4. Stores the card unassigned and active
#[tracing::instrument(skip(store, key, request), fields(issuer_id = %request.issuer_id))]
pub async fn issue_card(
    store: &dyn Store,
    key: &FieldKey,
    request: IssueCardRequest,
) -> Result<CardRecord, CardIssuanceError> {
    // 1. Load and gate issuer
    let issuer = store
        .find_issuer(request.issuer_id)
        .await?
        .ok_or(CardIssuanceError::IssuerNotFound)?;

    if !issuer.is_issuable() {
        return Err(CardIssuanceError::IssuerNotActive(issuer.name));
    }
    if issuer.terminal_type != request.card_type {
        return Err(CardIssuanceError::TerminalTypeMismatch {
            issuer: issuer.terminal_type,
            requested: request.card_type,
        });
    }

    // 2. Field rules
    validate_card(&request)?;

    // 3. Encrypt
    let encrypted = encrypt_payload(key, &request.payload)?;

    // 4. Store
    let card = store
        .insert_card(CreateCardData {
            issuer_id: issuer.id,
            bin: request.bin,
            bin_product: request.bin_product,
            feature: request.feature,
            region: request.region,
            environment: request.environment,
            card_type: request.card_type,
            ciphertext: encrypted.ciphertext,
            iv: encrypted.iv,
        })
        .await?;

    tracing::info!(
        card_id = %card.id,
        environment = ?card.environment,
        card_type = ?card.card_type,
        "Card issued"
    );

    Ok(card)
}

async fn load(store: &dyn Store, id: Uuid) -> crate::error::Result<CardRecord> {
    store
        .find_card(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Card {}", id)))
}

/// Undecryptable payloads come back as `Unavailable`, never as an error.
#[tracing::instrument(skip(store, key))]
pub async fn card_view(
    store: &dyn Store,
    key: &FieldKey,
    id: Uuid,
) -> crate::error::Result<CardView> {
    let card = load(store, id).await?;
    let payload = decrypt_payload(key, &card.ciphertext, &card.iv);

    if !payload.is_available() {
        tracing::debug!(card_id = %id, "Card payload not available for display");
    }

    Ok(CardView { card, payload })
}

#[tracing::instrument(skip(store))]
pub async fn set_oper_status(
    store: &dyn Store,
    id: Uuid,
    status: OperStatus,
) -> crate::error::Result<CardRecord> {
    if !store.set_card_oper_status(id, status).await? {
        return Err(AppError::NotFound(format!("Card {}", id)));
    }
    tracing::info!(card_id = %id, status = ?status, "Card operational status changed");
    load(store, id).await
}

/// Marks a card deleted. Assigned cards must be unassigned first.
#[tracing::instrument(skip(store))]
pub async fn soft_delete(store: &dyn Store, id: Uuid) -> crate::error::Result<CardRecord> {
    let card = load(store, id).await?;
    if card.assignment_status == AssignmentStatus::Assigned {
        return Err(AppError::Conflict(format!(
            "Card {} is assigned; unassign it before deleting",
            id
        )));
    }

    store.soft_delete_card(id).await?;
    tracing::info!(card_id = %id, "Card soft-deleted");
    load(store, id).await
}

/// Returns an assigned card to the pool and closes its live assignment.
#[tracing::instrument(skip(store))]
pub async fn unassign_card(store: &dyn Store, id: Uuid) -> crate::error::Result<CardRecord> {
    let card = load(store, id).await?;
    if card.assignment_status != AssignmentStatus::Assigned {
        return Err(AppError::Conflict(format!("Card {} is not assigned", id)));
    }

    if let Some(assignment) = store.live_assignment_for_card(id).await? {
        store.mark_assignment_released(assignment.id).await?;
        tracing::debug!(assignment_id = %assignment.id, "Assignment released");
    }

    if !store.release_card(id).await? {
        return Err(AppError::Conflict(format!(
            "Card {} was released concurrently",
            id
        )));
    }

    tracing::info!(card_id = %id, "Card unassigned");
    load(store, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::issuer::CreateIssuerData;
    use crate::services::card_vault::fixtures::{active_issuer, key, pos_criteria, stock};
    use crate::services::encryption::encrypt;

    fn pos_request(issuer_id: Uuid) -> IssueCardRequest {
        IssueCardRequest {
            issuer_id,
            bin: "400012".to_string(),
            bin_product: BinProduct::Debit,
            feature: Some(Feature::Transit),
            region: Some(Region::Domestic),
            environment: Environment::Qa,
            card_type: TerminalType::Pos,
            payload: CardPayload {
                pan: "4000123412341234".to_string(),
                cvv: "123".to_string(),
                pin: Some("1234".to_string()),
                expiry: "12/29".to_string(),
                cardholder_name: "QA Tester".to_string(),
                billing_address: None,
            },
        }
    }

    #[tokio::test]
    async fn test_issue_and_view_card() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;

        let card = issue_card(&store, key(), pos_request(issuer.id))
            .await
            .unwrap();
        assert_eq!(card.assignment_status, AssignmentStatus::Unassigned);
        assert_eq!(card.oper_status, OperStatus::Active);
        assert!(!card.ciphertext.contains("4000123412341234"));

        let view = card_view(&store, key(), card.id).await.unwrap();
        match view.payload {
            DecryptedPayload::Available(p) => assert_eq!(p.pan, "4000123412341234"),
            other => panic!("expected payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_draft_issuer_cannot_issue() {
        let store = MemoryStore::new();
        let issuer = store
            .insert_issuer(CreateIssuerData {
                name: "Draft Bank".to_string(),
                terminal_type: TerminalType::Pos,
                secured_connection: true,
            })
            .await
            .unwrap();

        let result = issue_card(&store, key(), pos_request(issuer.id)).await;
        assert!(matches!(result, Err(CardIssuanceError::IssuerNotActive(_))));
    }

    #[tokio::test]
    async fn test_pos_card_requires_pin_and_feature() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;

        let mut no_pin = pos_request(issuer.id);
        no_pin.payload.pin = None;
        assert!(matches!(
            issue_card(&store, key(), no_pin).await,
            Err(CardIssuanceError::InvalidCard(_))
        ));

        let mut no_feature = pos_request(issuer.id);
        no_feature.feature = None;
        let err: AppError = issue_card(&store, key(), no_feature)
            .await
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ecomm_card_rejects_pos_fields() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Ecomm).await;

        let mut request = pos_request(issuer.id);
        request.card_type = TerminalType::Ecomm;
        request.bin_product = BinProduct::Credit;
        assert!(matches!(
            issue_card(&store, key(), request.clone()).await,
            Err(CardIssuanceError::InvalidCard(_))
        ));

        request.feature = None;
        request.region = None;
        request.payload.pin = None;
        assert!(issue_card(&store, key(), request).await.is_ok());
    }

    #[tokio::test]
    async fn test_mismatched_terminal_type_rejected() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Ecomm).await;

        let result = issue_card(&store, key(), pos_request(issuer.id)).await;
        assert!(matches!(
            result,
            Err(CardIssuanceError::TerminalTypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupted_payload_view_is_unavailable() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let criteria = pos_criteria(Environment::Qa);

        // Valid ciphertext, but not a card payload
        let junk = encrypt(key(), "legacy free text").unwrap();
        let card = store
            .insert_card(CreateCardData {
                issuer_id: issuer.id,
                bin: "400012".to_string(),
                bin_product: criteria.bin_product,
                feature: criteria.feature,
                region: criteria.region,
                environment: criteria.environment,
                card_type: criteria.terminal_type,
                ciphertext: junk.ciphertext,
                iv: junk.iv,
            })
            .await
            .unwrap();

        let view = card_view(&store, key(), card.id).await.unwrap();
        assert_eq!(view.payload, DecryptedPayload::Unavailable);
    }

    #[tokio::test]
    async fn test_unassign_releases_card_and_assignment() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let cards = stock(&store, &issuer, &pos_criteria(Environment::Qa), 1).await;
        let card_id = cards[0].id;

        assert!(matches!(
            unassign_card(&store, card_id).await,
            Err(AppError::Conflict(_))
        ));

        assert!(store.try_mark_assigned(card_id).await.unwrap());
        let assignment = store
            .insert_assignment(crate::models::assignment::CreateAssignmentData {
                request_id: Uuid::new_v4(),
                card_id: Some(card_id),
                bundle_id: None,
                environment: Environment::Qa,
                tester_name: "Ana".to_string(),
                tester_email: "ana@example.com".to_string(),
                limits: crate::models::assignment::UsageLimits {
                    offline_days: 1,
                    online_usages: 1,
                    total_usage: 1,
                    last_use_date: chrono::Utc::now().date_naive(),
                },
                transaction_limits: Default::default(),
                allowed_mccs: vec![],
                allowed_countries: vec![],
            })
            .await
            .unwrap();

        // Assigned cards cannot be deleted
        assert!(matches!(
            soft_delete(&store, card_id).await,
            Err(AppError::Conflict(_))
        ));

        let card = unassign_card(&store, card_id).await.unwrap();
        assert_eq!(card.assignment_status, AssignmentStatus::Unassigned);
        assert!(store
            .live_assignment_for_card(card_id)
            .await
            .unwrap()
            .is_none());
        assert!(!store
            .mark_assignment_released(assignment.id)
            .await
            .unwrap());

        let deleted = soft_delete(&store, card_id).await.unwrap();
        assert!(deleted.is_deleted);
    }

    #[tokio::test]
    async fn test_block_unknown_card_is_not_found() {
        let store = MemoryStore::new();
        let result = set_oper_status(&store, Uuid::new_v4(), OperStatus::Blocked).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let cards = stock(&store, &issuer, &pos_criteria(Environment::Qa), 1).await;
        let blocked = set_oper_status(&store, cards[0].id, OperStatus::Blocked)
            .await
            .unwrap();
        assert_eq!(blocked.oper_status, OperStatus::Blocked);
    }
}
