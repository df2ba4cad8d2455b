use crate::db::Store;
use crate::error::Result;
use crate::models::card::{CardCriteria, CardRecord};

/// Cards matching every given criterion, oldest first.
///
/// Deleted and blocked cards and cards from issuers that are not currently
/// issuable are never returned.
#[tracing::instrument(skip(store))]
pub async fn find(store: &dyn Store, criteria: &CardCriteria) -> Result<Vec<CardRecord>> {
    let cards = store.find_cards(criteria).await?;
    tracing::debug!(matched = cards.len(), "Vault query completed");
    Ok(cards)
}

/// Vault count: how many cards `find` would currently return
#[tracing::instrument(skip(store))]
pub async fn count(store: &dyn Store, criteria: &CardCriteria) -> Result<i64> {
    store.count_cards(criteria).await
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::OnceLock;

    use crate::db::Store;
    use crate::models::card::{
        BinProduct, CardCriteria, CardRecord, CreateCardData, Environment, Feature, Region,
        TerminalType,
    };
    use crate::models::issuer::{CreateIssuerData, Issuer, IssuerStatus};
    use crate::services::encryption::{encrypt_payload, CardPayload, FieldKey};

    pub fn key() -> &'static FieldKey {
        static KEY: OnceLock<FieldKey> = OnceLock::new();
        KEY.get_or_init(|| FieldKey::derive("fixture-passphrase"))
    }

    pub fn payload() -> CardPayload {
        CardPayload {
            pan: "4000123412341234".to_string(),
            cvv: "321".to_string(),
            pin: None,
            expiry: "01/30".to_string(),
            cardholder_name: "Vault Fixture".to_string(),
            billing_address: None,
        }
    }

    pub async fn active_issuer(store: &dyn Store, terminal_type: TerminalType) -> Issuer {
        let issuer = store
            .insert_issuer(CreateIssuerData {
                name: "Fixture Bank".to_string(),
                terminal_type,
                secured_connection: true,
            })
            .await
            .unwrap();
        store
            .set_issuer_status(issuer.id, IssuerStatus::Active)
            .await
            .unwrap();
        store.find_issuer(issuer.id).await.unwrap().unwrap()
    }

    pub fn pos_criteria(environment: Environment) -> CardCriteria {
        CardCriteria {
            bin_product: BinProduct::Debit,
            feature: Some(Feature::Transit),
            region: Some(Region::Domestic),
            environment,
            terminal_type: TerminalType::Pos,
            assignment_status: crate::models::card::AssignmentStatus::Unassigned,
        }
    }

    /// Inserts `n` cards that match `criteria` under `issuer`
    pub async fn stock(
        store: &dyn Store,
        issuer: &Issuer,
        criteria: &CardCriteria,
        n: usize,
    ) -> Vec<CardRecord> {
        let mut cards = Vec::with_capacity(n);
        for i in 0..n {
            let encrypted = encrypt_payload(key(), &payload()).unwrap();
            let card = store
                .insert_card(CreateCardData {
                    issuer_id: issuer.id,
                    bin: format!("40001{}", i),
                    bin_product: criteria.bin_product,
                    feature: criteria.feature,
                    region: criteria.region,
                    environment: criteria.environment,
                    card_type: criteria.terminal_type,
                    ciphertext: encrypted.ciphertext,
                    iv: encrypted.iv,
                })
                .await
                .unwrap();
            cards.push(card);
        }
        cards
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::card::{Environment, OperStatus, Region, TerminalType};
    use crate::models::issuer::IssuerStatus;

    #[tokio::test]
    async fn test_find_is_ordered_and_exact() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let criteria = pos_criteria(Environment::Qa);
        let stocked = stock(&store, &issuer, &criteria, 3).await;

        let mut global = criteria.clone();
        global.region = Some(Region::Global);
        stock(&store, &issuer, &global, 2).await;

        let found = find(&store, &criteria).await.unwrap();
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        let expected: Vec<_> = stocked.iter().map(|c| c.id).collect();
        assert_eq!(ids, expected);

        // Repeated queries return the same order
        let again = find(&store, &criteria).await.unwrap();
        assert_eq!(again.iter().map(|c| c.id).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_omitted_feature_and_region_are_wildcards() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let criteria = pos_criteria(Environment::Qa);
        stock(&store, &issuer, &criteria, 2).await;

        let mut global = criteria.clone();
        global.region = Some(Region::Global);
        stock(&store, &issuer, &global, 1).await;

        let mut any_region = criteria.clone();
        any_region.region = None;
        assert_eq!(count(&store, &any_region).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_deleted_and_blocked_cards_excluded() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let criteria = pos_criteria(Environment::Prod);
        let cards = stock(&store, &issuer, &criteria, 3).await;

        store.soft_delete_card(cards[0].id).await.unwrap();
        store
            .set_card_oper_status(cards[1].id, OperStatus::Blocked)
            .await
            .unwrap();

        let found = find(&store, &criteria).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, cards[2].id);
    }

    #[tokio::test]
    async fn test_inactive_issuer_hides_cards() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let criteria = pos_criteria(Environment::Prod);
        stock(&store, &issuer, &criteria, 2).await;

        store
            .set_issuer_status(issuer.id, IssuerStatus::Inactive)
            .await
            .unwrap();
        assert_eq!(count(&store, &criteria).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_assigned_cards_leave_the_count() {
        let store = MemoryStore::new();
        let issuer = active_issuer(&store, TerminalType::Pos).await;
        let criteria = pos_criteria(Environment::Qa);
        let cards = stock(&store, &issuer, &criteria, 2).await;

        assert!(store.try_mark_assigned(cards[0].id).await.unwrap());
        assert!(!store.try_mark_assigned(cards[0].id).await.unwrap());
        assert_eq!(count(&store, &criteria).await.unwrap(), 1);
    }
}
