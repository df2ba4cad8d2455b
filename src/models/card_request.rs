use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

use super::card::{BinProduct, CardCriteria, Environment, Feature, Region, TerminalType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Approved,
    Returned,
    AssignCard,
    Shipped,
}

impl RequestStatus {
    /// Edges of the lifecycle graph. Nothing leaves `shipped`.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Returned, Submitted)
                | (Submitted, Approved)
                | (Submitted, Returned)
                | (Approved, AssignCard)
                | (AssignCard, Shipped)
        )
    }

    /// Request fields can only change while the requester owns the request
    pub fn is_editable(self) -> bool {
        matches!(self, RequestStatus::Draft | RequestStatus::Returned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipTo {
    Address,
    Mobile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tester {
    pub name: String,
    pub email: String,
}

impl Tester {
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

impl Address {
    pub fn is_complete(&self) -> bool {
        [
            &self.recipient,
            &self.line1,
            &self.city,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

/// Testers receiving cards at one shipping address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentGroup {
    pub address: Option<Address>,
    pub testers: Vec<Tester>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosShipDetails {
    pub bin_product: Option<BinProduct>,
    pub feature: Option<Feature>,
    pub region: Option<Region>,
    pub bundle_name: Option<String>,
    pub ship_to: ShipTo,
    pub groups: Vec<ShipmentGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcommShipDetails {
    pub bin_product: Option<BinProduct>,
    pub bundle_name: Option<String>,
    pub testers: Vec<Tester>,
}

/// Card selection, delivery and testers, shaped by terminal type.
/// Drafts may be incomplete; completeness is checked on submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "terminalType")]
pub enum ShipDetails {
    Pos(PosShipDetails),
    Ecomm(EcommShipDetails),
}

/// Resolved card selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Cards(CardCriteria),
    Bundle { bundle_name: String },
}

impl ShipDetails {
    pub fn terminal_type(&self) -> TerminalType {
        match self {
            ShipDetails::Pos(_) => TerminalType::Pos,
            ShipDetails::Ecomm(_) => TerminalType::Ecomm,
        }
    }

    pub fn testers(&self) -> Vec<&Tester> {
        match self {
            ShipDetails::Pos(pos) => pos.groups.iter().flat_map(|g| g.testers.iter()).collect(),
            ShipDetails::Ecomm(ecomm) => ecomm.testers.iter().collect(),
        }
    }

    pub fn group_count(&self) -> usize {
        match self {
            ShipDetails::Pos(pos) => pos.groups.len(),
            ShipDetails::Ecomm(_) => 0,
        }
    }

    /// Physical shipment happens only for Pos cards sent to an address
    pub fn requires_shipment(&self) -> bool {
        matches!(self, ShipDetails::Pos(pos) if pos.ship_to == ShipTo::Address)
    }

    fn bundle_name(&self) -> Option<&str> {
        let name = match self {
            ShipDetails::Pos(pos) => pos.bundle_name.as_deref(),
            ShipDetails::Ecomm(ecomm) => ecomm.bundle_name.as_deref(),
        };
        name.map(str::trim).filter(|n| !n.is_empty())
    }

    /// Builds the inventory selection. Test environments draw from a
    /// bundle; everything else draws individual cards.
    pub fn selection(&self, environment: Environment) -> Result<Selection, String> {
        if environment.uses_bundles() {
            return self
                .bundle_name()
                .map(|name| Selection::Bundle {
                    bundle_name: name.to_string(),
                })
                .ok_or_else(|| "Bundle name is required for test requests".to_string());
        }

        let criteria = match self {
            ShipDetails::Pos(pos) => CardCriteria {
                bin_product: pos.bin_product.ok_or("BIN product is required")?,
                feature: Some(pos.feature.ok_or("Feature is required for Pos cards")?),
                region: Some(pos.region.ok_or("Region is required for Pos cards")?),
                environment,
                terminal_type: TerminalType::Pos,
                assignment_status: super::card::AssignmentStatus::Unassigned,
            },
            ShipDetails::Ecomm(ecomm) => CardCriteria {
                bin_product: ecomm.bin_product.ok_or("BIN product is required")?,
                feature: None,
                region: None,
                environment,
                terminal_type: TerminalType::Ecomm,
                assignment_status: super::card::AssignmentStatus::Unassigned,
            },
        };

        Ok(Selection::Cards(criteria))
    }

    /// Everything a request needs before it can leave draft
    pub fn validate_complete(&self, environment: Environment) -> Result<(), String> {
        self.selection(environment)?;

        if let ShipDetails::Pos(pos) = self {
            if pos.groups.is_empty() {
                return Err("At least one shipment group is required".to_string());
            }
            if pos.ship_to == ShipTo::Address {
                for (index, group) in pos.groups.iter().enumerate() {
                    let complete = group.address.as_ref().map_or(false, Address::is_complete);
                    if !complete {
                        return Err(format!("Address for group {} is incomplete", index + 1));
                    }
                }
            }
        }

        let testers = self.testers();
        if testers.is_empty() {
            return Err("At least one tester is required".to_string());
        }

        let mut seen = HashSet::new();
        for tester in testers {
            if tester.name.trim().is_empty() {
                return Err("Tester name is required".to_string());
            }
            let email = tester.normalized_email();
            if email.is_empty() || !email.contains('@') {
                return Err(format!("Tester email '{}' is invalid", tester.email));
            }
            if !seen.insert(email) {
                return Err(format!("Tester email '{}' appears more than once", tester.email));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRecord {
    pub group_index: usize,
    pub shipped_on: NaiveDate,
    pub tracking_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CardRequest {
    pub id: Uuid,
    pub environment: Environment,
    pub terminal_type: TerminalType,
    pub status: RequestStatus,
    pub ship_details: Json<ShipDetails>,
    pub reviewer_comment: Option<String>,
    pub sn_status_verify: bool,
    pub shipments: Json<Vec<ShipmentRecord>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRequestData {
    pub environment: Environment,
    pub ship_details: ShipDetails,
    pub created_by: String,
}

impl CardRequest {
    /// Ecomm and mobile-only requests end once cards are assigned
    pub fn is_terminal(&self) -> bool {
        match self.status {
            RequestStatus::Shipped => true,
            RequestStatus::AssignCard => !self.ship_details.requires_shipment(),
            _ => false,
        }
    }

    /// Creates a new request in draft status
    pub async fn create(pool: &PgPool, data: CreateRequestData) -> Result<Self, sqlx::Error> {
        let request = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO card_requests (
                environment, terminal_type, status, ship_details, shipments, created_by
            )
            VALUES ($1, $2, 'draft', $3, '[]'::jsonb, $4)
            RETURNING *
            "#,
        )
        .bind(data.environment)
        .bind(data.ship_details.terminal_type())
        .bind(Json(&data.ship_details))
        .bind(&data.created_by)
        .fetch_one(pool)
        .await?;

        Ok(request)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let request = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM card_requests WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(request)
    }

    /// Writes back every mutable column. Last write wins.
    pub async fn save(pool: &PgPool, request: &CardRequest) -> Result<Self, sqlx::Error> {
        let saved = sqlx::query_as::<_, Self>(
            r#"
            UPDATE card_requests
            SET
                terminal_type = $2,
                status = $3,
                ship_details = $4,
                reviewer_comment = $5,
                sn_status_verify = $6,
                shipments = $7,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.terminal_type)
        .bind(request.status)
        .bind(&request.ship_details)
        .bind(&request.reviewer_comment)
        .bind(request.sn_status_verify)
        .bind(&request.shipments)
        .fetch_one(pool)
        .await?;

        Ok(saved)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn tester(name: &str) -> Tester {
        Tester {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
        }
    }

    pub fn address() -> Address {
        Address {
            recipient: "Lab Desk".to_string(),
            line1: "1 Test Street".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            state: None,
            postal_code: "12345".to_string(),
            country: "US".to_string(),
            phone: None,
        }
    }

    pub fn pos_details(testers: &[&str]) -> ShipDetails {
        ShipDetails::Pos(PosShipDetails {
            bin_product: Some(BinProduct::Debit),
            feature: Some(Feature::Transit),
            region: Some(Region::Domestic),
            bundle_name: None,
            ship_to: ShipTo::Address,
            groups: vec![ShipmentGroup {
                address: Some(address()),
                testers: testers.iter().map(|n| tester(n)).collect(),
            }],
        })
    }

    pub fn ecomm_details(testers: &[&str]) -> ShipDetails {
        ShipDetails::Ecomm(EcommShipDetails {
            bin_product: Some(BinProduct::Credit),
            bundle_name: None,
            testers: testers.iter().map(|n| tester(n)).collect(),
        })
    }
}
