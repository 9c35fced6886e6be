use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::directory::{ClientId, UserId};
use crate::errors::DomainError;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl ProposalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl LineItem {
    pub fn new(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<Self, DomainError> {
        let total_price = line_total(quantity, unit_price)?;
        Ok(Self { description: description.into(), quantity, unit_price, total_price })
    }

    pub fn recompute(&mut self) -> Result<(), DomainError> {
        self.total_price = line_total(self.quantity, self.unit_price)?;
        Ok(())
    }
}

fn line_total(quantity: Decimal, unit_price: Decimal) -> Result<Decimal, DomainError> {
    quantity.checked_mul(unit_price).ok_or_else(|| {
        DomainError::AmountOutOfRange(format!("{quantity} x {unit_price} exceeds the decimal range"))
    })
}

/// Derived amounts; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalTotals {
    /// Sum of the line totals, before discount.
    pub total: Decimal,
    pub net_total: Decimal,
}

impl ProposalTotals {
    pub fn compute(line_items: &[LineItem], discount_percent: Decimal) -> Result<Self, DomainError> {
        let total = line_items
            .iter()
            .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.total_price))
            .ok_or_else(|| {
                DomainError::AmountOutOfRange("sum of line totals exceeds the decimal range".to_string())
            })?;
        let net_total = total
            .checked_mul(discount_percent)
            .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
            .and_then(|discount| total.checked_sub(discount))
            .ok_or_else(|| {
                DomainError::AmountOutOfRange("discounted total exceeds the decimal range".to_string())
            })?
            .round_dp(2);
        Ok(Self { total, net_total })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub number: String,
    pub client_id: ClientId,
    pub responsible_user_id: Option<UserId>,
    pub status: ProposalStatus,
    pub discount_percent: Decimal,
    pub revision: u32,
    pub line_items: Vec<LineItem>,
    pub title: String,
    pub currency: String,
    pub payment_terms: Option<String>,
    pub delivery_terms: Option<String>,
    pub validity_date: Option<NaiveDate>,
    pub notes: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn totals(&self) -> Result<ProposalTotals, DomainError> {
        ProposalTotals::compute(&self.line_items, self.discount_percent)
    }

    pub fn recompute_totals(&mut self) -> Result<(), DomainError> {
        self.line_items.iter_mut().try_for_each(LineItem::recompute)
    }

    /// Re-saving in the current status and falling back to draft are always
    /// allowed while the proposal is still open.
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        matches!(
            (self.status, next),
            (_, ProposalStatus::Draft)
                | (ProposalStatus::Draft, ProposalStatus::Sent)
                | (ProposalStatus::Draft, ProposalStatus::Approved)
                | (ProposalStatus::Draft, ProposalStatus::Rejected)
                | (ProposalStatus::Sent, ProposalStatus::Sent)
                | (ProposalStatus::Sent, ProposalStatus::Approved)
                | (ProposalStatus::Sent, ProposalStatus::Rejected)
        )
    }

    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::ProposalLocked { id: self.id.clone(), status: self.status });
        }
        Ok(())
    }

    pub fn ensure_transition(&self, next: ProposalStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(DomainError::InvalidStatusTransition { from: self.status, to: next })
    }
}
