//! Field-level diffs between two versions of a proposal.
//!
//! Every persisted save produces one [`RevisionRecord`], including saves where
//! nothing changed. Derived values (line totals, proposal total) are never
//! diffed, only the inputs they are computed from.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::domain::directory::UserId;
use crate::domain::proposal::{LineItem, Proposal};
use crate::domain::revision::{FieldChange, RevisionId, RevisionRecord};

pub fn default_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionAuditor {
    tolerance: Decimal,
}

impl Default for RevisionAuditor {
    fn default() -> Self {
        Self { tolerance: default_tolerance() }
    }
}

impl RevisionAuditor {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance: tolerance.abs() }
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    /// Builds the next revision record. The caller persists it together with
    /// the proposal carrying the same revision number.
    pub fn record_revision(
        &self,
        previous: &Proposal,
        proposed: &Proposal,
        actor: &UserId,
        at: DateTime<Utc>,
    ) -> RevisionRecord {
        RevisionRecord {
            id: RevisionId::generate(),
            proposal_id: previous.id.clone(),
            revision_number: previous.revision.saturating_add(1),
            changed_by: actor.clone(),
            timestamp: at,
            changes: self.diff(previous, proposed),
        }
    }

    pub fn diff(&self, previous: &Proposal, proposed: &Proposal) -> Vec<FieldChange> {
        let mut changes = ChangeList::default();

        changes.push("title", text(&previous.title), text(&proposed.title));
        changes.push(
            "responsibleUserId",
            optional_text(previous.responsible_user_id.as_ref().map(|id| id.0.as_str())),
            optional_text(proposed.responsible_user_id.as_ref().map(|id| id.0.as_str())),
        );
        changes.push("currency", text(&previous.currency), text(&proposed.currency));
        if !self.same_decimal(previous.discount_percent, proposed.discount_percent) {
            changes.push(
                "discountPercent",
                decimal_value(previous.discount_percent),
                decimal_value(proposed.discount_percent),
            );
        }
        changes.push(
            "paymentTerms",
            optional_text(previous.payment_terms.as_deref()),
            optional_text(proposed.payment_terms.as_deref()),
        );
        changes.push(
            "deliveryTerms",
            optional_text(previous.delivery_terms.as_deref()),
            optional_text(proposed.delivery_terms.as_deref()),
        );
        changes.push(
            "validityDate",
            previous.validity_date.map_or(Value::Null, |date| Value::String(date.to_string())),
            proposed.validity_date.map_or(Value::Null, |date| Value::String(date.to_string())),
        );
        changes.push(
            "notes",
            optional_text(previous.notes.as_deref()),
            optional_text(proposed.notes.as_deref()),
        );
        changes.push("status", text(previous.status.as_str()), text(proposed.status.as_str()));

        let keys: BTreeSet<&String> =
            previous.attributes.keys().chain(proposed.attributes.keys()).collect();
        for key in keys {
            changes.push(
                &format!("attributes.{key}"),
                previous.attributes.get(key).cloned().unwrap_or(Value::Null),
                proposed.attributes.get(key).cloned().unwrap_or(Value::Null),
            );
        }

        let lines = previous.line_items.len().max(proposed.line_items.len());
        for index in 0..lines {
            let field = format!("lineItems[{index}]");
            match (previous.line_items.get(index), proposed.line_items.get(index)) {
                (Some(before), Some(after)) if !self.same_line(before, after) => {
                    changes.push(&field, line_value(before), line_value(after));
                }
                (Some(before), None) => changes.push(&field, line_value(before), Value::Null),
                (None, Some(after)) => changes.push(&field, Value::Null, line_value(after)),
                _ => {}
            }
        }

        changes.0
    }

    fn same_decimal(&self, left: Decimal, right: Decimal) -> bool {
        left.checked_sub(right).is_some_and(|delta| delta.abs() < self.tolerance)
    }

    fn same_line(&self, left: &LineItem, right: &LineItem) -> bool {
        left.description == right.description
            && self.same_decimal(left.quantity, right.quantity)
            && self.same_decimal(left.unit_price, right.unit_price)
    }
}

#[derive(Default)]
struct ChangeList(Vec<FieldChange>);

impl ChangeList {
    fn push(&mut self, field: &str, previous_value: Value, new_value: Value) {
        if previous_value != new_value {
            self.0.push(FieldChange { field: field.to_string(), previous_value, new_value });
        }
    }
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

/// Decimals render as JSON numbers (`3`, `6.5`) so change entries read the way
/// the values were entered.
pub fn decimal_value(value: Decimal) -> Value {
    let rendered = value.normalize().to_string();
    serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered))
}

fn line_value(item: &LineItem) -> Value {
    json!({
        "description": item.description,
        "quantity": decimal_value(item.quantity),
        "unitPrice": decimal_value(item.unit_price),
        "totalPrice": decimal_value(item.total_price),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use super::{decimal_value, RevisionAuditor};
    use crate::domain::directory::{ClientId, UserId};
    use crate::domain::proposal::{LineItem, Proposal, ProposalId, ProposalStatus};

    fn proposal() -> Proposal {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().expect("date");
        Proposal {
            id: ProposalId("P-1".to_string()),
            number: "AIM-001-JS-2026-REV00".to_string(),
            client_id: ClientId("client-acme".to_string()),
            responsible_user_id: Some(UserId("u-js".to_string())),
            status: ProposalStatus::Draft,
            discount_percent: Decimal::new(3, 0),
            revision: 0,
            line_items: vec![
                LineItem::new("Hydraulic press", Decimal::new(2, 0), Decimal::new(125_000, 2))
                    .expect("line"),
                LineItem::new("Installation", Decimal::ONE, Decimal::new(30_000, 2)).expect("line"),
            ],
            title: "Press line".to_string(),
            currency: "USD".to_string(),
            payment_terms: Some("30 days".to_string()),
            delivery_terms: None,
            validity_date: NaiveDate::from_ymd_opt(2026, 4, 30),
            notes: None,
            attributes: BTreeMap::from([("region".to_string(), json!("south"))]),
            created_by: UserId("u-js".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn discount_only_change_produces_single_numeric_entry() {
        let previous = proposal();
        let mut proposed = previous.clone();
        proposed.discount_percent = Decimal::new(7, 0);

        let changes = RevisionAuditor::default().diff(&previous, &proposed);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "discountPercent");
        assert_eq!(changes[0].previous_value, json!(3));
        assert_eq!(changes[0].new_value, json!(7));
    }

    #[test]
    fn rounding_noise_below_tolerance_is_ignored() {
        let previous = proposal();
        let mut proposed = previous.clone();
        proposed.discount_percent = Decimal::new(3001, 3);
        proposed.line_items[0].unit_price = Decimal::new(1_250_005, 3);

        assert!(RevisionAuditor::default().diff(&previous, &proposed).is_empty());
    }

    #[test]
    fn line_changes_are_reported_per_position() {
        let previous = proposal();
        let mut proposed = previous.clone();
        proposed.line_items[0].quantity = Decimal::new(3, 0);
        proposed.line_items[0].recompute().expect("recompute");
        proposed.line_items.remove(1);

        let changes = RevisionAuditor::default().diff(&previous, &proposed);
        let fields: Vec<&str> = changes.iter().map(|change| change.field.as_str()).collect();

        assert_eq!(fields, vec!["lineItems[0]", "lineItems[1]"]);
        assert_eq!(changes[0].new_value["quantity"], json!(3));
        assert_eq!(changes[1].new_value, Value::Null);
        assert_eq!(changes[1].previous_value["description"], json!("Installation"));
    }

    #[test]
    fn added_line_has_null_previous_value() {
        let previous = proposal();
        let mut proposed = previous.clone();
        proposed
            .line_items
            .push(LineItem::new("Training", Decimal::ONE, Decimal::new(500, 0)).expect("line"));

        let changes = RevisionAuditor::default().diff(&previous, &proposed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "lineItems[2]");
        assert_eq!(changes[0].previous_value, Value::Null);
        assert_eq!(changes[0].new_value["totalPrice"], json!(500));
    }

    #[test]
    fn opaque_fields_and_attributes_are_diffed() {
        let previous = proposal();
        let mut proposed = previous.clone();
        proposed.payment_terms = None;
        proposed.status = ProposalStatus::Sent;
        proposed.attributes.remove("region");
        proposed.attributes.insert("incoterm".to_string(), json!("FOB"));

        let changes = RevisionAuditor::default().diff(&previous, &proposed);
        let fields: Vec<&str> = changes.iter().map(|change| change.field.as_str()).collect();
        assert_eq!(fields, vec!["paymentTerms", "status", "attributes.incoterm", "attributes.region"]);
        assert_eq!(changes[0].new_value, Value::Null);
        assert_eq!(changes[3].previous_value, json!("south"));
    }

    #[test]
    fn serde_round_trip_diffs_to_nothing() {
        let original = proposal();
        let encoded = serde_json::to_string(&original).expect("serialize");
        let decoded: Proposal = serde_json::from_str(&encoded).expect("deserialize");

        assert!(RevisionAuditor::default().diff(&original, &decoded).is_empty());
    }

    #[test]
    fn record_revision_increments_even_without_changes() {
        let previous = proposal();
        let record = RevisionAuditor::default().record_revision(
            &previous,
            &previous.clone(),
            &UserId("u-mgr".to_string()),
            Utc::now(),
        );

        assert_eq!(record.revision_number, 1);
        assert_eq!(record.changed_by, UserId("u-mgr".to_string()));
        assert!(record.is_empty());
    }

    #[test]
    fn decimals_render_as_plain_numbers() {
        assert_eq!(decimal_value(Decimal::new(650, 2)), json!(6.5));
        assert_eq!(decimal_value(Decimal::new(300, 2)), json!(3));
    }
}
