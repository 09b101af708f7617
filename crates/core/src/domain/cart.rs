use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::identity::{Email, RequesterIdentity};
use crate::domain::item::{DraftItem, ExpenseMode, ItemId};
use crate::errors::DomainError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Cart {
    items: Vec<DraftItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub count_by_mode: BTreeMap<ExpenseMode, usize>,
    pub total_by_mode: BTreeMap<ExpenseMode, Decimal>,
    pub grand_total: Decimal,
    pub item_count: usize,
}

/// Where a submitted report goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionSettings {
    pub to_email: Email,
    pub cc_requester: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionLine {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ExpenseMode,
    pub department_code: String,
    pub activity_code: String,
    pub account_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gl_account_override: Option<String>,
    pub posting_account: Option<String>,
    pub travel_date: NaiveDate,
    pub reference: String,
    pub ledger_reference: String,
    pub invoice: String,
    pub amount_total: Decimal,
    pub currency: String,
    pub needs_finance_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_upload_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub requester_email: String,
    pub to_email: String,
    pub cc_requester: bool,
    pub department_code: Option<String>,
    pub items: Vec<SubmissionLine>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl SubmissionPayload {
    /// Sum of line totals. Lines are capped at `MAX_LINE_AMOUNT`, so this saturates only
    /// for payloads that did not come from a `Cart`.
    pub fn amount_total(&self) -> Decimal {
        self.items.iter().fold(Decimal::ZERO, |total, line| total.saturating_add(line.amount_total))
    }
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the item and returns its 0-based position. Adding an item that is already in
    /// the cart leaves the cart unchanged and returns the existing position.
    pub fn add(&mut self, item: DraftItem) -> usize {
        if let Some(position) = self.position_of(item.id()) {
            return position;
        }
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Result<DraftItem, DomainError> {
        if index >= self.items.len() {
            return Err(DomainError::ItemIndexOutOfRange { index, len: self.items.len() });
        }
        Ok(self.items.remove(index))
    }

    /// Returns how many items were dropped.
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        removed
    }

    pub fn items(&self) -> &[DraftItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn summary(&self) -> Result<CartSummary, DomainError> {
        let mut summary = CartSummary { item_count: self.items.len(), ..CartSummary::default() };
        for item in &self.items {
            *summary.count_by_mode.entry(item.mode()).or_default() += 1;
            let mode_total = summary.total_by_mode.entry(item.mode()).or_default();
            *mode_total =
                mode_total.checked_add(item.amount_total()).ok_or(DomainError::AmountOverflow)?;
            summary.grand_total = summary
                .grand_total
                .checked_add(item.amount_total())
                .ok_or(DomainError::AmountOverflow)?;
        }
        Ok(summary)
    }

    pub fn to_submission_payload(
        &self,
        identity: &RequesterIdentity,
        settings: &SubmissionSettings,
        today: NaiveDate,
    ) -> Result<SubmissionPayload, DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::EmptyCartSubmission);
        }
        let requester_email = identity.email().ok_or(DomainError::MissingRequesterEmail)?;

        let items = self
            .items
            .iter()
            .map(|item| SubmissionLine {
                id: item.id().to_string(),
                item_type: item.mode(),
                department_code: item.coding().department().to_string(),
                activity_code: item.coding().activity().to_string(),
                account_code: item.coding().account().map(ToString::to_string),
                gl_account_override: item.coding().gl_override().map(str::to_string),
                posting_account: item.posting_account().map(str::to_string),
                travel_date: item.travel_date(),
                reference: item.reference().to_string(),
                ledger_reference: item.ledger_reference(),
                invoice: item.invoice_number(today),
                amount_total: item.amount_total(),
                currency: item.currency().to_string(),
                needs_finance_review: item.coding().needs_finance_review(),
                receipt_upload_id: item.attachment().map(str::to_string),
            })
            .collect::<Vec<_>>();

        let mut attachments: Vec<String> = Vec::new();
        for upload_id in self.items.iter().filter_map(DraftItem::attachment) {
            if !attachments.iter().any(|existing| existing == upload_id) {
                attachments.push(upload_id.to_string());
            }
        }

        Ok(SubmissionPayload {
            requester_email: requester_email.to_string(),
            to_email: settings.to_email.to_string(),
            cc_requester: settings.cc_requester,
            department_code: identity.department_code().map(ToString::to_string),
            items,
            attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{Cart, SubmissionSettings};
    use crate::amounts::DEFAULT_MILEAGE_RATE;
    use crate::domain::identity::{Department, DepartmentCode, Email, RequesterIdentity};
    use crate::domain::item::fixtures::{mileage, receipt};
    use crate::domain::item::ExpenseMode;
    use crate::errors::DomainError;

    fn settings() -> SubmissionSettings {
        SubmissionSettings {
            to_email: Email::parse("ap@example.coop").expect("email"),
            cc_requester: true,
        }
    }

    fn identity() -> RequesterIdentity {
        let mut identity = RequesterIdentity::default();
        identity.assign_email(Email::parse("pat@example.coop").expect("email"));
        identity.assign_department(Department::new(
            DepartmentCode::parse("620").expect("code"),
            Some("IT".to_string()),
        ));
        identity
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 20).expect("date")
    }

    #[test]
    fn summary_totals_track_items_by_mode() {
        let mut cart = Cart::new();
        cart.add(receipt(Decimal::new(4250, 2), "taxi"));
        cart.add(mileage(Decimal::from(10), DEFAULT_MILEAGE_RATE));

        let summary = cart.summary().expect("summary");
        assert_eq!(summary.grand_total, Decimal::new(4950, 2));
        assert_eq!(summary.count_by_mode.get(&ExpenseMode::Receipt), Some(&1));
        assert_eq!(summary.count_by_mode.get(&ExpenseMode::Mileage), Some(&1));
        assert_eq!(summary.count_by_mode.get(&ExpenseMode::PerDiem), None);
        assert_eq!(summary.total_by_mode.get(&ExpenseMode::Mileage), Some(&Decimal::new(700, 2)));

        cart.remove(0).expect("remove receipt");
        assert_eq!(cart.summary().expect("summary").grand_total, Decimal::new(700, 2));
    }

    #[test]
    fn adding_the_same_item_twice_is_idempotent() {
        let mut cart = Cart::new();
        let item = receipt(Decimal::new(1500, 2), "parking");
        assert_eq!(cart.add(item.clone()), 0);
        assert_eq!(cart.add(item), 0);
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn removing_out_of_range_index_is_a_validation_error() {
        let mut cart = Cart::new();
        cart.add(receipt(Decimal::new(1500, 2), "parking"));
        assert_eq!(cart.remove(3), Err(DomainError::ItemIndexOutOfRange { index: 3, len: 1 }));
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn empty_cart_cannot_build_a_submission() {
        let cart = Cart::new();
        assert_eq!(
            cart.to_submission_payload(&identity(), &settings(), today()),
            Err(DomainError::EmptyCartSubmission)
        );
    }

    #[test]
    fn submission_requires_requester_email() {
        let mut cart = Cart::new();
        cart.add(receipt(Decimal::new(1500, 2), "parking"));
        assert_eq!(
            cart.to_submission_payload(&RequesterIdentity::default(), &settings(), today()),
            Err(DomainError::MissingRequesterEmail)
        );
    }

    #[test]
    fn submission_payload_uses_camel_case_wire_names() {
        let mut cart = Cart::new();
        cart.add(receipt(Decimal::new(4250, 2), "taxi to airport"));
        cart.add(mileage(Decimal::from(10), DEFAULT_MILEAGE_RATE));

        let payload = cart.to_submission_payload(&identity(), &settings(), today()).expect("payload");
        assert_eq!(payload.amount_total(), Decimal::new(4950, 2));

        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["requesterEmail"], "pat@example.coop");
        assert_eq!(json["toEmail"], "ap@example.coop");
        assert_eq!(json["ccRequester"], true);
        assert_eq!(json["departmentCode"], "620");
        assert_eq!(json["items"][0]["type"], "Receipt");
        assert_eq!(json["items"][0]["invoice"], "EXP 02-2026");
        assert_eq!(json["items"][0]["needsFinanceReview"], true);
        assert_eq!(json["items"][1]["invoice"], "MIL 02-2026");
        assert_eq!(json["items"][1]["travelDate"], "2026-02-11");
        assert!(json["items"][0].get("glAccountOverride").is_none());
    }

    #[test]
    fn clear_drops_every_item() {
        let mut cart = Cart::new();
        cart.add(receipt(Decimal::new(1500, 2), "parking"));
        cart.add(receipt(Decimal::new(900, 2), "tolls"));
        assert_eq!(cart.clear(), 2);
        assert!(cart.is_empty());
        assert_eq!(cart.summary().expect("summary").grand_total, Decimal::ZERO);
    }
}
