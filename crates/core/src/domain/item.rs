use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amounts::MAX_LINE_AMOUNT;
use crate::coding::ItemCoding;
use crate::errors::DomainError;

/// Longest reference the ledger import accepts.
pub const LEDGER_REFERENCE_LIMIT: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpenseMode {
    Receipt,
    PerDiem,
    Mileage,
}

impl ExpenseMode {
    pub const ALL: [Self; 3] = [Self::Receipt, Self::PerDiem, Self::Mileage];

    pub fn label(self) -> &'static str {
        match self {
            Self::Receipt => "Receipt",
            Self::PerDiem => "Per Diem",
            Self::Mileage => "Mileage",
        }
    }

    pub fn invoice_prefix(self) -> &'static str {
        match self {
            Self::Receipt => "EXP",
            Self::PerDiem => "PER DIEM",
            Self::Mileage => "MIL",
        }
    }
}

impl fmt::Display for ExpenseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZipCode(String);

impl ZipCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.len() == 5 && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(DomainError::InvalidZipCode(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ZipCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ZipCode> for String {
    fn from(value: ZipCode) -> Self {
        value.0
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mode-specific inputs that produced the amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ItemDetails {
    Receipt {
        category: String,
        attachment: Option<String>,
    },
    PerDiem {
        zip_code: ZipCode,
        days: u32,
        travelers: u32,
        daily_rate: Decimal,
        manual_rate: bool,
    },
    Mileage {
        miles: Decimal,
        rate: Decimal,
    },
}

impl ItemDetails {
    pub fn mode(&self) -> ExpenseMode {
        match self {
            Self::Receipt { .. } => ExpenseMode::Receipt,
            Self::PerDiem { .. } => ExpenseMode::PerDiem,
            Self::Mileage { .. } => ExpenseMode::Mileage,
        }
    }
}

/// One cart line. Immutable once built; a correction is a remove followed by a new add.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DraftItem {
    id: ItemId,
    coding: ItemCoding,
    travel_date: NaiveDate,
    reference: String,
    amount_total: Decimal,
    currency: String,
    details: ItemDetails,
}

impl DraftItem {
    pub fn new(
        coding: ItemCoding,
        travel_date: NaiveDate,
        reference: impl Into<String>,
        amount_total: Decimal,
        currency: impl Into<String>,
        details: ItemDetails,
    ) -> Result<Self, DomainError> {
        if amount_total <= Decimal::ZERO {
            return Err(DomainError::NonPositiveAmount(amount_total.to_string()));
        }
        if amount_total > MAX_LINE_AMOUNT {
            return Err(DomainError::AmountTooLarge {
                amount: amount_total.to_string(),
                max: MAX_LINE_AMOUNT.to_string(),
            });
        }
        let reference = reference.into().trim().to_string();
        let reference =
            if reference.is_empty() { details.mode().label().to_string() } else { reference };

        Ok(Self {
            id: ItemId::new(),
            coding,
            travel_date,
            reference,
            amount_total,
            currency: currency.into(),
            details,
        })
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn mode(&self) -> ExpenseMode {
        self.details.mode()
    }

    pub fn coding(&self) -> &ItemCoding {
        &self.coding
    }

    pub fn travel_date(&self) -> NaiveDate {
        self.travel_date
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn amount_total(&self) -> Decimal {
        self.amount_total
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn details(&self) -> &ItemDetails {
        &self.details
    }

    pub fn attachment(&self) -> Option<&str> {
        match &self.details {
            ItemDetails::Receipt { attachment, .. } => attachment.as_deref(),
            _ => None,
        }
    }

    /// The account the ledger line posts to.
    pub fn posting_account(&self) -> Option<&str> {
        self.coding.gl_override().or_else(|| self.coding.account().map(|account| account.as_str()))
    }

    /// Reference trimmed to the ledger limit. Overridden lines keep the original account
    /// as an ` ACCT=` suffix, shortening the text in front of it when needed.
    pub fn ledger_reference(&self) -> String {
        let base = self.reference.trim();
        let original = self.coding.account().map(|account| account.as_str());
        match (self.coding.gl_override(), original) {
            (Some(_), Some(account)) => {
                let suffix = format!(" ACCT={account}");
                let suffix_len = suffix.chars().count();
                if base.chars().count() + suffix_len <= LEDGER_REFERENCE_LIMIT {
                    format!("{base}{suffix}")
                } else {
                    let keep = LEDGER_REFERENCE_LIMIT.saturating_sub(suffix_len);
                    let head = truncate_chars(base, keep).trim_end().to_string();
                    truncate_chars(&format!("{head}{suffix}"), LEDGER_REFERENCE_LIMIT)
                        .trim()
                        .to_string()
                }
            }
            _ => truncate_chars(base, LEDGER_REFERENCE_LIMIT).to_string(),
        }
    }

    /// `"<PREFIX> MM-YYYY"` for the month the report is filed in.
    pub fn invoice_number(&self, today: NaiveDate) -> String {
        format!("{} {}", self.mode().invoice_prefix(), today.format("%m-%Y"))
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
