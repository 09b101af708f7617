//! Multi-slot form filling for the three add-item flows.
//!
//! A [`SlotFiller`] owns the partial state of one item. Each utterance is scanned for
//! every value it can recognize (dates, ZIP codes, counts, amounts); whatever is left over
//! becomes the free-text slot when that slot is being asked for. Unrecognized tokens are
//! dropped without comment.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use expensecart_core::amounts::{parse_decimal, to_cents, MAX_LINE_AMOUNT, MAX_MILES};
use expensecart_core::coding::CodingFlags;
use expensecart_core::dates::{self, DateParseError};
use expensecart_core::domain::item::{ExpenseMode, ZipCode};

pub const MAX_DAYS: u32 = 365;
pub const MAX_TRAVELERS: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Category,
    Amount,
    Date,
    Attachment,
    ZipCode,
    Days,
    Travelers,
    Miles,
    Description,
}

impl SlotField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Amount => "amount",
            Self::Date => "date",
            Self::Attachment => "attachment",
            Self::ZipCode => "zip code",
            Self::Days => "days",
            Self::Travelers => "travelers",
            Self::Miles => "miles",
            Self::Description => "description",
        }
    }

    /// Field names accepted after `change`.
    pub fn parse(raw: &str) -> Option<Self> {
        let field = match raw.trim().to_ascii_lowercase().as_str() {
            "category" | "type" => Self::Category,
            "amount" | "total" | "cost" => Self::Amount,
            "date" | "travel date" | "day" => Self::Date,
            "attachment" | "receipt" | "upload" => Self::Attachment,
            "zip" | "zip code" | "zipcode" | "zip-code" => Self::ZipCode,
            "days" | "number of days" => Self::Days,
            "travelers" | "travellers" | "people" => Self::Travelers,
            "miles" | "mileage" | "distance" => Self::Miles,
            "description" | "purpose" | "reference" | "memo" => Self::Description,
            _ => return None,
        };
        Some(field)
    }

    /// Only fields backed by plain numbers.
    fn is_numeric(self) -> bool {
        matches!(self, Self::Amount | Self::Days | Self::Travelers | Self::Miles)
    }
}

impl fmt::Display for SlotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotIssue {
    #[error("{0}")]
    Date(DateParseError),
    #[error("ZIP code must be exactly 5 digits, got `{0}`.")]
    InvalidZip(String),
    #[error("I couldn't read `{raw}` as a number for {field}.")]
    NotANumber { field: SlotField, raw: String },
    #[error("{field} must be greater than zero, got `{raw}`.")]
    NonPositive { field: SlotField, raw: String },
    #[error("{field} must be between {min} and {max}, got `{raw}`.")]
    OutOfRange { field: SlotField, raw: String, min: u32, max: u32 },
    #[error("{field} must be at most {max}, got `{raw}`.")]
    TooLarge { field: SlotField, raw: String, max: Decimal },
}

impl SlotIssue {
    pub fn field(&self) -> SlotField {
        match self {
            Self::Date(_) => SlotField::Date,
            Self::InvalidZip(_) => SlotField::ZipCode,
            Self::NotANumber { field, .. }
            | Self::NonPositive { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::TooLarge { field, .. } => *field,
        }
    }
}

/// Values collected so far for one item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotValues {
    pub category: Option<String>,
    pub amount: Option<Decimal>,
    pub date: Option<NaiveDate>,
    pub attachment: Option<String>,
    pub zip_code: Option<ZipCode>,
    pub days: Option<u32>,
    pub travelers: Option<u32>,
    pub miles: Option<Decimal>,
    pub description: Option<String>,
}

impl SlotValues {
    pub fn is_filled(&self, field: SlotField) -> bool {
        match field {
            SlotField::Category => self.category.is_some(),
            SlotField::Amount => self.amount.is_some(),
            SlotField::Date => self.date.is_some(),
            SlotField::Attachment => self.attachment.is_some(),
            SlotField::ZipCode => self.zip_code.is_some(),
            SlotField::Days => self.days.is_some(),
            SlotField::Travelers => self.travelers.is_some(),
            SlotField::Miles => self.miles.is_some(),
            SlotField::Description => self.description.is_some(),
        }
    }

    fn clear(&mut self, field: SlotField) {
        match field {
            SlotField::Category => self.category = None,
            SlotField::Amount => self.amount = None,
            SlotField::Date => self.date = None,
            SlotField::Attachment => self.attachment = None,
            SlotField::ZipCode => self.zip_code = None,
            SlotField::Days => self.days = None,
            SlotField::Travelers => self.travelers = None,
            SlotField::Miles => self.miles = None,
            SlotField::Description => self.description = None,
        }
    }
}

/// Typed input from a host that already has the values, such as a form submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuredSlots {
    pub category: Option<String>,
    pub amount: Option<Decimal>,
    pub date: Option<NaiveDate>,
    pub attachment: Option<String>,
    pub zip_code: Option<String>,
    pub days: Option<u32>,
    pub travelers: Option<u32>,
    pub miles: Option<Decimal>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub filled: Vec<SlotField>,
    pub missing: Vec<SlotField>,
    pub issue: Option<SlotIssue>,
}

impl IngestOutcome {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.issue.is_none()
    }
}

/// Everything needed to price and code one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletedSlots {
    Receipt { category: String, amount: Decimal, date: NaiveDate, attachment: Option<String> },
    PerDiem {
        travel_date: NaiveDate,
        zip_code: ZipCode,
        days: u32,
        travelers: u32,
        purpose: Option<String>,
    },
    Mileage { date: NaiveDate, miles: Decimal, description: String },
}

impl CompletedSlots {
    pub fn mode(&self) -> ExpenseMode {
        match self {
            Self::Receipt { .. } => ExpenseMode::Receipt,
            Self::PerDiem { .. } => ExpenseMode::PerDiem,
            Self::Mileage { .. } => ExpenseMode::Mileage,
        }
    }

    pub fn travel_date(&self) -> NaiveDate {
        match self {
            Self::Receipt { date, .. } | Self::Mileage { date, .. } => *date,
            Self::PerDiem { travel_date, .. } => *travel_date,
        }
    }

    /// Text handed to the activity rule table.
    pub fn category_text(&self) -> String {
        match self {
            Self::Receipt { category, .. } => category.clone(),
            Self::PerDiem { purpose, .. } => match purpose {
                Some(purpose) => format!("per diem {purpose}"),
                None => "per diem".to_string(),
            },
            Self::Mileage { description, .. } => format!("mileage {description}"),
        }
    }

    pub fn reference(&self) -> String {
        match self {
            Self::Receipt { category, .. } => category.clone(),
            Self::PerDiem { zip_code, days, purpose, .. } => match purpose {
                Some(purpose) => purpose.clone(),
                None => format!("Per Diem {zip_code} {days}d"),
            },
            Self::Mileage { description, .. } => description.clone(),
        }
    }
}

const DAY_WORDS: &[&str] = &["day", "days", "night", "nights"];
const TRAVELER_WORDS: &[&str] =
    &["traveler", "travelers", "traveller", "travellers", "people", "person", "persons"];
const MILE_WORDS: &[&str] = &["mi", "mile", "miles"];
const CURRENCY_WORDS: &[&str] = &["dollars", "dollar", "usd", "bucks"];
const EDGE_FILLER: &[&str] =
    &["for", "on", "and", "at", "in", "of", "the", "a", "an", "with", "was", "it", "is"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotFiller {
    mode: ExpenseMode,
    values: SlotValues,
    flags: CodingFlags,
    pending: Option<SlotField>,
    requested: Option<SlotField>,
}

impl SlotFiller {
    pub fn new(mode: ExpenseMode) -> Self {
        Self {
            mode,
            values: SlotValues::default(),
            flags: CodingFlags::default(),
            pending: None,
            requested: None,
        }
    }

    pub fn mode(&self) -> ExpenseMode {
        self.mode
    }

    pub fn values(&self) -> &SlotValues {
        &self.values
    }

    pub fn flags(&self) -> &CodingFlags {
        &self.flags
    }

    /// The field the last prompt asked about.
    pub fn pending(&self) -> Option<SlotField> {
        self.pending
    }

    /// Fields that are asked for when empty. Everything else has a default.
    pub fn required_fields(&self) -> &'static [SlotField] {
        match self.mode {
            ExpenseMode::Receipt => &[SlotField::Category, SlotField::Amount],
            ExpenseMode::PerDiem => &[SlotField::Date, SlotField::ZipCode],
            ExpenseMode::Mileage => &[SlotField::Date, SlotField::Miles, SlotField::Description],
        }
    }

    pub fn accepts(&self, field: SlotField) -> bool {
        let fields: &[SlotField] = match self.mode {
            ExpenseMode::Receipt => {
                &[SlotField::Category, SlotField::Amount, SlotField::Date, SlotField::Attachment]
            }
            ExpenseMode::PerDiem => &[
                SlotField::Date,
                SlotField::ZipCode,
                SlotField::Days,
                SlotField::Travelers,
                SlotField::Description,
            ],
            ExpenseMode::Mileage => &[SlotField::Date, SlotField::Miles, SlotField::Description],
        };
        fields.contains(&field)
    }

    pub fn missing(&self) -> Vec<SlotField> {
        let mut missing = self
            .required_fields()
            .iter()
            .copied()
            .filter(|field| !self.values.is_filled(*field))
            .collect::<Vec<_>>();
        if let Some(requested) = self.requested {
            if !self.values.is_filled(requested) && !missing.contains(&requested) {
                missing.insert(0, requested);
            }
        }
        missing
    }

    /// Clears one field so it is asked again. Returns `false` for fields this mode lacks.
    pub fn change(&mut self, field: SlotField) -> bool {
        if !self.accepts(field) {
            return false;
        }
        self.values.clear(field);
        self.requested = Some(field);
        self.pending = Some(field);
        true
    }

    pub fn question(&self, field: SlotField) -> String {
        let date_hint = "(MM/DD/YYYY, YYYY-MM-DD, or something like \"last tuesday\")";
        match field {
            SlotField::Category => {
                "What was the expense for? (for example: team meal, conference registration, lodging)"
                    .to_string()
            }
            SlotField::Amount => "What was the total amount?".to_string(),
            SlotField::Date => match self.mode {
                ExpenseMode::Receipt => format!("What date was the purchase? {date_hint}"),
                ExpenseMode::PerDiem => format!("What was the travel date? {date_hint}"),
                ExpenseMode::Mileage => format!("What date was the trip? {date_hint}"),
            },
            SlotField::Attachment => "What is the receipt upload id?".to_string(),
            SlotField::ZipCode => {
                "What is the 5-digit ZIP code of the travel destination?".to_string()
            }
            SlotField::Days => format!("How many days? (1-{MAX_DAYS})"),
            SlotField::Travelers => format!("How many travelers? (1-{MAX_TRAVELERS})"),
            SlotField::Miles => "How many miles did you drive?".to_string(),
            SlotField::Description => match self.mode {
                ExpenseMode::PerDiem => "What was the purpose of the travel?".to_string(),
                _ => "What was the purpose of the trip?".to_string(),
            },
        }
    }

    /// The single question to ask next, if anything is still outstanding.
    pub fn next_prompt(&self, outcome: &IngestOutcome) -> Option<String> {
        if let Some(issue) = &outcome.issue {
            return Some(format!("{issue} {}", self.question(issue.field())));
        }
        outcome.missing.first().map(|field| self.question(*field))
    }

    pub fn ingest_text(&mut self, text: &str, today: NaiveDate) -> IngestOutcome {
        let trimmed = text.trim();
        let lowered = trimmed.to_ascii_lowercase();
        self.flags.merge(CodingFlags::detect(&lowered));

        let raw_tokens = dates::tokenize(trimmed);
        let lower_tokens = dates::tokenize(&lowered);
        let mut used = vec![false; lower_tokens.len()];
        mark_work_order(&lower_tokens, &mut used);

        let mut filled = Vec::new();
        let mut issue = None;

        if let Some(hit) = dates::scan_tokens(&lower_tokens, today) {
            for flag in used.iter_mut().skip(hit.start).take(hit.len) {
                *flag = true;
            }
            if !self.values.is_filled(SlotField::Date) {
                match hit.value {
                    Ok(date) => {
                        self.values.date = Some(date);
                        filled.push(SlotField::Date);
                    }
                    Err(error) => issue = Some(SlotIssue::Date(error)),
                }
            }
        }

        self.extract_values(&lower_tokens, &mut used, &mut filled, &mut issue);
        self.fill_free_text(&raw_tokens, &used, &mut filled);

        if issue.is_none() {
            issue = self.unanswered_issue(trimmed);
        }

        self.finish(filled, issue)
    }

    pub fn ingest_structured(&mut self, input: StructuredSlots) -> IngestOutcome {
        let mut filled = Vec::new();
        let mut issue = None;

        if let Some(date) = input.date {
            self.values.date = Some(date);
            filled.push(SlotField::Date);
        }
        let text_fields = [
            (SlotField::Category, input.category),
            (SlotField::Description, input.description),
            (SlotField::Attachment, input.attachment),
            (SlotField::ZipCode, input.zip_code),
        ];
        for (field, value) in text_fields {
            if let Some(value) = value {
                self.record(field, &value, &mut filled, &mut issue);
            }
        }
        let numeric_fields = [
            (SlotField::Amount, input.amount.map(|value| value.to_string())),
            (SlotField::Miles, input.miles.map(|value| value.to_string())),
            (SlotField::Days, input.days.map(|value| value.to_string())),
            (SlotField::Travelers, input.travelers.map(|value| value.to_string())),
        ];
        for (field, value) in numeric_fields {
            if let Some(value) = value {
                self.record(field, &value, &mut filled, &mut issue);
            }
        }

        self.finish(filled, issue)
    }

    /// All asked-for fields present: apply defaults and hand the values over.
    pub fn complete(&self, today: NaiveDate) -> Option<CompletedSlots> {
        if !self.missing().is_empty() {
            return None;
        }
        let values = &self.values;
        let completed = match self.mode {
            ExpenseMode::Receipt => CompletedSlots::Receipt {
                category: values.category.clone()?,
                amount: values.amount?,
                date: values.date.unwrap_or(today),
                attachment: values.attachment.clone(),
            },
            ExpenseMode::PerDiem => CompletedSlots::PerDiem {
                travel_date: values.date?,
                zip_code: values.zip_code.clone()?,
                days: values.days.unwrap_or(1),
                travelers: values.travelers.unwrap_or(1),
                purpose: values.description.clone(),
            },
            ExpenseMode::Mileage => CompletedSlots::Mileage {
                date: values.date?,
                miles: values.miles?,
                description: values.description.clone()?,
            },
        };
        Some(completed)
    }

    fn finish(&mut self, filled: Vec<SlotField>, issue: Option<SlotIssue>) -> IngestOutcome {
        if self.requested.is_some_and(|field| self.values.is_filled(field)) {
            self.requested = None;
        }
        let missing = self.missing();
        self.pending = issue.as_ref().map(SlotIssue::field).or_else(|| missing.first().copied());
        IngestOutcome { filled, missing, issue }
    }

    fn wants(&self, field: SlotField) -> bool {
        self.accepts(field) && (!self.values.is_filled(field) || self.pending == Some(field))
    }

    fn record(
        &mut self,
        field: SlotField,
        raw: &str,
        filled: &mut Vec<SlotField>,
        issue: &mut Option<SlotIssue>,
    ) {
        if !self.accepts(field) {
            return;
        }
        match self.accept(field, raw) {
            Ok(()) => filled.push(field),
            Err(error) => {
                if issue.is_none() {
                    *issue = Some(error);
                }
            }
        }
    }

    fn accept(&mut self, field: SlotField, raw: &str) -> Result<(), SlotIssue> {
        let raw = raw.trim();
        match field {
            SlotField::Amount | SlotField::Miles => {
                let value = parse_decimal(raw)
                    .ok_or_else(|| SlotIssue::NotANumber { field, raw: raw.to_string() })?;
                let (usable, max) = if field == SlotField::Amount {
                    (to_cents(value), MAX_LINE_AMOUNT)
                } else {
                    (value, MAX_MILES)
                };
                if usable <= Decimal::ZERO {
                    return Err(SlotIssue::NonPositive { field, raw: raw.to_string() });
                }
                if value > max {
                    return Err(SlotIssue::TooLarge { field, raw: raw.to_string(), max });
                }
                if field == SlotField::Amount {
                    self.values.amount = Some(value);
                } else {
                    self.values.miles = Some(value);
                }
            }
            SlotField::Days | SlotField::Travelers => {
                let max = if field == SlotField::Days { MAX_DAYS } else { MAX_TRAVELERS };
                let value = raw
                    .parse::<u32>()
                    .map_err(|_| SlotIssue::NotANumber { field, raw: raw.to_string() })?;
                if !(1..=max).contains(&value) {
                    return Err(SlotIssue::OutOfRange { field, raw: raw.to_string(), min: 1, max });
                }
                if field == SlotField::Days {
                    self.values.days = Some(value);
                } else {
                    self.values.travelers = Some(value);
                }
            }
            SlotField::ZipCode => {
                let zip = ZipCode::parse(raw).map_err(|_| SlotIssue::InvalidZip(raw.to_string()))?;
                self.values.zip_code = Some(zip);
            }
            SlotField::Category | SlotField::Description | SlotField::Attachment => {
                if raw.is_empty() {
                    return Ok(());
                }
                let value = Some(raw.to_string());
                match field {
                    SlotField::Category => self.values.category = value,
                    SlotField::Description => self.values.description = value,
                    _ => self.values.attachment = value,
                }
            }
            SlotField::Date => {
                return Err(SlotIssue::Date(DateParseError::Unparsable(raw.to_string())));
            }
        }
        Ok(())
    }

    fn extract_values(
        &mut self,
        tokens: &[&str],
        used: &mut [bool],
        filled: &mut Vec<SlotField>,
        issue: &mut Option<SlotIssue>,
    ) {
        for index in 0..tokens.len() {
            if used[index] {
                continue;
            }
            let token = tokens[index];
            let next = tokens.get(index + 1).copied().filter(|_| !used[index + 1]);
            let previous = index.checked_sub(1).map(|before| tokens[before]);

            if matches!(token, "zip" | "zipcode" | "zip:") {
                used[index] = true;
                continue;
            }

            let Some((number, unit)) = split_number(token) else {
                continue;
            };
            let unit = unit.or_else(|| next.filter(|word| is_unit(word)));
            let unit_is_next = unit.is_some() && unit == next && !token.ends_with(unit.unwrap_or(""));

            let field = match self.mode {
                ExpenseMode::PerDiem => match unit {
                    Some(word) if DAY_WORDS.contains(&word) => Some(SlotField::Days),
                    Some(word) if TRAVELER_WORDS.contains(&word) => Some(SlotField::Travelers),
                    Some(_) => None,
                    None if number.len() == 5 && number.bytes().all(|b| b.is_ascii_digit()) => {
                        Some(SlotField::ZipCode)
                    }
                    None if self.pending == Some(SlotField::ZipCode)
                        || previous.is_some_and(|word| word.starts_with("zip")) =>
                    {
                        Some(SlotField::ZipCode)
                    }
                    None => self.pending.filter(|field| field.is_numeric()),
                },
                ExpenseMode::Mileage => match unit {
                    Some(word) if MILE_WORDS.contains(&word) => Some(SlotField::Miles),
                    Some(_) => None,
                    None => self.pending.filter(|field| *field == SlotField::Miles),
                },
                ExpenseMode::Receipt => match unit {
                    Some(word) if CURRENCY_WORDS.contains(&word) || word == "$" => {
                        Some(SlotField::Amount)
                    }
                    Some(_) => None,
                    None => self.pending.filter(|field| *field == SlotField::Amount),
                },
            };

            let Some(field) = field else {
                continue;
            };
            if !self.wants(field) {
                continue;
            }
            used[index] = true;
            if unit_is_next {
                used[index + 1] = true;
            }
            self.record(field, number, filled, issue);
        }
    }

    fn fill_free_text(&mut self, raw_tokens: &[&str], used: &[bool], filled: &mut Vec<SlotField>) {
        let field = match self.mode {
            ExpenseMode::Receipt => SlotField::Category,
            ExpenseMode::PerDiem | ExpenseMode::Mileage => SlotField::Description,
        };
        let asked = self.pending == Some(field);
        if !(asked || (self.pending.is_none() && !self.values.is_filled(field))) {
            return;
        }

        let leftover = raw_tokens
            .iter()
            .zip(used)
            .filter(|(_, used)| !**used)
            .map(|(token, _)| *token)
            .collect::<Vec<_>>();
        let text = trim_filler(&leftover).join(" ");
        if text.chars().any(|c| c.is_alphabetic()) {
            match field {
                SlotField::Category => self.values.category = Some(text),
                _ => self.values.description = Some(text),
            }
            filled.push(field);
        }
    }

    /// A direct answer to the pending question that produced nothing usable.
    fn unanswered_issue(&self, raw: &str) -> Option<SlotIssue> {
        let field = self.pending?;
        if self.values.is_filled(field) || raw.is_empty() {
            return None;
        }
        match field {
            SlotField::Date => Some(SlotIssue::Date(DateParseError::Unparsable(raw.to_string()))),
            SlotField::ZipCode => Some(SlotIssue::InvalidZip(raw.to_string())),
            field if field.is_numeric() => {
                Some(SlotIssue::NotANumber { field, raw: raw.to_string() })
            }
            _ => None,
        }
    }
}

fn is_unit(word: &str) -> bool {
    DAY_WORDS.contains(&word)
        || TRAVELER_WORDS.contains(&word)
        || MILE_WORDS.contains(&word)
        || CURRENCY_WORDS.contains(&word)
}

/// `"$42.50"` → (`"42.50"`, `Some("$")`), `"120mi"` → (`"120"`, `Some("mi")`),
/// `"80128"` → (`"80128"`, `None`). Non-numeric tokens yield `None`.
fn split_number(token: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = token.strip_prefix('$') {
        return parse_decimal(rest).map(|_| (rest, Some("$")));
    }
    let digits_end = token
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == ','))
        .map(|(index, _)| index)
        .unwrap_or(token.len());
    if digits_end == 0 || !token[..digits_end].bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    let (number, suffix) = token.split_at(digits_end);
    if suffix.is_empty() {
        return Some((number, None));
    }
    MILE_WORDS.iter().chain(DAY_WORDS).find(|word| **word == suffix).map(|word| (number, Some(*word)))
}

/// Work-order markers and their ids are coding flags, not slot values.
fn mark_work_order(tokens: &[&str], used: &mut [bool]) {
    for index in 0..tokens.len() {
        let token = tokens[index];
        let span = if token == "wo" || token == "wo#" {
            2
        } else if token.starts_with("wo#") {
            1
        } else if token == "work" && tokens.get(index + 1) == Some(&"order") {
            3
        } else {
            0
        };
        for flag in used.iter_mut().skip(index).take(span) {
            *flag = true;
        }
    }
}

fn trim_filler<'a>(tokens: &'a [&'a str]) -> &'a [&'a str] {
    let is_filler = |token: &&str| EDGE_FILLER.contains(&token.to_ascii_lowercase().as_str());
    let start = tokens.iter().position(|token| !is_filler(token)).unwrap_or(tokens.len());
    let end = tokens.iter().rposition(|token| !is_filler(token)).map(|end| end + 1).unwrap_or(start);
    &tokens[start..end.max(start)]
}
