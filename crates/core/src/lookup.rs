//! External capabilities the engine consumes.
//!
//! Each backend endpoint is a trait so the conversation and the coding resolver can be
//! driven by the HTTP adapter in production and by in-memory fakes in tests. Responses
//! are kept to the projected fields the engine needs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::coding::ActivityCode;
use crate::domain::cart::SubmissionPayload;
use crate::domain::identity::{Department, DepartmentCode, Email};
use crate::domain::item::ZipCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ExpenseCodes,
    OrgChart,
    PerDiemRate,
    ReportSubmission,
    Health,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExpenseCodes => "expense_codes",
            Self::OrgChart => "orgchart",
            Self::PerDiemRate => "per_diem_rate",
            Self::ReportSubmission => "report_submission",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("{capability} is unavailable: {message}")]
    Unavailable { capability: Capability, message: String },
    #[error("{capability} rejected the request: {message}")]
    Rejected { capability: Capability, message: String },
    #[error("{capability} returned an undecodable response: {message}")]
    Decode { capability: Capability, message: String },
    #[error("{capability} response exceeded {limit} bytes")]
    Oversized { capability: Capability, limit: usize },
}

impl LookupError {
    /// Only transport-level failures are worth a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Unavailable { capability, .. }
            | Self::Rejected { capability, .. }
            | Self::Decode { capability, .. }
            | Self::Oversized { capability, .. } => *capability,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMatch {
    pub account_code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgChartRecord {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub department_code: Option<String>,
    #[serde(default)]
    pub department_name: Option<String>,
    #[serde(default, rename = "departmentMatchType")]
    pub match_type: Option<String>,
}

impl OrgChartRecord {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// The department, but only when the directory reported an exact match with a
    /// well-formed code. Fuzzy or candidate-only answers are treated as not found.
    pub fn strict_department(&self) -> Option<Department> {
        if !self.found {
            return None;
        }
        let exact = self
            .match_type
            .as_deref()
            .map(|kind| kind.trim().eq_ignore_ascii_case("exact"))
            .unwrap_or(true);
        if !exact {
            return None;
        }
        let code = DepartmentCode::parse(self.department_code.as_deref()?).ok()?;
        Some(Department::new(code, self.department_name.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerDiemRate {
    #[serde(alias = "mieRate")]
    pub daily_rate: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub sent: Option<bool>,
    #[serde(default)]
    pub line_count: Option<u32>,
    #[serde(default)]
    pub amount_total: Option<Decimal>,
    #[serde(default)]
    pub email_error: Option<String>,
}

impl SubmissionReceipt {
    /// Anything short of an explicit `ok` plus `sent: true` counts as failure.
    pub fn is_confirmed(&self) -> bool {
        self.ok && self.sent == Some(true)
    }

    pub fn failure_reason(&self) -> String {
        if let Some(error) = self.email_error.as_deref().filter(|error| !error.trim().is_empty()) {
            return error.to_string();
        }
        match (self.ok, self.sent) {
            (false, _) => "backend did not acknowledge the report".to_string(),
            (true, None) => "backend response did not include a sent flag".to_string(),
            (true, Some(false)) => "backend reported the report as not sent".to_string(),
            (true, Some(true)) => String::new(),
        }
    }
}

#[async_trait]
pub trait ExpenseCodeLookup: Send + Sync {
    async fn lookup_accounts(
        &self,
        department: &DepartmentCode,
        activity: ActivityCode,
    ) -> Result<Vec<AccountMatch>, LookupError>;
}

#[async_trait]
pub trait OrgChartLookup: Send + Sync {
    async fn lookup_email(&self, email: &Email) -> Result<OrgChartRecord, LookupError>;
}

#[async_trait]
pub trait PerDiemRateLookup: Send + Sync {
    async fn daily_rate(
        &self,
        zip_code: &ZipCode,
        travel_date: NaiveDate,
    ) -> Result<PerDiemRate, LookupError>;
}

#[async_trait]
pub trait ReportSubmitter: Send + Sync {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt, LookupError>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<bool, LookupError>;
}

#[async_trait]
impl<T: ExpenseCodeLookup + ?Sized> ExpenseCodeLookup for Arc<T> {
    async fn lookup_accounts(
        &self,
        department: &DepartmentCode,
        activity: ActivityCode,
    ) -> Result<Vec<AccountMatch>, LookupError> {
        (**self).lookup_accounts(department, activity).await
    }
}

#[async_trait]
impl<T: OrgChartLookup + ?Sized> OrgChartLookup for Arc<T> {
    async fn lookup_email(&self, email: &Email) -> Result<OrgChartRecord, LookupError> {
        (**self).lookup_email(email).await
    }
}

#[async_trait]
impl<T: PerDiemRateLookup + ?Sized> PerDiemRateLookup for Arc<T> {
    async fn daily_rate(
        &self,
        zip_code: &ZipCode,
        travel_date: NaiveDate,
    ) -> Result<PerDiemRate, LookupError> {
        (**self).daily_rate(zip_code, travel_date).await
    }
}

#[async_trait]
impl<T: ReportSubmitter + ?Sized> ReportSubmitter for Arc<T> {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt, LookupError> {
        (**self).submit(payload).await
    }
}

#[async_trait]
impl<T: HealthProbe + ?Sized> HealthProbe for Arc<T> {
    async fn probe(&self) -> Result<bool, LookupError> {
        (**self).probe().await
    }
}

/// How many extra attempts a call site may make after a transient failure. Capped at one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries: max_retries.min(1) }
    }

    pub fn single() -> Self {
        Self { max_retries: 1 }
    }

    pub fn none() -> Self {
        Self { max_retries: 0 }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn call<T, F, Fut>(&self, capability: Capability, mut call: F) -> Result<T, LookupError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LookupError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "lookup.retry",
                        capability = capability.as_str(),
                        attempt,
                        error = %error,
                        "transient lookup failure, retrying"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub async fn retry_once<T, F, Fut>(capability: Capability, call: F) -> Result<T, LookupError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LookupError>>,
{
    RetryPolicy::single().call(capability, call).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::{
        retry_once, Capability, LookupError, OrgChartRecord, PerDiemRate, RetryPolicy,
        SubmissionReceipt,
    };

    fn unavailable() -> LookupError {
        LookupError::Unavailable {
            capability: Capability::PerDiemRate,
            message: "timeout".to_string(),
        }
    }

    #[tokio::test]
    async fn retries_a_transient_failure_exactly_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, LookupError> = RetryPolicy::single()
            .call(Capability::PerDiemRate, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_once(Capability::OrgChart, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(unavailable())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), LookupError> = RetryPolicy::single()
            .call(Capability::ExpenseCodes, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LookupError::Rejected {
                    capability: Capability::ExpenseCodes,
                    message: "bad request".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_budget_is_capped_at_one() {
        assert_eq!(RetryPolicy::new(5).max_retries(), 1);
        assert_eq!(RetryPolicy::new(0).max_retries(), 0);
    }

    #[test]
    fn strict_department_ignores_fuzzy_matches() {
        let exact = OrgChartRecord {
            found: true,
            department_code: Some("620".to_string()),
            department_name: Some("INFORMATION TECHNOLOGY".to_string()),
            match_type: Some("exact".to_string()),
        };
        assert_eq!(exact.strict_department().map(|d| d.code.to_string()), Some("620".into()));

        let fuzzy = OrgChartRecord { match_type: Some("fuzzy".to_string()), ..exact.clone() };
        assert!(fuzzy.strict_department().is_none());

        let blank = OrgChartRecord { department_code: Some(String::new()), ..exact.clone() };
        assert!(blank.strict_department().is_none());

        assert!(OrgChartRecord::not_found().strict_department().is_none());
    }

    #[test]
    fn per_diem_rate_accepts_legacy_field_name() {
        let rate: PerDiemRate =
            serde_json::from_str(r#"{"ok":true,"zipCode":"80128","mieRate":79.0}"#)
                .expect("legacy payload should decode");
        assert_eq!(rate.daily_rate.to_string(), "79");
        assert_eq!(rate.currency, "USD");
    }

    #[test]
    fn submission_requires_explicit_sent_flag() {
        let missing_flag = SubmissionReceipt { ok: true, ..SubmissionReceipt::default() };
        assert!(!missing_flag.is_confirmed());
        assert!(missing_flag.failure_reason().contains("sent flag"));

        let not_sent = SubmissionReceipt {
            ok: true,
            sent: Some(false),
            email_error: Some("Missing GL Account on 1 line(s).".to_string()),
            ..SubmissionReceipt::default()
        };
        assert!(!not_sent.is_confirmed());
        assert_eq!(not_sent.failure_reason(), "Missing GL Account on 1 line(s).");

        let sent = SubmissionReceipt { ok: true, sent: Some(true), ..SubmissionReceipt::default() };
        assert!(sent.is_confirmed());
    }
}
