use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use expensecart_core::coding::ActivityCode;
use expensecart_core::domain::cart::SubmissionPayload;
use expensecart_core::domain::identity::{DepartmentCode, Email};
use expensecart_core::domain::item::ZipCode;
use expensecart_core::lookup::{
    AccountMatch, ExpenseCodeLookup, HealthProbe, LookupError, OrgChartLookup, OrgChartRecord,
    PerDiemRate, PerDiemRateLookup, ReportSubmitter, SubmissionReceipt,
};

/// Scripted failures handed out before the fake answers normally.
#[derive(Default)]
struct FailurePlan {
    queued: RwLock<VecDeque<LookupError>>,
    always: RwLock<Option<LookupError>>,
}

impl FailurePlan {
    async fn next(&self) -> Option<LookupError> {
        if let Some(error) = self.queued.write().await.pop_front() {
            return Some(error);
        }
        self.always.read().await.clone()
    }

    async fn push(&self, error: LookupError) {
        self.queued.write().await.push_back(error);
    }

    async fn set_always(&self, error: Option<LookupError>) {
        *self.always.write().await = error;
    }
}

#[derive(Default)]
pub struct InMemoryExpenseCodes {
    rows: RwLock<HashMap<(String, u16), Vec<AccountMatch>>>,
    failures: FailurePlan,
    calls: AtomicUsize,
}

impl InMemoryExpenseCodes {
    pub async fn insert(&self, department: &str, activity: u16, account_code: &str, description: &str) {
        self.rows
            .write()
            .await
            .entry((department.to_string(), activity))
            .or_default()
            .push(AccountMatch {
                account_code: account_code.to_string(),
                description: description.to_string(),
            });
    }

    pub async fn fail_next(&self, error: LookupError) {
        self.failures.push(error).await;
    }

    pub async fn fail_always(&self, error: Option<LookupError>) {
        self.failures.set_always(error).await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExpenseCodeLookup for InMemoryExpenseCodes {
    async fn lookup_accounts(
        &self,
        department: &DepartmentCode,
        activity: ActivityCode,
    ) -> Result<Vec<AccountMatch>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.next().await {
            return Err(error);
        }
        let rows = self.rows.read().await;
        Ok(rows.get(&(department.to_string(), activity.value())).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryOrgChart {
    records: RwLock<HashMap<String, OrgChartRecord>>,
    failures: FailurePlan,
    calls: AtomicUsize,
}

impl InMemoryOrgChart {
    pub async fn insert(&self, email: &str, record: OrgChartRecord) {
        self.records.write().await.insert(email.trim().to_ascii_lowercase(), record);
    }

    pub async fn insert_exact(&self, email: &str, department_code: &str, department_name: &str) {
        self.insert(
            email,
            OrgChartRecord {
                found: true,
                department_code: Some(department_code.to_string()),
                department_name: Some(department_name.to_string()),
                match_type: Some("exact".to_string()),
            },
        )
        .await;
    }

    pub async fn fail_next(&self, error: LookupError) {
        self.failures.push(error).await;
    }

    pub async fn fail_always(&self, error: Option<LookupError>) {
        self.failures.set_always(error).await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrgChartLookup for InMemoryOrgChart {
    async fn lookup_email(&self, email: &Email) -> Result<OrgChartRecord, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.next().await {
            return Err(error);
        }
        let records = self.records.read().await;
        Ok(records.get(email.as_str()).cloned().unwrap_or_else(OrgChartRecord::not_found))
    }
}

#[derive(Default)]
pub struct InMemoryPerDiemRates {
    rates: RwLock<HashMap<String, Decimal>>,
    failures: FailurePlan,
    calls: AtomicUsize,
}

impl InMemoryPerDiemRates {
    pub async fn insert(&self, zip_code: &str, daily_rate: Decimal) {
        self.rates.write().await.insert(zip_code.to_string(), daily_rate);
    }

    pub async fn fail_next(&self, error: LookupError) {
        self.failures.push(error).await;
    }

    pub async fn fail_always(&self, error: Option<LookupError>) {
        self.failures.set_always(error).await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PerDiemRateLookup for InMemoryPerDiemRates {
    async fn daily_rate(
        &self,
        zip_code: &ZipCode,
        travel_date: NaiveDate,
    ) -> Result<PerDiemRate, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.next().await {
            return Err(error);
        }
        let rates = self.rates.read().await;
        match rates.get(zip_code.as_str()) {
            Some(daily_rate) => Ok(PerDiemRate {
                daily_rate: *daily_rate,
                currency: "USD".to_string(),
                as_of: Some(travel_date),
            }),
            None => Err(LookupError::Rejected {
                capability: expensecart_core::lookup::Capability::PerDiemRate,
                message: format!("no per diem rate for {zip_code}"),
            }),
        }
    }
}

/// Records every payload and answers with a configurable receipt.
pub struct RecordingSubmitter {
    submitted: RwLock<Vec<SubmissionPayload>>,
    receipt: RwLock<Option<SubmissionReceipt>>,
    failures: FailurePlan,
    calls: AtomicUsize,
}

impl Default for RecordingSubmitter {
    fn default() -> Self {
        Self {
            submitted: RwLock::new(Vec::new()),
            receipt: RwLock::new(None),
            failures: FailurePlan::default(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl RecordingSubmitter {
    /// Replaces the default "sent" receipt with a fixed answer.
    pub async fn respond_with(&self, receipt: SubmissionReceipt) {
        *self.receipt.write().await = Some(receipt);
    }

    pub async fn fail_next(&self, error: LookupError) {
        self.failures.push(error).await;
    }

    pub async fn fail_always(&self, error: Option<LookupError>) {
        self.failures.set_always(error).await;
    }

    pub async fn submitted(&self) -> Vec<SubmissionPayload> {
        self.submitted.read().await.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportSubmitter for RecordingSubmitter {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.next().await {
            return Err(error);
        }
        self.submitted.write().await.push(payload.clone());

        let configured = self.receipt.read().await.clone();
        Ok(configured.unwrap_or_else(|| SubmissionReceipt {
            ok: true,
            sent: Some(true),
            line_count: u32::try_from(payload.items.len()).ok(),
            amount_total: Some(payload.amount_total()),
            email_error: None,
        }))
    }
}

#[derive(Default)]
pub struct StaticHealth {
    unhealthy: RwLock<Option<LookupError>>,
}

impl StaticHealth {
    pub async fn set_failure(&self, error: Option<LookupError>) {
        *self.unhealthy.write().await = error;
    }
}

#[async_trait]
impl HealthProbe for StaticHealth {
    async fn probe(&self) -> Result<bool, LookupError> {
        match self.unhealthy.read().await.clone() {
            Some(error) => Err(error),
            None => Ok(true),
        }
    }
}

/// Every capability backed by memory, shared through `Arc` so tests can keep handles
/// for assertions after handing the fakes to a session.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    pub expense_codes: Arc<InMemoryExpenseCodes>,
    pub org_chart: Arc<InMemoryOrgChart>,
    pub per_diem: Arc<InMemoryPerDiemRates>,
    pub submitter: Arc<RecordingSubmitter>,
    pub health: Arc<StaticHealth>,
}
