use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};

use expensecart_backend::HttpBackend;
use expensecart_core::coding::ActivityCode;
use expensecart_core::config::BackendConfig;
use expensecart_core::domain::cart::{SubmissionLine, SubmissionPayload};
use expensecart_core::domain::identity::{DepartmentCode, Email};
use expensecart_core::domain::item::{ExpenseMode, ZipCode};
use expensecart_core::lookup::{
    retry_once, Capability, ExpenseCodeLookup, HealthProbe, LookupError, OrgChartLookup,
    PerDiemRateLookup, ReportSubmitter,
};

#[derive(Default)]
struct Recorder {
    keys: Mutex<Vec<Option<String>>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
    bodies: Mutex<Vec<Value>>,
    flaky_hits: AtomicUsize,
}

impl Recorder {
    fn record(&self, headers: &HeaderMap, query: HashMap<String, String>) {
        let key = headers
            .get("x-functions-key")
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        self.keys.lock().expect("keys lock").push(key);
        self.queries.lock().expect("queries lock").push(query);
    }
}

type Shared = Arc<Recorder>;

async fn expense_codes(
    State(recorder): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    recorder.record(&headers, query);
    Json(json!({
        "ok": true,
        "matches": [
            { "accountCode": "110770", "description": "Training - Directors" },
            { "accountCode": "110771", "description": "Training - Staff" }
        ]
    }))
}

async fn orgchart(
    State(recorder): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let email = query.get("email").cloned().unwrap_or_default();
    recorder.record(&headers, query);
    if email == "pat.lee@example.coop" {
        Json(json!({
            "ok": true,
            "found": true,
            "departmentCode": "620",
            "departmentName": "INFORMATION TECHNOLOGY",
            "departmentMatchType": "exact"
        }))
    } else {
        Json(json!({ "ok": true, "found": false }))
    }
}

async fn per_diem(
    State(recorder): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let zip = query.get("zipCode").cloned().unwrap_or_default();
    recorder.record(&headers, query);
    if zip == "80128" {
        Json(json!({ "ok": true, "zipCode": "80128", "mieRate": 79.0 }))
    } else {
        Json(json!({ "ok": false, "error": "No rate for ZIP" }))
    }
}

async fn submit_report(State(recorder): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let lines = body["items"].as_array().map(Vec::len).unwrap_or_default();
    recorder.bodies.lock().expect("bodies lock").push(body);
    Json(json!({ "ok": true, "sent": true, "lineCount": lines, "amountTotal": 42.5 }))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn bad_request() -> StatusCode {
    StatusCode::BAD_REQUEST
}

async fn oversized() -> String {
    "x".repeat(4_096)
}

async fn flaky(State(recorder): State<Shared>) -> Response {
    if recorder.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        StatusCode::BAD_GATEWAY.into_response()
    } else {
        Json(json!({ "ok": true })).into_response()
    }
}

fn healthy_routes(recorder: Shared) -> Router {
    Router::new()
        .route("/api/expense-codes", get(expense_codes))
        .route("/api/orgchart-lookup", get(orgchart))
        .route("/api/per-diem-lookup", get(per_diem))
        .route("/api/submit-report", post(submit_report))
        .route("/api/health", get(health))
        .route("/down/expense-codes", get(unavailable))
        .route("/rejecting/orgchart-lookup", get(bad_request))
        .route("/huge/health", get(oversized))
        .route("/flaky/health", get(flaky))
        .with_state(recorder)
}

async fn spawn_server(recorder: Shared) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let address = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, healthy_routes(recorder)).await;
    });
    format!("http://{address}")
}

fn backend(root: &str, prefix: &str, max_response_bytes: usize) -> HttpBackend {
    let config = BackendConfig {
        base_url: format!("{root}/{prefix}"),
        function_key: Some(SecretString::from("fn-key-123".to_string())),
        timeout_secs: 5,
        max_retries: 1,
        max_response_bytes,
    };
    HttpBackend::from_config(&config).expect("http backend")
}

#[tokio::test]
async fn expense_codes_are_decoded_and_requests_carry_the_function_key() {
    let recorder = Shared::default();
    let root = spawn_server(recorder.clone()).await;
    let client = backend(&root, "api", 500_000);

    let department = DepartmentCode::parse("110").expect("department");
    let matches = client.lookup_accounts(&department, ActivityCode::TRAINING).await.expect("lookup");

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].account_code, "110770");
    assert_eq!(matches[1].description, "Training - Staff");

    let keys = recorder.keys.lock().expect("keys lock").clone();
    assert_eq!(keys, vec![Some("fn-key-123".to_string())]);
    let queries = recorder.queries.lock().expect("queries lock").clone();
    assert_eq!(queries[0].get("departmentCode").map(String::as_str), Some("110"));
    assert_eq!(queries[0].get("activityCode").map(String::as_str), Some("770"));
}

#[tokio::test]
async fn org_chart_lookup_reports_exact_and_missing_records() {
    let root = spawn_server(Shared::default()).await;
    let client = backend(&root, "api", 500_000);

    let known = Email::parse("Pat.Lee@example.coop").expect("email");
    let record = client.lookup_email(&known).await.expect("lookup");
    let department = record.strict_department().expect("exact department");
    assert_eq!(department.code.as_str(), "620");

    let unknown = Email::parse("nobody@example.coop").expect("email");
    let record = client.lookup_email(&unknown).await.expect("lookup");
    assert!(!record.found);
    assert!(record.strict_department().is_none());
}

#[tokio::test]
async fn per_diem_lookup_accepts_legacy_rate_field_and_rejects_ok_false() {
    let recorder = Shared::default();
    let root = spawn_server(recorder.clone()).await;
    let client = backend(&root, "api", 500_000);
    let date = NaiveDate::from_ymd_opt(2026, 2, 17).expect("date");

    let rate = client
        .daily_rate(&ZipCode::parse("80128").expect("zip"), date)
        .await
        .expect("rate");
    assert_eq!(rate.daily_rate, Decimal::new(79, 0));

    let queries = recorder.queries.lock().expect("queries lock").clone();
    assert_eq!(queries[0].get("travelDate").map(String::as_str), Some("2026-02-17"));

    let refused = client.daily_rate(&ZipCode::parse("99999").expect("zip"), date).await;
    match refused {
        Err(LookupError::Rejected { capability, message }) => {
            assert_eq!(capability, Capability::PerDiemRate);
            assert_eq!(message, "No rate for ZIP");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn submission_posts_camel_case_payload_and_returns_receipt() {
    let recorder = Shared::default();
    let root = spawn_server(recorder.clone()).await;
    let client = backend(&root, "api", 500_000);

    let payload = SubmissionPayload {
        requester_email: "pat.lee@example.coop".to_string(),
        to_email: "ap@example.coop".to_string(),
        cc_requester: true,
        department_code: Some("620".to_string()),
        items: vec![SubmissionLine {
            id: "4b6f7c1e-0000-4000-8000-000000000001".to_string(),
            item_type: ExpenseMode::Receipt,
            department_code: "620".to_string(),
            activity_code: "710".to_string(),
            account_code: Some("620710".to_string()),
            gl_account_override: None,
            posting_account: Some("620710".to_string()),
            travel_date: NaiveDate::from_ymd_opt(2026, 2, 17).expect("date"),
            reference: "team lunch".to_string(),
            ledger_reference: "team lunch".to_string(),
            invoice: "EXP 02-2026".to_string(),
            amount_total: Decimal::new(4250, 2),
            currency: "USD".to_string(),
            needs_finance_review: false,
            receipt_upload_id: None,
        }],
        attachments: Vec::new(),
    };

    let receipt = client.submit(&payload).await.expect("submission");
    assert!(receipt.is_confirmed());
    assert_eq!(receipt.line_count, Some(1));

    let bodies = recorder.bodies.lock().expect("bodies lock").clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["requesterEmail"], "pat.lee@example.coop");
    assert_eq!(bodies[0]["items"][0]["type"], "Receipt");
    assert_eq!(bodies[0]["items"][0]["postingAccount"], "620710");
    assert!(bodies[0]["items"][0].get("glAccountOverride").is_none());
}

#[tokio::test]
async fn server_errors_are_transient_and_client_errors_are_not() {
    let root = spawn_server(Shared::default()).await;
    let department = DepartmentCode::parse("110").expect("department");

    let down = backend(&root, "down", 500_000)
        .lookup_accounts(&department, ActivityCode::TRAINING)
        .await
        .expect_err("503 should fail");
    assert!(down.is_transient());
    assert_eq!(down.capability(), Capability::ExpenseCodes);

    let email = Email::parse("pat.lee@example.coop").expect("email");
    let rejected = backend(&root, "rejecting", 500_000)
        .lookup_email(&email)
        .await
        .expect_err("400 should fail");
    assert!(!rejected.is_transient());
}

#[tokio::test]
async fn responses_over_the_ceiling_are_refused() {
    let root = spawn_server(Shared::default()).await;
    let error = backend(&root, "huge", 1_024).probe().await.expect_err("oversized");
    assert_eq!(error, LookupError::Oversized { capability: Capability::Health, limit: 1_024 });
    assert!(!error.is_transient());
}

#[tokio::test]
async fn health_check_and_single_retry_recover_from_one_bad_gateway() {
    let recorder = Shared::default();
    let root = spawn_server(recorder.clone()).await;

    assert_eq!(backend(&root, "api", 500_000).probe().await, Ok(true));

    let flaky = backend(&root, "flaky", 500_000);
    let flaky = &flaky;
    let healthy = retry_once(Capability::Health, move || async move { flaky.probe().await }).await;
    assert_eq!(healthy, Ok(true));
    assert_eq!(recorder.flaky_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_backends_are_reported_as_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    drop(listener);

    let error = backend(&format!("http://{address}"), "api", 500_000)
        .probe()
        .await
        .expect_err("connection refused");
    assert!(matches!(error, LookupError::Unavailable { capability: Capability::Health, .. }));
}
