//! `reqwest` adapter for the expense backend's function endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use expensecart_core::coding::ActivityCode;
use expensecart_core::config::BackendConfig;
use expensecart_core::domain::cart::SubmissionPayload;
use expensecart_core::domain::identity::{DepartmentCode, Email};
use expensecart_core::domain::item::ZipCode;
use expensecart_core::lookup::{
    AccountMatch, Capability, ExpenseCodeLookup, HealthProbe, LookupError, OrgChartLookup,
    OrgChartRecord, PerDiemRate, PerDiemRateLookup, ReportSubmitter, SubmissionReceipt,
};

const FUNCTION_KEY_HEADER: &str = "x-functions-key";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend base url `{url}`: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ExpenseCodesEnvelope {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    matches: Vec<AccountMatch>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthEnvelope {
    #[serde(default)]
    ok: bool,
}

/// One client for every capability. Cheap to clone.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    function_key: Option<SecretString>,
    max_response_bytes: usize,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url.as_str())
            .field("function_key", &self.function_key.as_ref().map(|_| "<redacted>"))
            .field("max_response_bytes", &self.max_response_bytes)
            .finish()
    }
}

impl HttpBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &BackendConfig) -> Result<Self, BackendError> {
        // `Url::join` drops the last path segment unless the base ends with a slash.
        let mut raw = config.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|error| BackendError::InvalidBaseUrl {
            url: config.base_url.clone(),
            message: error.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            function_key: config.function_key.clone(),
            max_response_bytes: config.max_response_bytes,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, capability: Capability, path: &str) -> Result<Url, LookupError> {
        self.base_url.join(path).map_err(|error| LookupError::Rejected {
            capability,
            message: format!("invalid endpoint `{path}`: {error}"),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.function_key {
            Some(key) => request.header(FUNCTION_KEY_HEADER, key.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, capability: Capability, request: RequestBuilder) -> Result<Vec<u8>, LookupError> {
        let response = self.authorize(request).send().await.map_err(|error| {
            LookupError::Unavailable { capability, message: transport_message(&error) }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                event_name = "backend.http_status",
                capability = capability.as_str(),
                status = status.as_u16(),
                "backend returned a non-success status"
            );
            return Err(classify_status(capability, status));
        }

        read_limited(capability, response, self.max_response_bytes).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        capability: Capability,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, LookupError> {
        let url = self.endpoint(capability, path)?;
        debug!(event_name = "backend.request", capability = capability.as_str(), method = "GET", path);
        let body = self.send(capability, self.client.get(url).query(query)).await?;
        decode(capability, &body)
    }

    async fn post_json<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        capability: Capability,
        path: &str,
        payload: &B,
    ) -> Result<T, LookupError> {
        let url = self.endpoint(capability, path)?;
        debug!(event_name = "backend.request", capability = capability.as_str(), method = "POST", path);
        let body = self.send(capability, self.client.post(url).json(payload)).await?;
        decode(capability, &body)
    }
}

fn transport_message(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    }
}

/// Timeouts, throttling and server faults are worth a retry; other client errors are not.
fn classify_status(capability: Capability, status: StatusCode) -> LookupError {
    let message = format!("http status {}", status.as_u16());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        LookupError::Unavailable { capability, message }
    } else {
        LookupError::Rejected { capability, message }
    }
}

async fn read_limited(
    capability: Capability,
    mut response: Response,
    limit: usize,
) -> Result<Vec<u8>, LookupError> {
    if response.content_length().is_some_and(|length| length > limit as u64) {
        return Err(LookupError::Oversized { capability, limit });
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|error| LookupError::Unavailable {
        capability,
        message: transport_message(&error),
    })? {
        if body.len() + chunk.len() > limit {
            return Err(LookupError::Oversized { capability, limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn decode<T: DeserializeOwned>(capability: Capability, body: &[u8]) -> Result<T, LookupError> {
    serde_json::from_slice(body)
        .map_err(|error| LookupError::Decode { capability, message: error.to_string() })
}

fn backend_message(value: &Value) -> String {
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or("backend reported ok=false")
        .to_string()
}

#[async_trait]
impl ExpenseCodeLookup for HttpBackend {
    async fn lookup_accounts(
        &self,
        department: &DepartmentCode,
        activity: ActivityCode,
    ) -> Result<Vec<AccountMatch>, LookupError> {
        let capability = Capability::ExpenseCodes;
        let envelope: ExpenseCodesEnvelope = self
            .get_json(
                capability,
                "expense-codes",
                &[
                    ("departmentCode", department.to_string()),
                    ("activityCode", activity.value().to_string()),
                ],
            )
            .await?;

        if envelope.ok == Some(false) {
            return Err(LookupError::Unavailable {
                capability,
                message: envelope.error.unwrap_or_else(|| "backend reported ok=false".to_string()),
            });
        }
        Ok(envelope.matches)
    }
}

#[async_trait]
impl OrgChartLookup for HttpBackend {
    async fn lookup_email(&self, email: &Email) -> Result<OrgChartRecord, LookupError> {
        let capability = Capability::OrgChart;
        let value: Value = self
            .get_json(capability, "orgchart-lookup", &[("email", email.as_str().to_string())])
            .await?;

        if value.get("ok").and_then(Value::as_bool) == Some(false) {
            return Err(LookupError::Unavailable { capability, message: backend_message(&value) });
        }
        serde_json::from_value(value)
            .map_err(|error| LookupError::Decode { capability, message: error.to_string() })
    }
}

#[async_trait]
impl PerDiemRateLookup for HttpBackend {
    async fn daily_rate(
        &self,
        zip_code: &ZipCode,
        travel_date: NaiveDate,
    ) -> Result<PerDiemRate, LookupError> {
        let capability = Capability::PerDiemRate;
        let value: Value = self
            .get_json(
                capability,
                "per-diem-lookup",
                &[
                    ("zipCode", zip_code.as_str().to_string()),
                    ("travelDate", travel_date.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;

        // An explicit refusal goes straight to manual entry; retrying would not change it.
        if value.get("ok").and_then(Value::as_bool) == Some(false) {
            return Err(LookupError::Rejected { capability, message: backend_message(&value) });
        }
        serde_json::from_value(value)
            .map_err(|error| LookupError::Decode { capability, message: error.to_string() })
    }
}

#[async_trait]
impl ReportSubmitter for HttpBackend {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt, LookupError> {
        self.post_json(Capability::ReportSubmission, "submit-report", payload).await
    }
}

#[async_trait]
impl HealthProbe for HttpBackend {
    async fn probe(&self) -> Result<bool, LookupError> {
        let envelope: HealthEnvelope = self.get_json(Capability::Health, "health", &[]).await?;
        Ok(envelope.ok)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use secrecy::SecretString;

    use expensecart_core::config::BackendConfig;
    use expensecart_core::lookup::{Capability, LookupError};

    use super::{classify_status, BackendError, HttpBackend};

    fn config(base_url: &str) -> BackendConfig {
        BackendConfig {
            base_url: base_url.to_string(),
            function_key: Some(SecretString::from("super-secret".to_string())),
            timeout_secs: 5,
            max_retries: 1,
            max_response_bytes: 1_000,
        }
    }

    #[test]
    fn base_url_gains_a_trailing_slash() {
        let backend = HttpBackend::from_config(&config("http://localhost:7071/api")).expect("backend");
        assert_eq!(backend.base_url().as_str(), "http://localhost:7071/api/");
        let endpoint = backend.endpoint(Capability::Health, "health").expect("endpoint");
        assert_eq!(endpoint.as_str(), "http://localhost:7071/api/health");
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        let error = HttpBackend::from_config(&config("not a url")).expect_err("invalid url");
        assert!(matches!(error, BackendError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn debug_output_redacts_the_function_key() {
        let backend = HttpBackend::from_config(&config("http://localhost:7071/api/")).expect("backend");
        let rendered = format!("{backend:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn status_classification_separates_transient_failures() {
        let capability = Capability::ExpenseCodes;
        assert!(classify_status(capability, StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(classify_status(capability, StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(classify_status(capability, StatusCode::REQUEST_TIMEOUT).is_transient());
        assert!(matches!(
            classify_status(capability, StatusCode::BAD_REQUEST),
            LookupError::Rejected { .. }
        ));
        assert!(!classify_status(capability, StatusCode::NOT_FOUND).is_transient());
    }
}
