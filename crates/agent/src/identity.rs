//! Requester email and department resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use expensecart_core::domain::identity::{Department, DepartmentCode, Email};
use expensecart_core::lookup::{Capability, LookupError, OrgChartLookup, RetryPolicy};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("I can't tell who \"me\" is in this conversation. Please type your email address.")]
    NoSignedInUser,
    #[error("`{0}` doesn't look like an email address. Please use name@domain.tld.")]
    InvalidEmail(String),
    #[error("`{0}` isn't a department code. Please enter exactly 3 digits.")]
    InvalidDepartmentCode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepartmentSource {
    Override,
    Directory,
    Manual,
}

impl DepartmentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Directory => "directory",
            Self::Manual => "manual",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepartmentResolution {
    Found { department: Department, source: DepartmentSource },
    /// No exact directory match; the user has to type a code.
    NotFound,
    /// The directory stayed unavailable after the retry; also falls back to manual entry.
    Unavailable(LookupError),
}

pub struct IdentityResolver {
    org_chart: Arc<dyn OrgChartLookup>,
    overrides: BTreeMap<Email, DepartmentCode>,
    retry: RetryPolicy,
}

impl IdentityResolver {
    pub fn new(org_chart: Arc<dyn OrgChartLookup>) -> Self {
        Self { org_chart, overrides: BTreeMap::new(), retry: RetryPolicy::single() }
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<Email, DepartmentCode>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `"me"` maps to the host-supplied identity; anything else must be an email.
    pub fn resolve_identity(
        &self,
        raw: &str,
        signed_in: Option<&Email>,
    ) -> Result<Email, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("me") {
            return signed_in.cloned().ok_or(IdentityError::NoSignedInUser);
        }
        Email::parse(trimmed).map_err(|_| IdentityError::InvalidEmail(trimmed.to_string()))
    }

    /// Override map first, then an exact directory match. Fuzzy matches are never used.
    pub async fn resolve_department(&self, email: &Email) -> DepartmentResolution {
        if let Some(code) = self.overrides.get(email) {
            info!(
                event_name = "identity.department_override",
                department_code = %code,
                "department taken from configured override"
            );
            return DepartmentResolution::Found {
                department: Department::new(code.clone(), None),
                source: DepartmentSource::Override,
            };
        }

        let org_chart = &self.org_chart;
        let result = self
            .retry
            .call(Capability::OrgChart, move || async move { org_chart.lookup_email(email).await })
            .await;

        match result {
            Ok(record) => match record.strict_department() {
                Some(department) => {
                    info!(
                        event_name = "identity.department_lookup",
                        department_code = %department.code,
                        "department resolved from directory"
                    );
                    DepartmentResolution::Found { department, source: DepartmentSource::Directory }
                }
                None => {
                    info!(
                        event_name = "identity.department_lookup",
                        found = record.found,
                        match_type = record.match_type.as_deref().unwrap_or(""),
                        "no strict directory match"
                    );
                    DepartmentResolution::NotFound
                }
            },
            Err(error) => {
                warn!(
                    event_name = "identity.department_lookup_failed",
                    error = %error,
                    "directory lookup failed, falling back to manual entry"
                );
                DepartmentResolution::Unavailable(error)
            }
        }
    }

    pub fn parse_manual_department(&self, raw: &str) -> Result<Department, IdentityError> {
        let trimmed = raw.trim();
        DepartmentCode::parse(trimmed)
            .map(|code| Department::new(code, None))
            .map_err(|_| IdentityError::InvalidDepartmentCode(trimmed.to_string()))
    }
}
