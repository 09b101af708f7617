use thiserror::Error;

use crate::lookup::LookupError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("department code must be exactly 3 digits, got `{0}`")]
    InvalidDepartmentCode(String),
    #[error("zip code must be exactly 5 digits, got `{0}`")]
    InvalidZipCode(String),
    #[error("`{0}` is not a valid email address")]
    InvalidEmail(String),
    #[error("activity code `{0}` is not one of 700|710|730|740|770|790")]
    UnknownActivityCode(String),
    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(String),
    #[error("amount {amount} is above the {max} limit for one line item")]
    AmountTooLarge { amount: String, max: String },
    #[error("amount is too large to compute")]
    AmountOverflow,
    #[error("item {index} is out of range for a cart of {len} item(s)")]
    ItemIndexOutOfRange { index: usize, len: usize },
    #[error("cannot submit an empty cart")]
    EmptyCartSubmission,
    #[error("requester email is required before submission")]
    MissingRequesterEmail,
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("submission was not confirmed: {0}")]
    SubmissionNotConfirmed(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The expense service is temporarily unavailable. Please try again later."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::Lookup(error) if error.is_transient() => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::Lookup(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::SubmissionNotConfirmed(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}
