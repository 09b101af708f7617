use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepartmentCode(String);

impl DepartmentCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.len() == 3 && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(DomainError::InvalidDepartmentCode(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DepartmentCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DepartmentCode> for String {
    fn from(value: DepartmentCode) -> Self {
        value.0
    }
}

impl fmt::Display for DepartmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A lower-cased `local@domain.tld` address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let normalized = raw.trim().to_ascii_lowercase();
        let invalid = || DomainError::InvalidEmail(raw.trim().to_string());

        if normalized.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let (local, domain) = normalized.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.contains('@') {
            return Err(invalid());
        }
        let labels = domain.split('.').collect::<Vec<_>>();
        if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
            return Err(invalid());
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub code: DepartmentCode,
    pub name: Option<String>,
}

impl Department {
    pub fn new(code: DepartmentCode, name: Option<String>) -> Self {
        let name = name.map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        Self { code, name }
    }
}

/// Who is filing the report. Both halves are sticky for the conversation and only
/// change through the explicit `change_*` operations or `reset`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterIdentity {
    email: Option<Email>,
    department: Option<Department>,
}

impl RequesterIdentity {
    pub fn email(&self) -> Option<&Email> {
        self.email.as_ref()
    }

    pub fn department(&self) -> Option<&Department> {
        self.department.as_ref()
    }

    pub fn department_code(&self) -> Option<&DepartmentCode> {
        self.department.as_ref().map(|department| &department.code)
    }

    pub fn is_complete(&self) -> bool {
        self.email.is_some() && self.department.is_some()
    }

    /// Returns `false` without touching state when an email is already set.
    pub fn assign_email(&mut self, email: Email) -> bool {
        if self.email.is_some() {
            return false;
        }
        self.email = Some(email);
        true
    }

    /// Returns `false` without touching state when a department is already set.
    pub fn assign_department(&mut self, department: Department) -> bool {
        if self.department.is_some() {
            return false;
        }
        self.department = Some(department);
        true
    }

    /// A different user implies a different department lookup, so both are cleared.
    pub fn change_user(&mut self) {
        self.email = None;
        self.department = None;
    }

    pub fn change_department(&mut self) {
        self.department = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::{Department, DepartmentCode, Email, RequesterIdentity};
    use crate::errors::DomainError;

    #[test]
    fn department_code_requires_exactly_three_digits() {
        assert_eq!(DepartmentCode::parse(" 110 ").map(|code| code.to_string()), Ok("110".into()));
        assert!(matches!(DepartmentCode::parse("11"), Err(DomainError::InvalidDepartmentCode(_))));
        assert!(DepartmentCode::parse("1100").is_err());
        assert!(DepartmentCode::parse("1a0").is_err());
        assert!(DepartmentCode::parse("").is_err());
    }

    #[test]
    fn department_code_deserialization_is_validated() {
        let parsed: Result<DepartmentCode, _> = serde_json::from_str("\"620\"");
        assert!(parsed.is_ok());
        let rejected: Result<DepartmentCode, _> = serde_json::from_str("\"62\"");
        assert!(rejected.is_err());
    }

    #[test]
    fn email_is_normalized_and_shape_checked() {
        let email = Email::parse("  Pat.Lee@Example.COOP ").expect("valid email");
        assert_eq!(email.as_str(), "pat.lee@example.coop");

        for bad in ["me", "pat@", "@example.coop", "pat@example", "pat@@example.coop", "p at@x.io"]
        {
            assert!(Email::parse(bad).is_err(), "`{bad}` should be rejected");
        }
    }

    #[test]
    fn email_and_department_are_sticky_until_explicit_change() {
        let mut identity = RequesterIdentity::default();
        assert!(identity.assign_email(Email::parse("a@b.co").expect("email")));
        assert!(!identity.assign_email(Email::parse("other@b.co").expect("email")));
        assert_eq!(identity.email().map(Email::as_str), Some("a@b.co"));

        let department = Department::new(DepartmentCode::parse("110").expect("code"), None);
        assert!(identity.assign_department(department.clone()));
        assert!(identity.is_complete());

        identity.change_department();
        assert!(identity.department().is_none());
        assert!(identity.email().is_some());

        assert!(identity.assign_department(department));
        identity.change_user();
        assert!(identity.email().is_none());
        assert!(identity.department().is_none());
    }

    #[test]
    fn blank_department_names_are_dropped() {
        let department =
            Department::new(DepartmentCode::parse("620").expect("code"), Some("  ".to_string()));
        assert!(department.name.is_none());
    }
}
