use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amounts::DEFAULT_MILEAGE_RATE;
use crate::dates::DEFAULT_UTC_OFFSET_MINUTES;
use crate::domain::cart::SubmissionSettings;
use crate::domain::identity::{DepartmentCode, Email};

pub const DEFAULT_CONFIG_FILE: &str = "expensecart.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub travel: TravelConfig,
    pub submission: SubmissionConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    pub function_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_response_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct TravelConfig {
    pub mileage_rate: Decimal,
    pub currency: String,
    pub utc_offset_minutes: i32,
}

#[derive(Clone, Debug)]
pub struct SubmissionConfig {
    pub to_email: String,
    pub cc_requester: bool,
}

#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    pub signed_in_email: Option<String>,
    pub department_overrides: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub backend_base_url: Option<String>,
    pub function_key: Option<String>,
    pub mileage_rate: Option<Decimal>,
    pub to_email: Option<String>,
    pub signed_in_email: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: "http://localhost:7071/api/".to_string(),
                function_key: None,
                timeout_secs: 20,
                max_retries: 1,
                max_response_bytes: 500_000,
            },
            travel: TravelConfig {
                mileage_rate: DEFAULT_MILEAGE_RATE,
                currency: "USD".to_string(),
                utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            },
            submission: SubmissionConfig { to_email: String::new(), cc_requester: true },
            identity: IdentityConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Validated submission routing. Only meaningful after `validate` succeeded.
    pub fn submission_settings(&self) -> Result<SubmissionSettings, ConfigError> {
        let to_email = Email::parse(&self.submission.to_email).map_err(|_| {
            ConfigError::Validation("submission.to_email must be an email address".to_string())
        })?;
        Ok(SubmissionSettings { to_email, cc_requester: self.submission.cc_requester })
    }

    pub fn signed_in_email(&self) -> Option<Email> {
        self.identity.signed_in_email.as_deref().and_then(|raw| Email::parse(raw).ok())
    }

    /// Email → department code pairs, keys normalized to lower case.
    pub fn department_overrides(&self) -> BTreeMap<Email, DepartmentCode> {
        self.identity
            .department_overrides
            .iter()
            .filter_map(|(email, code)| {
                Some((Email::parse(email).ok()?, DepartmentCode::parse(code).ok()?))
            })
            .collect()
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(backend) = patch.backend {
            if let Some(base_url) = backend.base_url {
                self.backend.base_url = base_url;
            }
            if let Some(function_key_value) = backend.function_key {
                self.backend.function_key = Some(secret_value(function_key_value));
            }
            if let Some(timeout_secs) = backend.timeout_secs {
                self.backend.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = backend.max_retries {
                self.backend.max_retries = max_retries;
            }
            if let Some(max_response_bytes) = backend.max_response_bytes {
                self.backend.max_response_bytes = max_response_bytes;
            }
        }

        if let Some(travel) = patch.travel {
            if let Some(mileage_rate) = travel.mileage_rate {
                self.travel.mileage_rate = mileage_rate;
            }
            if let Some(currency) = travel.currency {
                self.travel.currency = currency;
            }
            if let Some(utc_offset_minutes) = travel.utc_offset_minutes {
                self.travel.utc_offset_minutes = utc_offset_minutes;
            }
        }

        if let Some(submission) = patch.submission {
            if let Some(to_email) = submission.to_email {
                self.submission.to_email = to_email;
            }
            if let Some(cc_requester) = submission.cc_requester {
                self.submission.cc_requester = cc_requester;
            }
        }

        if let Some(identity) = patch.identity {
            if let Some(signed_in_email) = identity.signed_in_email {
                self.identity.signed_in_email = Some(signed_in_email);
            }
            if let Some(department_overrides) = identity.department_overrides {
                self.identity.department_overrides = department_overrides
                    .into_iter()
                    .map(|(email, code)| (email.trim().to_ascii_lowercase(), code))
                    .collect();
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("EXPENSECART_BACKEND_BASE_URL") {
            self.backend.base_url = value;
        }
        if let Some(value) = read_env("EXPENSECART_BACKEND_FUNCTION_KEY") {
            self.backend.function_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("EXPENSECART_BACKEND_TIMEOUT_SECS") {
            self.backend.timeout_secs = parse_env("EXPENSECART_BACKEND_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("EXPENSECART_BACKEND_MAX_RETRIES") {
            self.backend.max_retries = parse_env("EXPENSECART_BACKEND_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("EXPENSECART_BACKEND_MAX_RESPONSE_BYTES") {
            self.backend.max_response_bytes =
                parse_env("EXPENSECART_BACKEND_MAX_RESPONSE_BYTES", &value)?;
        }

        let mileage_rate_key = ["EXPENSECART_TRAVEL_MILEAGE_RATE", "EXPENSECART_MILEAGE_RATE"]
            .into_iter()
            .find_map(|key| read_env(key).map(|value| (key, value)));
        if let Some((key, value)) = mileage_rate_key {
            self.travel.mileage_rate = parse_env(key, &value)?;
        }
        if let Some(value) = read_env("EXPENSECART_TRAVEL_CURRENCY") {
            self.travel.currency = value;
        }
        if let Some(value) = read_env("EXPENSECART_TRAVEL_UTC_OFFSET_MINUTES") {
            self.travel.utc_offset_minutes =
                parse_env("EXPENSECART_TRAVEL_UTC_OFFSET_MINUTES", &value)?;
        }

        if let Some(value) = read_env("EXPENSECART_SUBMISSION_TO_EMAIL") {
            self.submission.to_email = value;
        }
        if let Some(value) = read_env("EXPENSECART_SUBMISSION_CC_REQUESTER") {
            self.submission.cc_requester =
                parse_env("EXPENSECART_SUBMISSION_CC_REQUESTER", &value)?;
        }

        if let Some(value) = read_env("EXPENSECART_IDENTITY_SIGNED_IN_EMAIL") {
            self.identity.signed_in_email = Some(value);
        }

        let log_level =
            read_env("EXPENSECART_LOGGING_LEVEL").or_else(|| read_env("EXPENSECART_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("EXPENSECART_LOGGING_FORMAT").or_else(|| read_env("EXPENSECART_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.backend_base_url {
            self.backend.base_url = base_url;
        }
        if let Some(function_key_value) = overrides.function_key {
            self.backend.function_key = Some(secret_value(function_key_value));
        }
        if let Some(mileage_rate) = overrides.mileage_rate {
            self.travel.mileage_rate = mileage_rate;
        }
        if let Some(to_email) = overrides.to_email {
            self.submission.to_email = to_email;
        }
        if let Some(signed_in_email) = overrides.signed_in_email {
            self.identity.signed_in_email = Some(signed_in_email);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_backend(&self.backend)?;
        validate_travel(&self.travel)?;
        validate_submission(&self.submission)?;
        validate_identity(&self.identity)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_backend(backend: &BackendConfig) -> Result<(), ConfigError> {
    let base_url = backend.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "backend.base_url must start with http:// or https://".to_string(),
        ));
    }

    if backend.timeout_secs == 0 || backend.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "backend.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if backend.max_retries > 1 {
        return Err(ConfigError::Validation("backend.max_retries must be 0 or 1".to_string()));
    }

    if backend.max_response_bytes == 0 {
        return Err(ConfigError::Validation(
            "backend.max_response_bytes must be greater than zero".to_string(),
        ));
    }

    let blank_key = backend
        .function_key
        .as_ref()
        .map(|key| key.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if blank_key {
        return Err(ConfigError::Validation(
            "backend.function_key is set but empty; remove it or provide a key".to_string(),
        ));
    }

    Ok(())
}

fn validate_travel(travel: &TravelConfig) -> Result<(), ConfigError> {
    if travel.mileage_rate <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "travel.mileage_rate must be greater than zero".to_string(),
        ));
    }

    let currency = travel.currency.trim();
    if currency.len() != 3 || !currency.bytes().all(|byte| byte.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(
            "travel.currency must be a 3-letter upper-case code such as USD".to_string(),
        ));
    }

    if !(-720..=840).contains(&travel.utc_offset_minutes) {
        return Err(ConfigError::Validation(
            "travel.utc_offset_minutes must be in range -720..=840".to_string(),
        ));
    }

    Ok(())
}

fn validate_submission(submission: &SubmissionConfig) -> Result<(), ConfigError> {
    if submission.to_email.trim().is_empty() {
        return Err(ConfigError::Validation(
            "submission.to_email is required; set it in expensecart.toml or \
             EXPENSECART_SUBMISSION_TO_EMAIL"
                .to_string(),
        ));
    }
    if Email::parse(&submission.to_email).is_err() {
        return Err(ConfigError::Validation(format!(
            "submission.to_email `{}` is not an email address",
            submission.to_email.trim()
        )));
    }
    Ok(())
}

fn validate_identity(identity: &IdentityConfig) -> Result<(), ConfigError> {
    if let Some(signed_in_email) = &identity.signed_in_email {
        if Email::parse(signed_in_email).is_err() {
            return Err(ConfigError::Validation(format!(
                "identity.signed_in_email `{}` is not an email address",
                signed_in_email.trim()
            )));
        }
    }

    for (email, code) in &identity.department_overrides {
        if Email::parse(email).is_err() {
            return Err(ConfigError::Validation(format!(
                "identity.department_overrides key `{email}` is not an email address"
            )));
        }
        if DepartmentCode::parse(code).is_err() {
            return Err(ConfigError::Validation(format!(
                "identity.department_overrides value for `{email}` must be a 3-digit department code"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    backend: Option<BackendPatch>,
    travel: Option<TravelPatch>,
    submission: Option<SubmissionPatch>,
    identity: Option<IdentityPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendPatch {
    base_url: Option<String>,
    function_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_response_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct TravelPatch {
    mileage_rate: Option<Decimal>,
    currency: Option<String>,
    utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionPatch {
    to_email: Option<String>,
    cc_requester: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentityPatch {
    signed_in_email: Option<String>,
    department_overrides: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
