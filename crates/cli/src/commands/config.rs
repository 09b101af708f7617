use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expensecart_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    render(&config, detect_config_path().as_deref())
}

/// Renders every effective value with where it came from. Secrets are never printed.
pub fn render(config: &AppConfig, config_file_path: Option<&Path>) -> String {
    let config_file_doc = load_config_file_doc(config_file_path);
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path)
    };

    let function_key = if config.backend.function_key.is_some() { "<redacted>" } else { "<unset>" };
    let overrides = config
        .identity
        .department_overrides
        .keys()
        .map(|email| redact_email(email.as_str()))
        .collect::<Vec<_>>();
    let overrides =
        if overrides.is_empty() { "<none>".to_string() } else { overrides.join(", ") };

    let entries: Vec<(&str, String, Vec<&str>)> = vec![
        ("backend.base_url", config.backend.base_url.clone(), vec!["EXPENSECART_BACKEND_BASE_URL"]),
        (
            "backend.function_key",
            function_key.to_string(),
            vec!["EXPENSECART_BACKEND_FUNCTION_KEY"],
        ),
        (
            "backend.timeout_secs",
            config.backend.timeout_secs.to_string(),
            vec!["EXPENSECART_BACKEND_TIMEOUT_SECS"],
        ),
        (
            "backend.max_retries",
            config.backend.max_retries.to_string(),
            vec!["EXPENSECART_BACKEND_MAX_RETRIES"],
        ),
        (
            "backend.max_response_bytes",
            config.backend.max_response_bytes.to_string(),
            vec!["EXPENSECART_BACKEND_MAX_RESPONSE_BYTES"],
        ),
        (
            "travel.mileage_rate",
            config.travel.mileage_rate.to_string(),
            vec!["EXPENSECART_TRAVEL_MILEAGE_RATE", "EXPENSECART_MILEAGE_RATE"],
        ),
        ("travel.currency", config.travel.currency.clone(), vec!["EXPENSECART_TRAVEL_CURRENCY"]),
        (
            "travel.utc_offset_minutes",
            config.travel.utc_offset_minutes.to_string(),
            vec!["EXPENSECART_TRAVEL_UTC_OFFSET_MINUTES"],
        ),
        (
            "submission.to_email",
            config.submission.to_email.clone(),
            vec!["EXPENSECART_SUBMISSION_TO_EMAIL"],
        ),
        (
            "submission.cc_requester",
            config.submission.cc_requester.to_string(),
            vec!["EXPENSECART_SUBMISSION_CC_REQUESTER"],
        ),
        (
            "identity.signed_in_email",
            config
                .identity
                .signed_in_email
                .as_deref()
                .map(redact_email)
                .unwrap_or_else(|| "<unset>".to_string()),
            vec!["EXPENSECART_IDENTITY_SIGNED_IN_EMAIL"],
        ),
        ("identity.department_overrides", overrides, vec![]),
        (
            "logging.level",
            config.logging.level.clone(),
            vec!["EXPENSECART_LOGGING_LEVEL", "EXPENSECART_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            vec!["EXPENSECART_LOGGING_FORMAT", "EXPENSECART_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .iter()
            .map(|(key, value, env_keys)| render_line(key, value, source(*key, env_keys.as_slice()))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// `pat.lee@example.coop` → `p***@example.coop`.
fn redact_email(email: &str) -> String {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{field_source, redact_email};

    #[test]
    fn emails_keep_only_the_first_letter_and_domain() {
        assert_eq!(redact_email("pat.lee@example.coop"), "p***@example.coop");
        assert_eq!(redact_email("nonsense"), "<redacted>");
    }

    #[test]
    fn file_values_are_attributed_to_the_file() {
        let doc = "[travel]\nmileage_rate = \"0.655\"\n".parse::<toml::Value>().expect("toml");
        let path = Path::new("expensecart.toml");
        assert_eq!(
            field_source("travel.mileage_rate", &[], Some(&doc), Some(path)),
            "file (expensecart.toml)"
        );
        assert_eq!(field_source("travel.currency", &[], Some(&doc), Some(path)), "default");
    }
}
