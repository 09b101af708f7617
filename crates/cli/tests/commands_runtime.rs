use std::env;
use std::net::TcpListener;
use std::sync::{Mutex, OnceLock};

use expensecart_cli::commands::resolve::ResolveArgs;
use expensecart_cli::commands::{chat, config, doctor, resolve};
use expensecart_core::config::{AppConfig, LoadOptions};
use serde_json::Value;

#[test]
fn offline_resolve_returns_the_single_account() {
    with_env(&[], || {
        let result = resolve::run(offline_args("620", "team meal"));
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "resolve");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["outcome"], "resolved");
        assert_eq!(payload["data"]["accountCode"], "620710");
    });
}

#[test]
fn offline_resolve_lists_candidates_when_ambiguous() {
    with_env(&[], || {
        let result = resolve::run(offline_args("110", "conference registration"));
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["outcome"], "ambiguous");
        let candidates = payload["data"]["candidates"].as_array().expect("candidates");
        assert_eq!(candidates.len(), 2);
        assert!(payload["message"].as_str().unwrap_or("").contains("2 accounts match"));
    });
}

#[test]
fn capital_purchases_carry_the_gl_override() {
    with_env(&[], || {
        let args = ResolveArgs { capital: true, ..offline_args("300", "laptop") };
        let result = resolve::run(args);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["glAccountOverride"], "107200");
    });
}

#[test]
fn invalid_department_is_a_bad_request() {
    with_env(&[], || {
        let result = resolve::run(offline_args("62", "team meal"));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "bad_request");
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    });
}

#[test]
fn online_resolve_requires_a_valid_config() {
    with_env(&[], || {
        let args = ResolveArgs { offline: false, ..offline_args("620", "team meal") };
        let result = resolve::run(args);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or("").contains("submission.to_email"));
    });
}

#[test]
fn config_redacts_secrets_and_names_env_sources() {
    with_env(
        &[
            ("EXPENSECART_SUBMISSION_TO_EMAIL", "ap@example.coop"),
            ("EXPENSECART_BACKEND_FUNCTION_KEY", "fk-secret-value"),
            ("EXPENSECART_MILEAGE_RATE", "0.655"),
        ],
        || {
            let output = config::run();
            assert!(!output.contains("fk-secret-value"));
            assert!(output.contains(
                "- backend.function_key = <redacted> (source: env (EXPENSECART_BACKEND_FUNCTION_KEY))"
            ));
            assert!(output.contains(
                "- travel.mileage_rate = 0.655 (source: env (EXPENSECART_MILEAGE_RATE))"
            ));
            assert!(output.contains("- submission.to_email = ap@example.coop"));
            assert!(output.contains("- travel.currency = USD (source: default)"));
        },
    );
}

#[test]
fn config_attributes_values_read_from_a_file() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("expensecart.toml");
        std::fs::write(
            &path,
            "[submission]\nto_email = \"ap@example.coop\"\n\n[identity.department_overrides]\n\"Sam.Ortiz@example.coop\" = \"175\"\n",
        )
        .expect("write config");

        let loaded = AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect("config");
        let output = config::render(&loaded, Some(path.as_path()));

        let file_source = format!("(source: file ({}))", path.display());
        assert!(output.contains(&format!("- submission.to_email = ap@example.coop {file_source}")));
        assert!(output.contains(&format!(
            "- identity.department_overrides = s***@example.coop {file_source}"
        )));
        assert!(output.contains("- backend.timeout_secs = 20 (source: default)"));
    });
}

#[test]
fn config_reports_validation_failures() {
    with_env(&[], || {
        let output = config::run();
        assert!(output.starts_with("config validation failed"), "{output}");
    });
}

#[test]
fn doctor_skips_the_health_check_without_config() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report: Value = serde_json::from_str(&result.output).expect("doctor json");
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["name"], "config_validation");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["name"], "backend_health");
        assert_eq!(report["checks"][1]["status"], "skipped");
    });
}

#[test]
fn doctor_fails_the_health_check_when_the_backend_is_down() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let base_url = format!("http://127.0.0.1:{port}/api/");

    with_env(
        &[
            ("EXPENSECART_SUBMISSION_TO_EMAIL", "ap@example.coop"),
            ("EXPENSECART_BACKEND_BASE_URL", base_url.as_str()),
            ("EXPENSECART_BACKEND_TIMEOUT_SECS", "2"),
        ],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 1, "{}", result.output);
            assert!(result.output.contains("- [ok] config_validation"), "{}", result.output);
            assert!(result.output.contains("- [fail] backend_health"), "{}", result.output);
        },
    );
}

#[tokio::test]
async fn offline_conversation_submits_a_receipt() {
    let mut config = AppConfig::default();
    config.submission.to_email = chat::OFFLINE_TO_EMAIL.to_string();
    config.identity.signed_in_email = Some("pat.lee@example.coop".to_string());

    let mut session = chat::build_session(&config, true).await.expect("session");
    let input: &[u8] = b"add receipt team meal $42.50\n\nme\nsubmit\nquit\nshow cart\n";
    let mut output = Vec::new();

    let turns = chat::converse(&mut session, input, &mut output).await.expect("converse");
    assert_eq!(turns, 3);

    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.contains("620710"), "{transcript}");
    assert!(transcript.contains("Submitted 1 line(s)"), "{transcript}");
    assert!(session.context().cart().items().is_empty());
}

fn offline_args(department: &str, category: &str) -> ResolveArgs {
    ResolveArgs {
        department: department.to_string(),
        category: category.to_string(),
        offline: true,
        ..ResolveArgs::default()
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "EXPENSECART_BACKEND_BASE_URL",
        "EXPENSECART_BACKEND_FUNCTION_KEY",
        "EXPENSECART_BACKEND_TIMEOUT_SECS",
        "EXPENSECART_BACKEND_MAX_RETRIES",
        "EXPENSECART_BACKEND_MAX_RESPONSE_BYTES",
        "EXPENSECART_TRAVEL_MILEAGE_RATE",
        "EXPENSECART_MILEAGE_RATE",
        "EXPENSECART_TRAVEL_CURRENCY",
        "EXPENSECART_TRAVEL_UTC_OFFSET_MINUTES",
        "EXPENSECART_SUBMISSION_TO_EMAIL",
        "EXPENSECART_SUBMISSION_CC_REQUESTER",
        "EXPENSECART_IDENTITY_SIGNED_IN_EMAIL",
        "EXPENSECART_LOGGING_LEVEL",
        "EXPENSECART_LOGGING_FORMAT",
        "EXPENSECART_LOG_LEVEL",
        "EXPENSECART_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
