use expensecart_backend::HttpBackend;
use expensecart_core::config::{AppConfig, LoadOptions};
use expensecart_core::lookup::{retry_once, Capability, HealthProbe};
use serde::Serialize;

use super::{runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };
    CommandResult { exit_code, output: render(&report, json_output) }
}

fn render(report: &DoctorReport, json_output: bool) -> String {
    if json_output {
        return serde_json::to_string_pretty(report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "configuration loaded; reports go to {}",
                    config.submission.to_email
                ),
            });
            checks.push(check_backend_health(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "backend_health",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_backend_health(config: &AppConfig) -> DoctorCheck {
    let backend = match HttpBackend::from_config(&config.backend) {
        Ok(backend) => backend,
        Err(error) => {
            return DoctorCheck {
                name: "backend_health",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "backend_health",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let backend = &backend;
    let result = runtime
        .block_on(retry_once(Capability::Health, move || async move { backend.probe().await }));

    match result {
        Ok(true) => DoctorCheck {
            name: "backend_health",
            status: CheckStatus::Pass,
            details: format!("`{}` reported healthy", backend.base_url()),
        },
        Ok(false) => DoctorCheck {
            name: "backend_health",
            status: CheckStatus::Fail,
            details: format!("`{}` answered but reported unhealthy", backend.base_url()),
        },
        Err(error) => DoctorCheck {
            name: "backend_health",
            status: CheckStatus::Fail,
            details: format!("`{}` unreachable: {error}", backend.base_url()),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn human_output_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck {
                    name: "config_validation",
                    status: CheckStatus::Fail,
                    details: "missing submission.to_email".to_string(),
                },
                DoctorCheck {
                    name: "backend_health",
                    status: CheckStatus::Skipped,
                    details: "skipped".to_string(),
                },
            ],
        };

        let rendered = render(&report, false);
        assert!(rendered.contains("- [fail] config_validation: missing submission.to_email"));
        assert!(rendered.contains("- [skip] backend_health: skipped"));

        let json = render(&report, true);
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(parsed["overall_status"], "fail");
        assert_eq!(parsed["checks"][1]["status"], "skipped");
    }
}
