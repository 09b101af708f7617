use std::sync::Arc;

use expensecart_backend::fixtures::seeded_backend;
use expensecart_backend::HttpBackend;
use expensecart_core::coding::{CodingFlags, CodingOutcome, CodingRequest, GlCodingResolver};
use expensecart_core::config::{AppConfig, LoadOptions};
use expensecart_core::domain::identity::DepartmentCode;
use expensecart_core::errors::{ApplicationError, InterfaceError};
use expensecart_core::lookup::{retry_once, Capability, ExpenseCodeLookup};
use tracing::info;
use uuid::Uuid;

use super::{runtime, CommandResult};

const COMMAND: &str = "resolve";

#[derive(Clone, Debug, Default)]
pub struct ResolveArgs {
    pub department: String,
    pub category: String,
    pub capital: bool,
    pub work_order: Option<String>,
    pub offline: bool,
}

pub fn run(args: ResolveArgs) -> CommandResult {
    let lookup: Arc<dyn ExpenseCodeLookup> = if args.offline {
        match runtime() {
            Ok(runtime) => {
                let backend = runtime.block_on(seeded_backend());
                backend.expense_codes
            }
            Err(error) => {
                return CommandResult::failure(COMMAND, "runtime", error.to_string(), 1);
            }
        }
    } else {
        let config = match AppConfig::load(LoadOptions::default()) {
            Ok(config) => config,
            Err(error) => {
                return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
            }
        };
        match HttpBackend::from_config(&config.backend) {
            Ok(backend) => Arc::new(backend),
            Err(error) => {
                let error = ApplicationError::Configuration(error.to_string());
                return interface_failure(error, Uuid::new_v4().to_string());
            }
        }
    };

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure(COMMAND, "runtime", error.to_string(), 1),
    };

    let correlation_id = Uuid::new_v4().to_string();
    match runtime.block_on(resolve(lookup, &args)) {
        Ok(outcome) => {
            info!(
                event_name = "cli.resolve.completed",
                correlation_id = %correlation_id,
                offline = args.offline,
                "coding resolution completed"
            );
            let message = describe(&outcome);
            let data = serde_json::to_value(&outcome).ok();
            CommandResult::success_with_data(COMMAND, message, data)
        }
        Err(error) => interface_failure(error, correlation_id),
    }
}

pub async fn resolve(
    lookup: Arc<dyn ExpenseCodeLookup>,
    args: &ResolveArgs,
) -> Result<CodingOutcome, ApplicationError> {
    let department = DepartmentCode::parse(&args.department)?;
    let flags = CodingFlags::new(args.capital, args.work_order.clone());
    let request = CodingRequest::inferred(department, args.category.clone(), flags);
    let resolver = GlCodingResolver::new(lookup);

    let resolver = &resolver;
    let request = &request;
    let outcome =
        retry_once(Capability::ExpenseCodes, move || async move { resolver.resolve(request).await })
            .await?;
    Ok(outcome)
}

fn describe(outcome: &CodingOutcome) -> String {
    match outcome {
        CodingOutcome::Resolved(coding) => format!(
            "resolved {}-{} to account {}",
            coding.department(),
            coding.activity(),
            coding.account()
        ),
        CodingOutcome::Ambiguous(matches) => format!(
            "{} accounts match {}-{}; a choice is required",
            matches.candidates().len(),
            matches.department(),
            matches.activity()
        ),
        CodingOutcome::NoAccountMatch { department_code, activity_code } => {
            format!("no account matches {department_code}-{activity_code}")
        }
    }
}

fn interface_failure(error: ApplicationError, correlation_id: String) -> CommandResult {
    let interface = error.into_interface(correlation_id);
    let (error_class, exit_code) = match &interface {
        InterfaceError::BadRequest { .. } => ("bad_request", 2),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 3),
        InterfaceError::Internal { .. } => ("internal", 1),
    };
    CommandResult::failure_with_correlation(
        COMMAND,
        error_class,
        format!("{} ({interface})", interface.user_message()),
        Some(interface.correlation_id().to_string()),
        exit_code,
    )
}
