use std::sync::Arc;

use anyhow::{Context, Result};
use expensecart_agent::{Backends, ConversationSession, SessionSettings};
use expensecart_backend::fixtures::{seeded_backend, SIGNED_IN_EMAIL};
use expensecart_backend::{HttpBackend, InMemoryBackend};
use expensecart_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use super::{runtime, CommandResult};
use crate::logging;

const COMMAND: &str = "chat";

/// Offline reports go to the recording submitter, so nothing is mailed.
pub const OFFLINE_TO_EMAIL: &str = "expense-reports@example.coop";

pub fn run(offline: bool, signed_in: Option<String>) -> CommandResult {
    let config = match AppConfig::load(load_options(offline, signed_in)) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };
    logging::init(&config.logging);

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure(COMMAND, "runtime", error.to_string(), 1),
    };

    let result = runtime.block_on(async {
        let mut session = build_session(&config, offline).await?;
        let input = BufReader::new(tokio::io::stdin());
        let mut output = tokio::io::stdout();
        converse(&mut session, input, &mut output).await
    });

    match result {
        Ok(turns) => CommandResult::success(COMMAND, format!("conversation ended after {turns} turn(s)")),
        Err(error) => CommandResult::failure(COMMAND, "runtime", format!("{error:#}"), 1),
    }
}

fn load_options(offline: bool, signed_in: Option<String>) -> LoadOptions {
    let mut overrides = ConfigOverrides { signed_in_email: signed_in, ..ConfigOverrides::default() };
    if offline {
        overrides.to_email = Some(OFFLINE_TO_EMAIL.to_string());
        overrides.signed_in_email.get_or_insert_with(|| SIGNED_IN_EMAIL.to_string());
    }
    LoadOptions { overrides, ..LoadOptions::default() }
}

pub async fn build_session(config: &AppConfig, offline: bool) -> Result<ConversationSession> {
    let settings = SessionSettings::from_config(config).context("building session settings")?;
    let backends = if offline {
        info!(event_name = "cli.chat.offline", "using the fixture backend");
        fixture_backends(&seeded_backend().await)
    } else {
        let backend =
            HttpBackend::from_config(&config.backend).context("configuring the expense backend")?;
        info!(
            event_name = "cli.chat.online",
            base_url = %backend.base_url(),
            "using the HTTP expense backend"
        );
        Backends::shared(Arc::new(backend))
    };

    Ok(ConversationSession::new(backends, settings))
}

pub fn fixture_backends(backend: &InMemoryBackend) -> Backends {
    Backends {
        expense_codes: backend.expense_codes.clone(),
        org_chart: backend.org_chart.clone(),
        per_diem: backend.per_diem.clone(),
        submitter: backend.submitter.clone(),
    }
}

/// Feeds each non-empty line to the session until EOF, `quit` or `exit`. Returns the number
/// of turns handled.
pub async fn converse<R, W>(session: &mut ConversationSession, input: R, output: &mut W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_block(output, &session.greeting()).await?;

    let mut lines = input.lines();
    let mut turns = 0;
    while let Some(line) = lines.next_line().await.context("reading conversation input")? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("quit") || text.eq_ignore_ascii_case("exit") {
            break;
        }
        let reply = session.handle(text).await;
        turns += 1;
        write_block(output, &reply.message).await?;
    }

    output.flush().await.context("flushing conversation output")?;
    Ok(turns)
}

async fn write_block<W>(output: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("{message}\n\n").as_bytes())
        .await
        .context("writing conversation output")
}
