//! `streamrelay ask`: stream one exchange to the terminal.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use streamrelay_agent::{ExchangeRequest, ExchangeRunner};
use streamrelay_channels::ConsoleEndpoint;
use streamrelay_core::channel::ChatTarget;
use tracing::info;

use crate::bootstrap;

pub async fn run(
    config_path: Option<&Path>,
    user: &str,
    prompt: &str,
    show_metrics: bool,
) -> anyhow::Result<()> {
    let mut config = bootstrap::load_config(config_path)?;
    // a terminal cannot replace a placeholder or render Markdown
    config.delivery.thinking_text = None;
    config.delivery.formatted = false;

    let controller = bootstrap::build_controller(config).await?;
    let runner = ExchangeRunner::new(controller, Arc::new(ConsoleEndpoint::new()));

    let result = runner
        .run(ChatTarget::new(0, None), ExchangeRequest::new(user, prompt))
        .await;
    println!();

    if show_metrics {
        print!("{}", streamrelay_telemetry::global().render_prometheus());
    }

    let outcome = result.context("exchange failed")?;
    info!(
        tokens = outcome.token_count,
        turns = outcome.turns,
        tool_calls = outcome.tool_calls(),
        "Exchange complete"
    );
    Ok(())
}
