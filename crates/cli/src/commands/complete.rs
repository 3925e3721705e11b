//! `streamrelay complete`: one synchronous call with a single tool pass.

use anyhow::Context;
use std::path::Path;
use streamrelay_agent::ExchangeRequest;
use streamrelay_core::message::TurnContent;

use crate::bootstrap;

pub async fn run(config_path: Option<&Path>, user: &str, prompt: &str) -> anyhow::Result<()> {
    let config = bootstrap::load_config(config_path)?;
    let controller = bootstrap::build_controller(config).await?;
    let timeout = controller.config().exchange.timeout();

    let outcome = tokio::time::timeout(
        timeout,
        controller.complete(&ExchangeRequest::new(user, prompt)),
    )
    .await
    .map_err(|_| anyhow::anyhow!("completion timed out after {}s", timeout.as_secs()))?
    .context("completion failed")?;

    for turn in &outcome.tool_trace {
        if let TurnContent::ToolResult(result) = &turn.content {
            eprintln!("[{}] {}", result.name, result.output);
        }
    }
    println!("{}", outcome.answer);
    Ok(())
}
