//! `streamrelay serve`: answer Telegram messages.
//!
//! One poller task feeds incoming text messages to a loop that spawns an
//! exchange per message. Each exchange replies to its triggering message.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use streamrelay_agent::{ExchangeRequest, ExchangeRunner};
use streamrelay_channels::{TelegramEndpoint, TelegramSettings};
use streamrelay_config::AppConfig;
use streamrelay_core::channel::ChatTarget;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bootstrap;

fn telegram_settings(config: &AppConfig) -> TelegramSettings {
    TelegramSettings {
        bot_token: config.telegram.bot_token.clone().unwrap_or_default(),
        api_url: config.telegram.api_url.clone(),
        poll_timeout_secs: config.telegram.poll_timeout_secs,
    }
}

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = bootstrap::load_config(config_path)?;
    let endpoint = Arc::new(
        TelegramEndpoint::new(&telegram_settings(&config)).context("telegram is not configured")?,
    );
    let controller = bootstrap::build_controller(config).await?;
    let runner = Arc::new(ExchangeRunner::new(controller, endpoint.clone()));

    let (tx, mut rx) = mpsc::channel(64);
    let poller = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.poll(tx).await })
    };
    info!("Serving Telegram, press Ctrl+C to stop");

    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                let runner = runner.clone();
                tokio::spawn(async move {
                    let chat_id = message.chat_id;
                    let target = ChatTarget::new(chat_id, Some(message.message_id));
                    let request = ExchangeRequest::new(message.user_id, message.text);
                    if let Err(e) = runner.run(target, request).await {
                        debug!(chat_id, error = %e, "Exchange ended early");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            else => break,
        }
    }

    poller.abort();
    Ok(())
}
