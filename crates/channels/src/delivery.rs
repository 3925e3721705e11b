//! Delivery pipeline: renders partial answers on a rate-limited endpoint.
//!
//! The pipeline is the single consumer of an exchange's notification
//! channel. The first notification of a segment creates a message (replying
//! to the triggering message); every later notification of that segment
//! edits it in place. Failures get one bounded retry and are then dropped so
//! the channel keeps draining.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use streamrelay_core::channel::{ChatTarget, MessageId, MessagingEndpoint};
use streamrelay_core::delivery::NotificationReceiver;
use streamrelay_core::error::ChannelError;
use tracing::{debug, info, warn};

/// Presentation settings for one pipeline.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Placeholder reply created before the first notification arrives
    pub thinking_text: Option<String>,
    /// Shown in place of empty content, and once if nothing arrived at all
    pub fallback_text: String,
    /// Ask the endpoint to render Markdown
    pub formatted: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            thinking_text: None,
            fallback_text: "get nothing from the model!".into(),
            formatted: true,
        }
    }
}

/// What the pipeline did, returned when the channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub created: u32,
    pub edited: u32,
    pub dropped: u32,
}

pub struct DeliveryPipeline {
    endpoint: Arc<dyn MessagingEndpoint>,
    target: ChatTarget,
    settings: DeliverySettings,
    messages: HashMap<u32, MessageId>,
    report: DeliveryReport,
}

impl DeliveryPipeline {
    pub fn new(
        endpoint: Arc<dyn MessagingEndpoint>,
        target: ChatTarget,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            endpoint,
            target,
            settings,
            messages: HashMap::new(),
            report: DeliveryReport::default(),
        }
    }

    /// Consume notifications until the producer drops its sender.
    pub async fn run(mut self, mut notifications: NotificationReceiver) -> DeliveryReport {
        if let Some(text) = self.settings.thinking_text.clone() {
            self.deliver(0, &text).await;
        }

        let mut received = false;
        while let Some(info) = notifications.recv().await {
            received = true;
            debug!(
                chat_id = self.target.chat_id,
                segment = info.segment,
                len = info.content.len(),
                "Delivering partial answer"
            );
            let text = if info.content.is_empty() {
                self.settings.fallback_text.clone()
            } else {
                info.content
            };
            self.deliver(info.segment, &text).await;
        }

        if !received {
            info!(chat_id = self.target.chat_id, "Nothing to deliver, showing fallback");
            let fallback = self.settings.fallback_text.clone();
            self.deliver(0, &fallback).await;
        }

        self.report
    }

    async fn deliver(&mut self, segment: u32, text: &str) {
        let endpoint = self.endpoint.as_ref();
        let chat_id = self.target.chat_id;

        match self.messages.get(&segment).copied() {
            Some(message_id) => {
                let edited = with_retry(self.settings.formatted, "edit", segment, |formatted| {
                    endpoint.edit_message(chat_id, message_id, text, formatted)
                })
                .await;
                match edited {
                    Some(()) => self.report.edited += 1,
                    None => self.report.dropped += 1,
                }
            }
            None => {
                let reply_to = self.target.reply_to;
                let created = with_retry(self.settings.formatted, "create", segment, |formatted| {
                    endpoint.create_message(chat_id, reply_to, text, formatted)
                })
                .await;
                match created {
                    Some(message_id) => {
                        self.messages.insert(segment, message_id);
                        self.report.created += 1;
                    }
                    None => self.report.dropped += 1,
                }
            }
        }
    }
}

/// Run `op` once, retrying once on a rate limit (after the requested delay)
/// or on a formatting rejection (as plain text).
async fn with_retry<T, F, Fut>(formatted: bool, action: &str, segment: u32, mut op: F) -> Option<T>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = Result<T, ChannelError>>,
{
    let retry_formatted = match op(formatted).await {
        Ok(value) => return Some(value),
        Err(ChannelError::RateLimited { retry_after_secs }) => {
            warn!(action, segment, retry_after_secs, "Rate limited, retrying once");
            tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
            formatted
        }
        Err(ChannelError::FormatRejected(reason)) => {
            warn!(action, segment, reason = %reason, "Formatting rejected, retrying as plain text");
            false
        }
        Err(e) => {
            warn!(action, segment, error = %e, "Delivery failed, dropping notification");
            return None;
        }
    };

    match op(retry_formatted).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(action, segment, error = %e, "Retry failed, dropping notification");
            None
        }
    }
}
