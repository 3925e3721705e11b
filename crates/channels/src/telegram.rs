//! Telegram Bot API endpoint and update poller.
//!
//! Speaks the HTTP Bot API directly over `reqwest`: `sendMessage` and
//! `editMessageText` for delivery, `getUpdates` long polling for intake.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use streamrelay_core::channel::{MessageId, MessagingEndpoint};
use streamrelay_core::error::ChannelError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Telegram endpoint settings.
#[derive(Clone)]
pub struct TelegramSettings {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Bot API root, e.g. `https://api.telegram.org`
    pub api_url: String,
    /// Long-poll timeout passed to `getUpdates`
    pub poll_timeout_secs: u64,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

pub struct TelegramEndpoint {
    client: reqwest::Client,
    base: String,
    poll_timeout_secs: u64,
}

impl TelegramEndpoint {
    pub fn new(settings: &TelegramSettings) -> Result<Self, ChannelError> {
        if settings.bot_token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "telegram bot token is empty (set STREAMRELAY_TELEGRAM_TOKEN)".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: format!(
                "{}/bot{}",
                settings.api_url.trim_end_matches('/'),
                settings.bot_token
            ),
            poll_timeout_secs: settings.poll_timeout_secs,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| delivery_failed(format!("{method}: {e}")))?;

        let status = response.status().as_u16();
        let reply: ApiReply<T> = response
            .json()
            .await
            .map_err(|e| delivery_failed(format!("{method}: unreadable reply ({status}): {e}")))?;

        let failure = reply.failure();
        match reply.result {
            Some(result) if reply.ok => Ok(result),
            _ => Err(classify_error(status, &failure)),
        }
    }

    /// Fetch updates after `offset`, waiting up to the poll timeout.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        let wait = Duration::from_secs(self.poll_timeout_secs + 10);
        self.call("getUpdates", &body, wait).await
    }

    /// Long-poll forever, forwarding text messages until `tx` closes.
    pub async fn poll(&self, tx: mpsc::Sender<IncomingMessage>) {
        let mut offset = 0;
        info!("Telegram poller started");
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(ChannelError::RateLimited { retry_after_secs }) => {
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = IncomingMessage::from_update(update) else {
                    continue;
                };
                debug!(chat_id = message.chat_id, user_id = %message.user_id, "Incoming message");
                if tx.send(message).await.is_err() {
                    info!("Telegram poller stopped");
                    return;
                }
            }
        }
    }
}

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
impl MessagingEndpoint for TelegramEndpoint {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn create_message(
        &self,
        chat_id: i64,
        reply_to: Option<MessageId>,
        text: &str,
        formatted: bool,
    ) -> Result<MessageId, ChannelError> {
        let body = send_message_body(chat_id, reply_to, text, formatted);
        let sent: SentMessage = self.call("sendMessage", &body, SEND_TIMEOUT).await?;
        Ok(MessageId(sent.message_id))
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
        formatted: bool,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id.0,
            "text": text,
        });
        if formatted {
            body["parse_mode"] = "Markdown".into();
        }
        match self
            .call::<serde_json::Value>("editMessageText", &body, SEND_TIMEOUT)
            .await
        {
            Err(ChannelError::DeliveryFailed { reason, .. })
                if reason.contains("message is not modified") =>
            {
                debug!(message_id = %message_id, "Edit was a no-op");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

/// `sendMessage` payload. Replies are best-effort: a deleted original
/// still gets an answer.
fn send_message_body(
    chat_id: i64,
    reply_to: Option<MessageId>,
    text: &str,
    formatted: bool,
) -> serde_json::Value {
    let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
    if let Some(reply_to) = reply_to {
        body["reply_parameters"] = serde_json::json!({
            "message_id": reply_to.0,
            "allow_sending_without_reply": true,
        });
    }
    if formatted {
        body["parse_mode"] = "Markdown".into();
    }
    body
}

fn delivery_failed(reason: String) -> ChannelError {
    ChannelError::DeliveryFailed {
        channel: "telegram".into(),
        reason,
    }
}

/// The failure half of a Bot API reply.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApiFailure {
    pub description: String,
    pub retry_after: Option<u64>,
}

/// Map a failed Bot API call onto the delivery error taxonomy.
pub fn classify_error(status: u16, failure: &ApiFailure) -> ChannelError {
    if status == 429 || failure.retry_after.is_some() {
        return ChannelError::RateLimited {
            retry_after_secs: failure.retry_after.unwrap_or(1),
        };
    }
    if failure.description.contains("can't parse entities") {
        return ChannelError::FormatRejected(failure.description.clone());
    }
    delivery_failed(format!("{status}: {}", failure.description))
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

impl<T> ApiReply<T> {
    fn failure(&self) -> ApiFailure {
        ApiFailure {
            description: self.description.clone().unwrap_or_default(),
            retry_after: self.parameters.as_ref().and_then(|p| p.retry_after),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
}

/// A text message that should start an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: MessageId,
    pub user_id: String,
    pub text: String,
}

impl IncomingMessage {
    /// Keep human text messages; drop bots, service messages and blanks.
    pub fn from_update(update: Update) -> Option<Self> {
        let message = update.message?;
        let from = message.from?;
        if from.is_bot {
            return None;
        }
        let text = message.text?.trim().to_string();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            chat_id: message.chat.id,
            message_id: MessageId(message.message_id),
            user_id: from.id.to_string(),
            text,
        })
    }
}
