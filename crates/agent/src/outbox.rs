//! The producer side of delivery: batches streamed text into
//! [`MessageInfo`] notifications.
//!
//! Text accumulates in the current segment and is only handed to the
//! pipeline once it grows past the segment's `send_len` low-water mark,
//! which then rises by a steady increment. A segment that outgrows the
//! endpoint's message limit is flushed and a fresh segment takes over.

use streamrelay_config::DeliveryConfig;
use streamrelay_core::delivery::{MessageInfo, NotificationSender};
use tracing::{debug, warn};

/// Flush thresholds, in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxLimits {
    /// Content length to exceed before the first flush of a segment
    pub first_send_len: usize,
    /// Added to the low-water mark after every flush
    pub steady_send_len: usize,
    /// Longest content a single message may hold
    pub max_message_len: usize,
}

impl Default for OutboxLimits {
    fn default() -> Self {
        Self {
            first_send_len: 30,
            steady_send_len: 500,
            max_message_len: 3896,
        }
    }
}

impl From<&DeliveryConfig> for OutboxLimits {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            first_send_len: config.first_send_len,
            steady_send_len: config.steady_send_len,
            max_message_len: config.max_message_len,
        }
    }
}

pub struct Outbox {
    sender: NotificationSender,
    limits: OutboxLimits,
    info: MessageInfo,
    /// Char length of `info.content` at its last flush
    flushed_len: usize,
    /// Whether anything of the current segment reached the pipeline
    segment_used: bool,
    /// Everything streamed during the exchange
    whole_content: String,
    /// Text streamed during the current turn
    turn_content: String,
    notifications: u32,
}

impl Outbox {
    pub fn new(sender: NotificationSender, limits: OutboxLimits) -> Self {
        Self {
            sender,
            info: MessageInfo::new(0, limits.first_send_len),
            limits,
            flushed_len: 0,
            segment_used: false,
            whole_content: String::new(),
            turn_content: String::new(),
            notifications: 0,
        }
    }

    /// Append a streamed text fragment, flushing when a threshold is crossed.
    pub async fn send_msg(&mut self, text: &str) {
        self.whole_content.push_str(text);
        self.turn_content.push_str(text);

        if self.info.char_len() > self.limits.max_message_len {
            self.flush().await;
            let next = self.info.segment + 1;
            debug!(segment = next, "Message full, starting a new segment");
            self.start_segment(next, self.limits.steady_send_len);
        }

        self.info.content.push_str(text);
        if self.info.char_len() > self.info.send_len {
            self.info.send_len += self.limits.steady_send_len;
            self.flush().await;
        }
    }

    /// Forward content that has not been flushed yet, if any of it is
    /// visible.
    pub async fn flush_trailing(&mut self) {
        if self.info.has_visible_content() && self.info.char_len() != self.flushed_len {
            self.flush().await;
        }
    }

    /// Close out the current turn and return the text it streamed.
    ///
    /// The next turn writes to a fresh segment if this one was delivered,
    /// otherwise it reuses it.
    pub fn finish_turn(&mut self) -> String {
        let segment = if self.segment_used {
            self.info.segment + 1
        } else {
            self.info.segment
        };
        self.start_segment(segment, self.limits.first_send_len);
        std::mem::take(&mut self.turn_content)
    }

    #[cfg(test)]
    pub(crate) fn whole_content(&self) -> &str {
        &self.whole_content
    }

    pub fn into_whole_content(self) -> String {
        self.whole_content
    }

    /// Notifications handed to the pipeline so far.
    pub fn notifications(&self) -> u32 {
        self.notifications
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> &MessageInfo {
        &self.info
    }

    fn start_segment(&mut self, segment: u32, send_len: usize) {
        self.info = MessageInfo::new(segment, send_len);
        self.flushed_len = 0;
        self.segment_used = false;
    }

    async fn flush(&mut self) {
        self.flushed_len = self.info.char_len();
        self.segment_used = true;
        self.notifications += 1;
        if let Err(e) = self.sender.send(self.info.clone()).await {
            warn!(segment = self.info.segment, error = %e, "Dropping partial answer");
        }
    }
}
