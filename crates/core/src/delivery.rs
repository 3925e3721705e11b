//! Partial-content notifications and the rendezvous channel that carries
//! them from the turn controller to the delivery pipeline.
//!
//! The channel is unbuffered in effect: [`NotificationSender::send`] only
//! returns once the receiver has taken the notification, so the producer can
//! never run more than one notification ahead of the consumer. Dropping the
//! sender is the only termination signal.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::ChannelError;

/// The unit handed to the delivery pipeline.
///
/// `segment` selects the destination message: the pipeline creates one
/// message per segment and edits it for every later notification of that
/// segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub segment: u32,

    /// Visible content accumulated for this segment
    pub content: String,

    /// Content length (in chars) that must be exceeded before the next flush
    pub send_len: usize,
}

impl MessageInfo {
    pub fn new(segment: u32, send_len: usize) -> Self {
        Self {
            segment,
            content: String::new(),
            send_len,
        }
    }

    /// Content length in chars.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Whether the content has anything besides whitespace.
    pub fn has_visible_content(&self) -> bool {
        !self.content.trim_end().is_empty()
    }
}

type Envelope = (MessageInfo, oneshot::Sender<()>);

/// Create a connected sender/receiver pair.
pub fn channel() -> (NotificationSender, NotificationReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (NotificationSender { tx }, NotificationReceiver { rx })
}

/// Producer half. Owned by exactly one turn controller.
#[derive(Debug)]
pub struct NotificationSender {
    tx: mpsc::Sender<Envelope>,
}

impl NotificationSender {
    /// Hand `info` to the consumer, waiting until it has been taken.
    pub async fn send(&self, info: MessageInfo) -> Result<(), ChannelError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((info, ack_tx))
            .await
            .map_err(|_| ChannelError::Closed("delivery pipeline is gone".into()))?;
        ack_rx
            .await
            .map_err(|_| ChannelError::Closed("delivery pipeline dropped a notification".into()))
    }
}

/// Consumer half. Owned by exactly one delivery pipeline.
#[derive(Debug)]
pub struct NotificationReceiver {
    rx: mpsc::Receiver<Envelope>,
}

impl NotificationReceiver {
    /// Next notification, or `None` once the sender is dropped.
    pub async fn recv(&mut self) -> Option<MessageInfo> {
        let (info, ack) = self.rx.recv().await?;
        let _ = ack.send(());
        Some(info)
    }
}
