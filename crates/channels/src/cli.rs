//! Console endpoint: renders partial answers on a terminal.
//!
//! A terminal cannot edit printed text, so an edit prints only what was
//! appended since the last render of that message. A rewrite that does not
//! extend the previous text is printed in full on a new line.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use streamrelay_core::channel::{MessageId, MessagingEndpoint};
use streamrelay_core::error::ChannelError;

pub struct ConsoleEndpoint {
    state: Mutex<ConsoleState>,
}

struct ConsoleState {
    out: Box<dyn Write + Send>,
    rendered: HashMap<MessageId, String>,
    next_id: i64,
}

impl ConsoleEndpoint {
    /// Write to stdout.
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                out,
                rendered: HashMap::new(),
                next_id: 0,
            }),
        }
    }
}

impl Default for ConsoleEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

fn io_error(e: std::io::Error) -> ChannelError {
    ChannelError::DeliveryFailed {
        channel: "console".into(),
        reason: e.to_string(),
    }
}

impl ConsoleState {
    fn write(&mut self, text: &str) -> Result<(), ChannelError> {
        self.out.write_all(text.as_bytes()).map_err(io_error)?;
        self.out.flush().map_err(io_error)
    }
}

#[async_trait]
impl MessagingEndpoint for ConsoleEndpoint {
    fn name(&self) -> &str {
        "console"
    }

    async fn create_message(
        &self,
        _chat_id: i64,
        _reply_to: Option<MessageId>,
        text: &str,
        _formatted: bool,
    ) -> Result<MessageId, ChannelError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ChannelError::Closed("console writer poisoned".into()))?;
        state.next_id += 1;
        let id = MessageId(state.next_id);
        // every message after the first starts on its own line
        if id.0 > 1 {
            state.write("\n")?;
        }
        state.write(text)?;
        state.rendered.insert(id, text.to_string());
        Ok(id)
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        message_id: MessageId,
        text: &str,
        _formatted: bool,
    ) -> Result<(), ChannelError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ChannelError::Closed("console writer poisoned".into()))?;
        let previous = state.rendered.get(&message_id).cloned().ok_or_else(|| {
            ChannelError::DeliveryFailed {
                channel: "console".into(),
                reason: format!("unknown message {message_id}"),
            }
        })?;

        match text.strip_prefix(previous.as_str()) {
            Some(appended) => state.write(appended)?,
            None => {
                state.write("\n")?;
                state.write(text)?;
            }
        }
        state.rendered.insert(message_id, text.to_string());
        Ok(())
    }
}
