//! Messaging endpoints and the delivery pipeline for streamrelay.
//!
//! Available endpoints:
//! - **Telegram**: Bot API over HTTP, with a `getUpdates` long poller
//! - **Console**: terminal rendering for one-shot `ask` runs

pub mod cli;
pub mod delivery;
pub mod telegram;

pub use cli::ConsoleEndpoint;
pub use delivery::{DeliveryPipeline, DeliveryReport, DeliverySettings};
pub use telegram::{IncomingMessage, TelegramEndpoint, TelegramSettings};
