//! The exchange engine of streamrelay.
//!
//! An exchange turns one user prompt into a finished answer:
//!
//! 1. **Load** the user's recent history and append the prompt
//! 2. **Stream** the provider's reply, forwarding text to the delivery
//!    pipeline as it grows
//! 3. **If tool calls**: merge their fragments, execute them, append the
//!    results and stream again
//! 4. **Otherwise**: persist the exchange and close the pipeline
//!
//! The loop ends when a turn executes no tool, or fails once the turn
//! budget (`exchange.max_loop_depth`) is spent.

pub mod accumulator;
pub mod controller;
pub mod exchange;
pub mod outbox;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use accumulator::{Promoted, ToolCallAccumulator};
pub use controller::{ExchangeOutcome, ExchangeRequest, TurnController};
pub use exchange::{ExchangeGuard, ExchangeRunner, delivery_settings};
pub use outbox::{Outbox, OutboxLimits};
