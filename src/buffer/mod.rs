//! The `buffer` module holds outbound messages and their lifecycle state
//! between creation and finalization.

pub mod message;
pub mod queue;

pub use message::{Message, Outcome, Response};
pub use queue::MessageBuffer;

#[cfg(test)]
mod tests;
