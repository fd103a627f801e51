//! Protocol-agnostic round engine
//!
//! Turns asynchronously arriving peer messages into ordered, exactly-once
//! round transitions.

mod handler;
mod listener;
mod queue;
mod round;

pub use handler::{Handler, StateChangedListener, Transition};
pub use listener::ChannelListener;
pub use queue::MessageQueue;
pub use round::RoundEngine;
