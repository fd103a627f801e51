//! Round handler contract

use crate::{MessageType, Result, RunState};

/// Outcome of a completed round
pub enum Transition<M, R> {
    /// Continue with the next round
    Next(Box<dyn Handler<M, R>>),
    /// The protocol finished with its output
    Done(R),
}

/// Logic of one protocol round
///
/// The engine owns the active handler on its consumer task, so every
/// operation runs on that task only and needs no internal locking.
pub trait Handler<M, R>: Send {
    /// Type of the messages this round consumes
    fn message_type(&self) -> MessageType;

    /// Whether `sender` already contributed to this round
    fn is_handled(&self, sender: &str) -> bool;

    /// Validate and record one peer contribution
    ///
    /// Any error aborts the whole run.
    fn handle_message(&mut self, msg: M) -> Result<()>;

    /// Number of distinct contributions that complete the round
    fn required_message_count(&self) -> usize;

    /// Run the per-round computation once all contributions are in
    fn finalize(self: Box<Self>) -> Result<Transition<M, R>>;
}

/// Receives the single terminal transition of a run
pub trait StateChangedListener: Send + Sync {
    /// Must return promptly; it is called from the engine's consumer task.
    fn on_state_changed(&self, old: RunState, new: RunState);
}
