//! Round engine driving one protocol run

use super::{Handler, MessageQueue, StateChangedListener, Transition};
use crate::mpc::MessageSink;
use crate::{Error, Message, MessageType, PartyId, Result, RunState};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Drives one protocol run from its initial handler to a terminal state
///
/// Producers call [`add_message`](Self::add_message) from any task. A single
/// consumer task, spawned by [`start`](Self::start), pops messages of the
/// type the current round expects and advances through the handlers.
pub struct RoundEngine<M, R> {
    inner: Arc<Inner<M, R>>,
}

impl<M, R> Clone for RoundEngine<M, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<M, R> {
    self_id: PartyId,
    peer_num: usize,
    queue: MessageQueue<M>,
    listener: Arc<dyn StateChangedListener>,
    /// Type the active handler expects; written only by the consumer task
    current_type: RwLock<MessageType>,
    /// Initial handler until the consumer task takes it
    pending: Mutex<Option<Box<dyn Handler<M, R>>>>,
    /// Cancellation signal of the running consumer task
    run: Mutex<Option<watch::Sender<bool>>>,
    outcome: Mutex<Outcome<R>>,
}

struct Outcome<R> {
    state: RunState,
    result: Option<Result<R>>,
}

impl<M, R> RoundEngine<M, R>
where
    M: Message,
    R: Send + 'static,
{
    /// Create an engine for `peer_num` peers
    ///
    /// `message_types` lists every type the run will ever consume; each gets a
    /// mailbox of `peer_num` slots.
    pub fn new(
        self_id: impl Into<PartyId>,
        peer_num: usize,
        listener: Arc<dyn StateChangedListener>,
        initial_handler: Box<dyn Handler<M, R>>,
        message_types: &[MessageType],
    ) -> Self {
        let current_type = initial_handler.message_type();

        Self {
            inner: Arc::new(Inner {
                self_id: self_id.into(),
                peer_num,
                queue: MessageQueue::new(peer_num, message_types),
                listener,
                current_type: RwLock::new(current_type),
                pending: Mutex::new(Some(initial_handler)),
                run: Mutex::new(None),
                outcome: Mutex::new(Outcome {
                    state: RunState::Init,
                    result: None,
                }),
            }),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.inner.self_id
    }

    pub fn peer_num(&self) -> usize {
        self.inner.peer_num
    }

    pub fn state(&self) -> RunState {
        self.inner.outcome.lock().state
    }

    /// Message type of the active round
    pub fn current_message_type(&self) -> MessageType {
        *self.inner.current_type.read()
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().is_some()
    }

    /// Spawn the consumer task on the current tokio runtime
    ///
    /// Calling it again while the task runs, or after the run has ended,
    /// does nothing.
    pub fn start(&self) {
        let mut run = self.inner.run.lock();
        if run.is_some() {
            debug!(party_id = %self.inner.self_id, "Engine already running");
            return;
        }
        let Some(handler) = self.inner.pending.lock().take() else {
            debug!(party_id = %self.inner.self_id, "Engine run already consumed");
            return;
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        *run = Some(cancel_tx);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.message_loop(handler, cancel_rx).await;
        });
    }

    /// Cancel the consumer task
    ///
    /// A run that has not finished yet ends as [`RunState::Failed`] with
    /// [`Error::Cancelled`].
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Validate a message from `sender_id` and queue it for its round
    pub fn add_message(&self, sender_id: &str, msg: M) -> Result<()> {
        if sender_id != msg.sender() {
            warn!(
                sender_id,
                claimed = msg.sender(),
                "Different sender"
            );
            return Err(Error::IdentityMismatch {
                sender: sender_id.to_string(),
                claimed: msg.sender().to_string(),
            });
        }

        let current = *self.inner.current_type.read();
        let received = msg.message_type();
        if received < current {
            warn!(%current, %received, "Ignore old message");
            return Err(Error::StaleMessage { current, received });
        }

        self.inner.queue.push(msg).map_err(|e| {
            warn!(sender_id, error = %e, "Failed to queue message");
            e
        })
    }

    /// Output of the run
    ///
    /// [`Error::NotReady`] until the run is terminal, then either the output
    /// or the error that failed the run.
    pub fn result(&self) -> Result<R>
    where
        R: Clone,
    {
        match &self.inner.outcome.lock().result {
            None => Err(Error::NotReady),
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(e)) => Err(e.clone()),
        }
    }
}

impl<M, R> MessageSink<M> for RoundEngine<M, R>
where
    M: Message,
    R: Send + 'static,
{
    fn add_message(&self, sender_id: &str, msg: M) -> Result<()> {
        RoundEngine::add_message(self, sender_id, msg)
    }
}

impl<M, R> Inner<M, R>
where
    M: Message,
    R: Send + 'static,
{
    fn stop(&self) {
        if let Some(cancel) = self.run.lock().take() {
            let _ = cancel.send(true);
        }
    }

    async fn message_loop(
        &self,
        handler: Box<dyn Handler<M, R>>,
        mut cancel: watch::Receiver<bool>,
    ) {
        // Fails the run if this future is dropped mid-way, e.g. when a
        // handler panics or the runtime shuts down.
        let mut guard = AbortGuard {
            inner: self,
            armed: true,
        };

        let outcome = self.drive(handler, &mut cancel).await;

        guard.armed = false;
        self.finish(outcome);
    }

    async fn drive(
        &self,
        mut handler: Box<dyn Handler<M, R>>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<R> {
        let mut msg_type = handler.message_type();
        let mut msg_count = 0usize;

        loop {
            let msg = self.queue.pop(msg_type, cancel).await.map_err(|e| {
                warn!(party_id = %self.self_id, %msg_type, error = %e, "Failed to pop message");
                e
            })?;

            let sender = msg.sender().to_string();
            if handler.is_handled(&sender) {
                warn!(%msg_type, from = %sender, "The message is handled before");
                return Err(Error::DuplicateSender {
                    sender,
                    message_type: msg_type,
                });
            }

            handler.handle_message(msg).map_err(|e| {
                warn!(%msg_type, from = %sender, error = %e, "Failed to handle message");
                Error::HandlerValidationFailed {
                    sender: sender.clone(),
                    reason: e.to_string(),
                }
            })?;

            msg_count += 1;
            if msg_count < handler.required_message_count() {
                continue;
            }

            let transition = handler.finalize().map_err(|e| {
                warn!(%msg_type, error = %e, "Failed to go to next handler");
                Error::FinalizeFailed(e.to_string())
            })?;

            match transition {
                Transition::Done(output) => return Ok(output),
                Transition::Next(next) => {
                    let new_type = next.message_type();
                    *self.current_type.write() = new_type;
                    info!(
                        party_id = %self.self_id,
                        old_type = %msg_type,
                        %new_type,
                        "Change handler"
                    );

                    handler = next;
                    msg_type = new_type;
                    msg_count = 0;
                }
            }
        }
    }

    fn finish(&self, outcome: Result<R>) {
        let new_state = match &outcome {
            Ok(_) => RunState::Done,
            Err(_) => RunState::Failed,
        };

        self.stop();
        if let Err(e) = self.set_state(new_state, outcome) {
            debug!(error = %e, "Terminal state already reached");
        }
    }

    fn set_state(&self, new_state: RunState, result: Result<R>) -> Result<()> {
        let old_state = {
            let mut outcome = self.outcome.lock();
            if outcome.state.is_terminal() {
                warn!(old = %outcome.state, new = %new_state, "Invalid state transition");
                return Err(Error::InvalidStateTransition {
                    from: outcome.state,
                    to: new_state,
                });
            }

            let old_state = outcome.state;
            if let Err(e) = &result {
                warn!(party_id = %self.self_id, error = %e, "Run failed");
            }
            outcome.state = new_state;
            outcome.result = Some(result);
            old_state
        };

        info!(party_id = %self.self_id, old = %old_state, new = %new_state, "State changed");
        self.listener.on_state_changed(old_state, new_state);
        Ok(())
    }
}

struct AbortGuard<'a, M, R>
where
    M: Message,
    R: Send + 'static,
{
    inner: &'a Inner<M, R>,
    armed: bool,
}

impl<M, R> Drop for AbortGuard<'_, M, R>
where
    M: Message,
    R: Send + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            self.inner
                .finish(Err(Error::Internal("consumer task aborted".into())));
        }
    }
}
