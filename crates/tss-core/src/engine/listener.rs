//! Listener that exposes the terminal transition to async callers

use super::StateChangedListener;
use crate::{Error, Result, RunState};
use tokio::sync::watch;
use tracing::{error, info};

/// Publishes the terminal state of a run on a watch channel
///
/// Any number of tasks may [`wait`](Self::wait) for the run to end.
pub struct ChannelListener {
    tx: watch::Sender<Option<RunState>>,
}

impl ChannelListener {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Wait for the terminal state
    pub async fn wait(&self) -> Result<RunState> {
        let mut rx = self.tx.subscribe();
        let state = *rx
            .wait_for(|state| state.is_some())
            .await
            .map_err(|_| Error::Internal("listener closed".into()))?;

        state.ok_or_else(|| Error::Internal("listener closed".into()))
    }

    /// Wait for the run to end, failing unless it reached [`RunState::Done`]
    ///
    /// The listener only sees the state; the cause of a failure is on the
    /// engine's `result()`.
    pub async fn done(&self) -> Result<()> {
        match self.wait().await? {
            RunState::Done => Ok(()),
            state => Err(Error::Internal(format!("run ended in state {}", state))),
        }
    }
}

impl Default for ChannelListener {
    fn default() -> Self {
        Self::new()
    }
}

impl StateChangedListener for ChannelListener {
    fn on_state_changed(&self, old: RunState, new: RunState) {
        match new {
            RunState::Done => info!(%old, %new, "Run finished"),
            RunState::Failed => error!(%old, %new, "Run failed"),
            RunState::Init => return,
        }
        self.tx.send_replace(Some(new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_sees_terminal_state() {
        let listener = Arc::new(ChannelListener::new());

        let waiter = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.wait().await })
        };
        listener.on_state_changed(RunState::Init, RunState::Done);

        assert_eq!(waiter.await.unwrap().unwrap(), RunState::Done);
        // Late callers still observe the state.
        assert!(listener.done().await.is_ok());
    }

    #[tokio::test]
    async fn test_done_reports_failure() {
        let listener = ChannelListener::new();
        listener.on_state_changed(RunState::Init, RunState::Failed);

        assert_eq!(listener.wait().await.unwrap(), RunState::Failed);
        assert_eq!(
            listener.done().await.unwrap_err(),
            Error::Internal("run ended in state Failed".into())
        );
    }
}
