//! Per-type mailboxes for inbound peer messages

use crate::{Error, Message, MessageType, Result};
use std::collections::HashMap;
use tokio::sync::{mpsc, watch, Mutex};

/// Bounded mailbox per registered message type
///
/// Messages for later rounds are accepted at any time and wait until the
/// engine asks for their type.
pub struct MessageQueue<M> {
    senders: HashMap<MessageType, mpsc::Sender<M>>,
    receivers: HashMap<MessageType, Mutex<mpsc::Receiver<M>>>,
}

impl<M: Message> MessageQueue<M> {
    /// Create a queue holding up to `capacity` messages of each type
    pub fn new(capacity: usize, message_types: &[MessageType]) -> Self {
        let mut senders = HashMap::with_capacity(message_types.len());
        let mut receivers = HashMap::with_capacity(message_types.len());

        for message_type in message_types {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.insert(*message_type, tx);
            receivers.insert(*message_type, Mutex::new(rx));
        }

        Self { senders, receivers }
    }

    /// Route a message to the mailbox of its type without waiting
    pub fn push(&self, msg: M) -> Result<()> {
        let message_type = msg.message_type();
        let sender = self.senders.get(&message_type).ok_or_else(|| {
            Error::QueueRejected(format!("unknown message type {}", message_type))
        })?;

        sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::QueueRejected(format!("mailbox for type {} is full", message_type))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::QueueRejected(format!("mailbox for type {} is closed", message_type))
            }
        })
    }

    /// Wait for the next message of exactly `message_type`
    ///
    /// Returns [`Error::Cancelled`] once `cancel` turns true or its sender
    /// goes away.
    pub async fn pop(
        &self,
        message_type: MessageType,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<M> {
        let receiver = self.receivers.get(&message_type).ok_or_else(|| {
            Error::QueueRejected(format!("unknown message type {}", message_type))
        })?;
        let mut receiver = receiver.lock().await;

        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(Error::Cancelled),
            msg = receiver.recv() => msg.ok_or_else(|| {
                Error::QueueRejected(format!("mailbox for type {} is closed", message_type))
            }),
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct TestMessage {
        from: String,
        round: u32,
    }

    impl Message for TestMessage {
        fn sender(&self) -> &str {
            &self.from
        }

        fn message_type(&self) -> MessageType {
            MessageType(self.round)
        }
    }

    fn msg(from: &str, round: u32) -> TestMessage {
        TestMessage {
            from: from.to_string(),
            round,
        }
    }

    #[tokio::test]
    async fn test_future_round_is_buffered() {
        let queue = MessageQueue::new(2, &[MessageType(1), MessageType(2)]);
        let (_cancel_tx, mut cancel) = watch::channel(false);

        queue.push(msg("a", 2)).unwrap();
        queue.push(msg("b", 1)).unwrap();

        assert_eq!(queue.pop(MessageType(1), &mut cancel).await.unwrap(), msg("b", 1));
        assert_eq!(queue.pop(MessageType(2), &mut cancel).await.unwrap(), msg("a", 2));
    }

    #[test]
    fn test_capacity_and_unknown_type() {
        let queue = MessageQueue::new(1, &[MessageType(1)]);

        queue.push(msg("a", 1)).unwrap();
        assert!(matches!(queue.push(msg("b", 1)), Err(Error::QueueRejected(_))));
        assert!(matches!(queue.push(msg("a", 7)), Err(Error::QueueRejected(_))));
    }

    #[tokio::test]
    async fn test_pop_unblocks_on_cancel() {
        let queue = MessageQueue::<TestMessage>::new(1, &[MessageType(1)]);
        let (cancel_tx, mut cancel) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = cancel_tx.send(true);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            queue.pop(MessageType(1), &mut cancel),
        )
        .await
        .expect("pop should unblock");
        assert_eq!(result.unwrap_err(), Error::Cancelled);
    }

    #[tokio::test]
    async fn test_pop_unblocks_on_arrival() {
        let queue = std::sync::Arc::new(MessageQueue::new(1, &[MessageType(3)]));
        let (_cancel_tx, mut cancel) = watch::channel(false);

        let producer = std::sync::Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(msg("c", 3)).unwrap();
        });

        assert_eq!(queue.pop(MessageType(3), &mut cancel).await.unwrap(), msg("c", 3));
    }
}
