//! In-memory message routing between engines of one process

use super::{async_trait, MessageSink, PeerManager};
use crate::{Error, Message, PartyId, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Registry of local message sinks keyed by party id
pub struct MemoryNetwork<M> {
    sinks: DashMap<PartyId, Arc<dyn MessageSink<M>>>,
    /// Signalled whenever a sink registers
    notify: broadcast::Sender<()>,
}

impl<M: Message> MemoryNetwork<M> {
    /// Create a new in-memory network
    pub fn new() -> Arc<Self> {
        let (notify, _) = broadcast::channel(100);
        Arc::new(Self {
            sinks: DashMap::new(),
            notify,
        })
    }

    /// Route messages addressed to `party_id` into `sink`
    pub fn register(&self, party_id: impl Into<PartyId>, sink: Arc<dyn MessageSink<M>>) {
        let party_id = party_id.into();
        debug!(party_id = %party_id, "Registered sink");
        self.sinks.insert(party_id, sink);
        let _ = self.notify.send(());
    }

    pub fn unregister(&self, party_id: &str) {
        self.sinks.remove(party_id);
    }

    pub fn is_registered(&self, party_id: &str) -> bool {
        self.sinks.contains_key(party_id)
    }

    /// Hand `msg` from `from` to the sink of `to`
    pub fn deliver(&self, from: &str, to: &str, msg: M) -> Result<()> {
        // Clone the sink out so the shard lock is not held across the call.
        let sink = self
            .sinks
            .get(to)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Relay(format!("unknown peer {}", to)))?;

        sink.add_message(from, msg).map_err(|e| {
            warn!(from, to, error = %e, "Peer rejected message");
            e
        })
    }

    /// Wait until all of `party_ids` have registered
    pub async fn wait_for(&self, party_ids: &[PartyId]) {
        let mut rx = self.notify.subscribe();

        loop {
            if party_ids.iter().all(|id| self.is_registered(id)) {
                return;
            }

            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
            }
        }
    }

    /// View of this network for `self_id` talking to `peer_ids`
    pub fn peer_manager(
        self: &Arc<Self>,
        self_id: impl Into<PartyId>,
        peer_ids: &[PartyId],
    ) -> MemoryPeerManager<M> {
        let self_id = self_id.into();
        let peers = peer_ids
            .iter()
            .filter(|id| **id != self_id)
            .cloned()
            .collect();

        MemoryPeerManager {
            network: Arc::clone(self),
            self_id,
            peers,
        }
    }
}

/// [`PeerManager`] backed by a [`MemoryNetwork`]
pub struct MemoryPeerManager<M> {
    network: Arc<MemoryNetwork<M>>,
    self_id: PartyId,
    peers: Vec<PartyId>,
}

#[async_trait]
impl<M: Message> PeerManager<M> for MemoryPeerManager<M> {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn peer_ids(&self) -> Vec<PartyId> {
        self.peers.clone()
    }

    fn num_peers(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, peer_id: &str, msg: M) -> Result<()> {
        self.network.deliver(&self.self_id, peer_id, msg)
    }

    async fn ensure_all_connected(&self) -> Result<()> {
        self.network.wait_for(&self.peers).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageType;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct TestMessage {
        from: String,
        value: u32,
    }

    impl Message for TestMessage {
        fn sender(&self) -> &str {
            &self.from
        }

        fn message_type(&self) -> MessageType {
            MessageType(1)
        }
    }

    #[derive(Default)]
    struct Inbox {
        received: Mutex<Vec<(String, TestMessage)>>,
    }

    impl MessageSink<TestMessage> for Inbox {
        fn add_message(&self, sender_id: &str, msg: TestMessage) -> Result<()> {
            self.received.lock().push((sender_id.to_string(), msg));
            Ok(())
        }
    }

    fn ids(names: &[&str]) -> Vec<PartyId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_broadcast() {
        let network = MemoryNetwork::new();
        let b = Arc::new(Inbox::default());
        let c = Arc::new(Inbox::default());
        network.register("b", b.clone());
        network.register("c", c.clone());

        let parties = ids(&["a", "b", "c"]);
        let manager = network.peer_manager("a", &parties);
        assert_eq!(manager.num_peers(), 2);
        manager.ensure_all_connected().await.unwrap();

        let msg = TestMessage {
            from: "a".into(),
            value: 42,
        };
        manager.broadcast(msg.clone()).unwrap();

        assert_eq!(*b.received.lock(), vec![("a".to_string(), msg.clone())]);
        assert_eq!(*c.received.lock(), vec![("a".to_string(), msg)]);
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let network = MemoryNetwork::<TestMessage>::new();
        let manager = network.peer_manager("a", &ids(&["a", "b"]));

        let err = manager
            .send(
                "b",
                TestMessage {
                    from: "a".into(),
                    value: 1,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Relay(_)));
    }

    #[tokio::test]
    async fn test_wait_for_late_registration() {
        let network = MemoryNetwork::<TestMessage>::new();
        let manager = network.peer_manager("a", &ids(&["a", "b"]));

        let late = Arc::clone(&network);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            late.register("b", Arc::new(Inbox::default()));
        });

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            manager.ensure_all_connected(),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
