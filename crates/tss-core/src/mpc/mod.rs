//! Peer coordination seams between round handlers and the transport

use crate::{Message, PartyId, Result};

pub use ::async_trait::async_trait;

/// Anything that accepts decoded peer messages
///
/// [`RoundEngine`](crate::engine::RoundEngine) implements it; a transport
/// hands every decoded message to the sink of the local party.
pub trait MessageSink<M>: Send + Sync {
    fn add_message(&self, sender_id: &str, msg: M) -> Result<()>;
}

/// Outbound side of a party's view of the network
#[async_trait]
pub trait PeerManager<M: Message>: Send + Sync {
    /// Identity of the local party
    fn self_id(&self) -> &str;

    /// Identities of the remote peers, without the local party
    fn peer_ids(&self) -> Vec<PartyId>;

    fn num_peers(&self) -> usize {
        self.peer_ids().len()
    }

    /// Send a message to one peer
    fn send(&self, peer_id: &str, msg: M) -> Result<()>;

    /// Send a copy of `msg` to every peer
    fn broadcast(&self, msg: M) -> Result<()>
    where
        M: Clone,
    {
        for peer_id in self.peer_ids() {
            self.send(&peer_id, msg.clone())?;
        }
        Ok(())
    }

    /// Wait until every peer is reachable
    async fn ensure_all_connected(&self) -> Result<()>;
}

/// In-memory network for local sessions and tests
pub mod memory;

pub use memory::{MemoryNetwork, MemoryPeerManager};
