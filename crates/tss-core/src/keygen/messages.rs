//! Keygen and refresh message types

use crate::{Message, MessageType, PartyId, SessionId};
use serde::{Deserialize, Serialize};

/// Tag of the commitment round
pub const COMMIT: MessageType = MessageType(1);

/// Tag of the share round
pub const SHARE: MessageType = MessageType(2);

/// Every type a keygen or refresh run consumes
pub const MESSAGE_TYPES: [MessageType; 2] = [COMMIT, SHARE];

/// Round 1 message: BK parameter and Feldman commitments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMessage {
    /// Sender party ID
    pub from: PartyId,
    pub session_id: SessionId,
    /// Sender's evaluation coordinate, big-endian scalar bytes
    pub bk_x: Vec<u8>,
    /// Sender's derivative order
    pub bk_rank: u32,
    /// Compressed SEC1 points `a_k * G` of the sender's polynomial
    ///
    /// A refresh omits the constant term, whose commitment is the identity.
    pub commitments: Vec<Vec<u8>>,
}

/// Round 2 message: share dealt to one receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareMessage {
    /// Sender party ID
    pub from: PartyId,
    /// Receiver party ID
    pub to: PartyId,
    pub session_id: SessionId,
    /// `f^(rank)(x)` at the receiver's BK parameter
    pub share: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeygenMessage {
    Commit(CommitMessage),
    Share(ShareMessage),
}

impl Message for KeygenMessage {
    fn sender(&self) -> &str {
        match self {
            KeygenMessage::Commit(msg) => &msg.from,
            KeygenMessage::Share(msg) => &msg.from,
        }
    }

    fn message_type(&self) -> MessageType {
        match self {
            KeygenMessage::Commit(_) => COMMIT,
            KeygenMessage::Share(_) => SHARE,
        }
    }
}
