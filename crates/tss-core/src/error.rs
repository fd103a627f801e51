//! Error types for round engine and threshold scheme operations

use crate::types::{MessageType, RunState};
use thiserror::Error;

/// Result type alias for tss-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a protocol run or combining shares
///
/// Errors are `Clone` so that the terminal error of a failed run can be
/// handed out by [`RoundEngine::result`](crate::engine::RoundEngine::result)
/// any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The transport-level sender differs from the identity inside the message
    #[error("Identity mismatch: sender {sender}, message claims {claimed}")]
    IdentityMismatch { sender: String, claimed: String },

    /// Message belongs to a round the engine has already left
    #[error("Stale message: current type {current}, got {received}")]
    StaleMessage {
        current: MessageType,
        received: MessageType,
    },

    /// A peer contributed twice to the same round
    #[error("Duplicate message from {sender} for type {message_type}")]
    DuplicateSender {
        sender: String,
        message_type: MessageType,
    },

    /// The message queue refused the message
    #[error("Queue rejected message: {0}")]
    QueueRejected(String),

    /// A round handler refused a peer contribution
    #[error("Handler validation failed for {sender}: {reason}")]
    HandlerValidationFailed { sender: String, reason: String },

    /// A round handler could not complete its round
    #[error("Finalize failed: {0}")]
    FinalizeFailed(String),

    /// The consumer was cancelled before the run finished
    #[error("Run cancelled")]
    Cancelled,

    /// A transition out of a terminal state was attempted
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: RunState, to: RunState },

    /// The run has not reached a terminal state yet
    #[error("Result not ready")]
    NotReady,

    /// The Birkhoff matrix is not of full rank
    #[error("Singular scheme: {0}")]
    SingularScheme(String),

    /// Two parties share an evaluation coordinate
    #[error("Duplicate BK coordinate")]
    DuplicateCoordinate,

    /// Threshold requirements not met
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Threshold itself is out of range
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(usize),

    /// Recovered key does not derive to the expected public key
    #[error("Public key derived from the recovered private key does not match")]
    PublicKeyMismatch,

    /// Recovery needs at least two peers
    #[error("Not enough peers: need at least 2, got {0}")]
    NotEnoughPeers(usize),

    /// No curve was supplied
    #[error("Curve is absent")]
    AbsentCurve,

    /// Curve name is not supported
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// Invalid party configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Message could not be routed to a peer
    #[error("Relay error: {0}")]
    Relay(String),

    /// Message verification failed
    #[error("Message verification failed: {0}")]
    VerificationFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
