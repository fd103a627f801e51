//! Core types shared by the round engine, the DKG rounds and key recovery

use crate::{Error, Result};
use elliptic_curve::{ff::PrimeField, CurveArithmetic, FieldBytes};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a party in the MPC network
pub type PartyId = String;

/// Unique identifier for a session
pub type SessionId = [u8; 32];

/// Round/type tag of a protocol message
///
/// Tags are totally ordered and strictly increase over the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageType(pub u32);

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one protocol run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Created, not yet terminated
    Init,
    /// Final handler returned its output
    Done,
    /// The run aborted
    Failed,
}

impl RunState {
    /// Done and Failed are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "Init",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// A decoded peer message as seen by the round engine
pub trait Message: Send + 'static {
    /// Identity the message claims to come from
    fn sender(&self) -> &str;

    /// Round/type tag of the message
    fn message_type(&self) -> MessageType;
}

/// Decode a base-10 integer into exactly `len` big-endian bytes
pub fn decimal_to_be_bytes(value: &str, len: usize) -> Result<Vec<u8>> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Deserialization(format!(
            "Invalid decimal integer {:?}",
            value
        )));
    }

    let num = BigUint::parse_bytes(value.as_bytes(), 10)
        .ok_or_else(|| Error::Deserialization(format!("Invalid decimal integer {:?}", value)))?;
    let bytes = num.to_bytes_be();
    if bytes.len() > len {
        return Err(Error::Deserialization(format!(
            "Integer does not fit in {} bytes",
            len
        )));
    }

    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    Ok(out)
}

/// Encode big-endian bytes as a base-10 integer
pub fn be_bytes_to_decimal(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_str_radix(10)
}

/// Parse a decimal string into a scalar of curve `C`
///
/// Values that are not strictly below the group order are rejected.
pub fn scalar_from_decimal<C: CurveArithmetic>(value: &str) -> Result<C::Scalar> {
    let mut repr = FieldBytes::<C>::default();
    let bytes = decimal_to_be_bytes(value, repr.len())?;
    repr.copy_from_slice(&bytes);

    Option::<C::Scalar>::from(C::Scalar::from_repr(repr))
        .ok_or_else(|| Error::Deserialization("Integer is not below the group order".into()))
}

/// Render a scalar of curve `C` as a decimal string
pub fn scalar_to_decimal<C: CurveArithmetic>(scalar: &C::Scalar) -> String {
    be_bytes_to_decimal(scalar.to_repr().as_ref())
}
