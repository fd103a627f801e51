//! Distributed key generation over ranked (Birkhoff) shares
//!
//! Both protocols run two rounds on a [`RoundEngine`](crate::engine::RoundEngine):
//! every party broadcasts Feldman commitments to a random polynomial together
//! with its BK parameter, then deals each peer the derivative share matching
//! that peer's rank. Key refresh deals zero-constant polynomials, so the
//! shared secret and the public key stay the same.

mod dkg;
mod key_refresh;
mod messages;

pub use dkg::Dkg;
pub use key_refresh::KeyRefresh;
pub use messages::*;

use crate::birkhoff::BkParameter;
use crate::recovery::RecoveryPeer;
use crate::{Error, PartyId, Result, SessionId};
use k256::{elliptic_curve::group::GroupEncoding, ProjectivePoint, PublicKey, Scalar};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

/// Settings of one party for a keygen run
#[derive(Debug, Clone)]
pub struct DkgConfig {
    pub session_id: SessionId,
    pub self_id: PartyId,
    /// All participants, including `self_id`
    pub party_ids: Vec<PartyId>,
    pub threshold: usize,
    /// Derivative order of the local share
    pub rank: u32,
}

impl DkgConfig {
    pub fn new(
        session_id: SessionId,
        self_id: impl Into<PartyId>,
        party_ids: Vec<PartyId>,
        threshold: usize,
    ) -> Self {
        Self {
            session_id,
            self_id: self_id.into(),
            party_ids,
            threshold,
            rank: 0,
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        crate::birkhoff::ensure_threshold(self.threshold, self.party_ids.len())?;

        let mut sorted = self.party_ids.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != self.party_ids.len() {
            return Err(Error::InvalidConfig("Duplicate party ID".into()));
        }
        if !self.party_ids.contains(&self.self_id) {
            return Err(Error::InvalidConfig(format!(
                "{} is not a participant",
                self.self_id
            )));
        }
        if self.rank as usize >= self.threshold {
            return Err(Error::InvalidConfig(format!(
                "Rank {} must be below threshold {}",
                self.rank, self.threshold
            )));
        }
        Ok(())
    }
}

/// Derive a session ID all parties agree on from the sorted party list
/// and a shared nonce
pub fn derive_session_id(party_ids: &[PartyId], nonce: &[u8]) -> SessionId {
    let mut sorted: Vec<&PartyId> = party_ids.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(b"birkhoff-tss/session");
    for id in sorted {
        hasher.update((id.len() as u64).to_be_bytes());
        hasher.update(id.as_bytes());
    }
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Output of a keygen or refresh run for one party
#[derive(Clone)]
pub struct DkgResult {
    pub session_id: SessionId,
    pub self_id: PartyId,
    pub threshold: usize,
    /// Local secret share `F^(rank)(x)`
    pub share: Scalar,
    pub public_key: PublicKey,
    /// BK parameter of every party
    pub bks: BTreeMap<PartyId, BkParameter<Scalar>>,
    /// `share * G` of every party
    pub partial_public_keys: BTreeMap<PartyId, ProjectivePoint>,
}

impl DkgResult {
    /// Local BK parameter
    pub fn bk(&self) -> Result<BkParameter<Scalar>> {
        self.bks
            .get(&self.self_id)
            .copied()
            .ok_or_else(|| Error::Internal(format!("No BK parameter for {}", self.self_id)))
    }

    /// Share and BK parameter ready for key recovery
    pub fn recovery_peer(&self) -> Result<RecoveryPeer<Scalar>> {
        Ok(RecoveryPeer::new(self.share, self.bk()?))
    }

    /// Compressed SEC1 encoding of the group public key
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.as_affine().to_bytes())
    }
}

impl fmt::Debug for DkgResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkgResult")
            .field("self_id", &self.self_id)
            .field("threshold", &self.threshold)
            .field("public_key", &self.public_key_hex())
            .field("parties", &self.bks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Drop for DkgResult {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<PartyId> {
        (0..n).map(|i| format!("id-{}", i)).collect()
    }

    #[test]
    fn test_session_id_ignores_order() {
        let mut parties = ids(3);
        let a = derive_session_id(&parties, b"nonce");
        parties.reverse();
        assert_eq!(a, derive_session_id(&parties, b"nonce"));
        assert_ne!(a, derive_session_id(&parties, b"other"));
    }

    #[test]
    fn test_config_validation() {
        let config = DkgConfig::new([0u8; 32], "id-0", ids(3), 2);
        assert!(config.validate().is_ok());

        assert!(DkgConfig::new([0u8; 32], "id-9", ids(3), 2).validate().is_err());
        assert_eq!(
            DkgConfig::new([0u8; 32], "id-0", ids(3), 1).validate(),
            Err(Error::InvalidThreshold(1))
        );
        assert!(DkgConfig::new([0u8; 32], "id-0", ids(3), 2)
            .with_rank(2)
            .validate()
            .is_err());

        let mut dup = ids(3);
        dup[2] = "id-0".into();
        assert!(DkgConfig::new([0u8; 32], "id-0", dup, 2).validate().is_err());
    }
}
