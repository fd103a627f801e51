//! DKG protocol implementation

use super::{
    CommitMessage, DkgConfig, DkgResult, KeygenMessage, ShareMessage, COMMIT, MESSAGE_TYPES, SHARE,
};
use crate::birkhoff::{BkParameter, BkParameters};
use crate::engine::{ChannelListener, Handler, RoundEngine, Transition};
use crate::mpc::{MessageSink, PeerManager};
use crate::{Error, MessageType, PartyId, Result};
use k256::{
    elliptic_curve::{
        ff::PrimeField,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field,
    },
    AffinePoint, FieldBytes, NonZeroScalar, ProjectivePoint, PublicKey, Scalar,
};
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

/// One party's side of a distributed key generation
///
/// Register [`sink`](Self::sink) with the transport, then call
/// [`run`](Self::run) or [`start`](Self::start) and [`wait`](Self::wait).
pub struct Dkg {
    engine: RoundEngine<KeygenMessage, DkgResult>,
    listener: Arc<ChannelListener>,
    peers: Arc<dyn PeerManager<KeygenMessage>>,
    commit: KeygenMessage,
}

impl Dkg {
    pub fn new(config: DkgConfig, peers: Arc<dyn PeerManager<KeygenMessage>>) -> Result<Self> {
        Self::with_rng(config, peers, &mut OsRng)
    }

    /// Like [`new`](Self::new) with a caller-provided randomness source
    pub fn with_rng<R: RngCore + CryptoRng>(
        config: DkgConfig,
        peers: Arc<dyn PeerManager<KeygenMessage>>,
        rng: &mut R,
    ) -> Result<Self> {
        let x = NonZeroScalar::random(&mut *rng);
        let bk = BkParameter::new(*x, config.rank);
        Self::build(config, bk, Mode::Keygen, peers, rng)
    }

    pub(super) fn build<R: RngCore + CryptoRng>(
        config: DkgConfig,
        bk: BkParameter<Scalar>,
        mode: Mode,
        peers: Arc<dyn PeerManager<KeygenMessage>>,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        if peers.num_peers() + 1 != config.party_ids.len() {
            return Err(Error::InvalidConfig(format!(
                "Peer manager knows {} peers, session has {} parties",
                peers.num_peers(),
                config.party_ids.len()
            )));
        }

        let dealer = Dealer::new(config, bk, mode, Arc::clone(&peers), rng);
        let commit = dealer.commit_message();

        let listener = Arc::new(ChannelListener::new());
        let engine = RoundEngine::new(
            dealer.config.self_id.clone(),
            peers.num_peers(),
            listener.clone(),
            Box::new(CommitRound {
                dealer,
                commits: BTreeMap::new(),
            }),
            &MESSAGE_TYPES,
        );

        Ok(Self {
            engine,
            listener,
            peers,
            commit,
        })
    }

    pub fn engine(&self) -> &RoundEngine<KeygenMessage, DkgResult> {
        &self.engine
    }

    /// Inbound side to register with the transport
    pub fn sink(&self) -> Arc<dyn MessageSink<KeygenMessage>> {
        Arc::new(self.engine.clone())
    }

    /// Broadcast the commitment round and start processing peer messages
    #[instrument(skip(self), fields(party_id = %self.engine.self_id()))]
    ///
    /// If the broadcast fails the run is stopped, so [`Dkg::wait`] resolves
    /// with [`Error::Cancelled`].
    pub fn start(&self) -> Result<()> {
        self.engine.start();
        if let Err(e) = self.peers.broadcast(self.commit.clone()) {
            warn!(error = %e, "Failed to broadcast commitments");
            self.engine.stop();
            return Err(e);
        }
        info!("Keygen started");
        Ok(())
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Wait for the run to end and return its output
    pub async fn wait(&self) -> Result<DkgResult> {
        self.listener.wait().await?;
        self.engine.result()
    }

    /// Wait for all peers, then run the protocol to completion
    pub async fn run(&self) -> Result<DkgResult> {
        self.peers.ensure_all_connected().await?;
        self.start()?;
        self.wait().await
    }
}

pub(super) enum Mode {
    Keygen,
    /// Re-randomize the shares of a previous run
    Refresh(Box<DkgResult>),
}

/// Local polynomial and everything needed to deal it
struct Dealer {
    config: DkgConfig,
    bk: BkParameter<Scalar>,
    polynomial: Vec<Scalar>,
    peers: Arc<dyn PeerManager<KeygenMessage>>,
    mode: Mode,
}

impl Dealer {
    fn new<R: RngCore + CryptoRng>(
        config: DkgConfig,
        bk: BkParameter<Scalar>,
        mode: Mode,
        peers: Arc<dyn PeerManager<KeygenMessage>>,
        rng: &mut R,
    ) -> Self {
        let mut polynomial: Vec<Scalar> = (0..config.threshold)
            .map(|_| Scalar::random(&mut *rng))
            .collect();
        if let Mode::Refresh(_) = mode {
            polynomial[0] = Scalar::ZERO;
        }

        Self {
            config,
            bk,
            polynomial,
            peers,
            mode,
        }
    }

    fn is_refresh(&self) -> bool {
        matches!(self.mode, Mode::Refresh(_))
    }

    /// `a_k * G` for every coefficient
    fn commitments(&self) -> Vec<ProjectivePoint> {
        self.polynomial
            .iter()
            .map(|coef| ProjectivePoint::GENERATOR * coef)
            .collect()
    }

    fn commit_message(&self) -> KeygenMessage {
        let skip = usize::from(self.is_refresh());
        let commitments = self
            .commitments()
            .iter()
            .skip(skip)
            .map(encode_point)
            .collect();

        KeygenMessage::Commit(CommitMessage {
            from: self.config.self_id.clone(),
            session_id: self.config.session_id,
            bk_x: self.bk.x().to_bytes().to_vec(),
            bk_rank: self.bk.rank(),
            commitments,
        })
    }

    fn check_sender(&self, from: &str) -> Result<()> {
        if from == self.config.self_id || !self.config.party_ids.iter().any(|id| id == from) {
            return Err(Error::VerificationFailed(format!("{} is not a peer", from)));
        }
        Ok(())
    }

    fn check_session(&self, session_id: &[u8; 32]) -> Result<()> {
        if *session_id != self.config.session_id {
            return Err(Error::VerificationFailed("Session ID mismatch".into()));
        }
        Ok(())
    }
}

impl Drop for Dealer {
    fn drop(&mut self) {
        self.polynomial.zeroize();
    }
}

/// A peer's round-1 contribution
struct PeerCommit {
    bk: BkParameter<Scalar>,
    /// One point per coefficient, constant term included
    commitments: Vec<ProjectivePoint>,
}

struct CommitRound {
    dealer: Dealer,
    commits: BTreeMap<PartyId, PeerCommit>,
}

impl Handler<KeygenMessage, DkgResult> for CommitRound {
    fn message_type(&self) -> MessageType {
        COMMIT
    }

    fn is_handled(&self, sender: &str) -> bool {
        self.commits.contains_key(sender)
    }

    fn handle_message(&mut self, msg: KeygenMessage) -> Result<()> {
        let KeygenMessage::Commit(msg) = msg else {
            return Err(Error::VerificationFailed("Expected a commitment".into()));
        };
        self.dealer.check_sender(&msg.from)?;
        self.dealer.check_session(&msg.session_id)?;

        let threshold = self.dealer.config.threshold;
        let mut commitments = Vec::with_capacity(threshold);
        if self.dealer.is_refresh() {
            commitments.push(ProjectivePoint::IDENTITY);
        }
        if commitments.len() + msg.commitments.len() != threshold {
            return Err(Error::VerificationFailed(format!(
                "Expected {} commitments, got {}",
                threshold - commitments.len(),
                msg.commitments.len()
            )));
        }
        for bytes in &msg.commitments {
            commitments.push(decode_point(bytes)?);
        }

        let x = decode_scalar(&msg.bk_x)?;
        if bool::from(x.is_zero()) {
            return Err(Error::VerificationFailed("Zero BK coordinate".into()));
        }
        if msg.bk_rank as usize >= threshold {
            return Err(Error::VerificationFailed(format!(
                "Rank {} must be below threshold {}",
                msg.bk_rank, threshold
            )));
        }
        let bk = BkParameter::new(x, msg.bk_rank);

        if let Mode::Refresh(previous) = &self.dealer.mode {
            if previous.bks.get(&msg.from) != Some(&bk) {
                return Err(Error::VerificationFailed(format!(
                    "BK parameter of {} changed",
                    msg.from
                )));
            }
        }

        debug!(from = %msg.from, rank = msg.bk_rank, "Commitment accepted");
        self.commits.insert(msg.from, PeerCommit { bk, commitments });
        Ok(())
    }

    fn required_message_count(&self) -> usize {
        self.dealer.peers.num_peers()
    }

    fn finalize(self: Box<Self>) -> Result<Transition<KeygenMessage, DkgResult>> {
        let CommitRound {
            dealer,
            mut commits,
        } = *self;
        let threshold = dealer.config.threshold;

        let mut bks: BTreeMap<PartyId, BkParameter<Scalar>> = commits
            .iter()
            .map(|(id, commit)| (id.clone(), commit.bk))
            .collect();
        bks.insert(dealer.config.self_id.clone(), dealer.bk);
        bks.values().copied().collect::<BkParameters<Scalar>>().check_valid(threshold)?;

        for (peer_id, commit) in &commits {
            let mut share = commit.bk.evaluate(&dealer.polynomial);
            let msg = KeygenMessage::Share(ShareMessage {
                from: dealer.config.self_id.clone(),
                to: peer_id.clone(),
                session_id: dealer.config.session_id,
                share: share.to_bytes().to_vec(),
            });
            share.zeroize();
            dealer.peers.send(peer_id, msg)?;
        }
        debug!(party_id = %dealer.config.self_id, "Shares dealt");

        commits.insert(
            dealer.config.self_id.clone(),
            PeerCommit {
                bk: dealer.bk,
                commitments: dealer.commitments(),
            },
        );

        Ok(Transition::Next(Box::new(ShareRound {
            dealer,
            commits,
            bks,
            received: BTreeMap::new(),
        })))
    }
}

struct ShareRound {
    dealer: Dealer,
    commits: BTreeMap<PartyId, PeerCommit>,
    bks: BTreeMap<PartyId, BkParameter<Scalar>>,
    received: BTreeMap<PartyId, Scalar>,
}

impl Handler<KeygenMessage, DkgResult> for ShareRound {
    fn message_type(&self) -> MessageType {
        SHARE
    }

    fn is_handled(&self, sender: &str) -> bool {
        self.received.contains_key(sender)
    }

    fn handle_message(&mut self, msg: KeygenMessage) -> Result<()> {
        let KeygenMessage::Share(msg) = msg else {
            return Err(Error::VerificationFailed("Expected a share".into()));
        };
        self.dealer.check_sender(&msg.from)?;
        self.dealer.check_session(&msg.session_id)?;
        if msg.to != self.dealer.config.self_id {
            return Err(Error::VerificationFailed(format!(
                "Share addressed to {}",
                msg.to
            )));
        }

        let commit = self
            .commits
            .get(&msg.from)
            .ok_or_else(|| Error::VerificationFailed(format!("No commitment from {}", msg.from)))?;
        let share = decode_scalar(&msg.share)?;

        let row = self.dealer.bk.row(self.dealer.config.threshold);
        if ProjectivePoint::GENERATOR * share != feldman_evaluate(&commit.commitments, &row) {
            return Err(Error::VerificationFailed(format!(
                "Share from {} does not match commitment",
                msg.from
            )));
        }

        self.received.insert(msg.from, share);
        Ok(())
    }

    fn required_message_count(&self) -> usize {
        self.dealer.peers.num_peers()
    }

    fn finalize(self: Box<Self>) -> Result<Transition<KeygenMessage, DkgResult>> {
        let ShareRound {
            dealer,
            commits,
            bks,
            mut received,
        } = *self;
        let config = &dealer.config;
        let threshold = config.threshold;

        let mut share = dealer.bk.evaluate(&dealer.polynomial);
        for delta in received.values() {
            share += delta;
        }
        received.values_mut().for_each(Zeroize::zeroize);

        let mut partial_public_keys = BTreeMap::new();
        for (id, bk) in &bks {
            let row = bk.row(threshold);
            let point = commits
                .values()
                .map(|commit| feldman_evaluate(&commit.commitments, &row))
                .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p);
            partial_public_keys.insert(id.clone(), point);
        }

        let public_key = match &dealer.mode {
            Mode::Keygen => {
                let point = commits
                    .values()
                    .map(|commit| commit.commitments[0])
                    .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p);
                PublicKey::from_affine(point.to_affine())
                    .map_err(|_| Error::VerificationFailed("Public key is the identity".into()))?
            }
            Mode::Refresh(previous) => {
                share += previous.share;
                for (id, point) in partial_public_keys.iter_mut() {
                    let old = previous.partial_public_keys.get(id).ok_or_else(|| {
                        Error::VerificationFailed(format!("No partial public key for {}", id))
                    })?;
                    *point += old;
                }
                previous.public_key.clone()
            }
        };

        if partial_public_keys.get(&config.self_id) != Some(&(ProjectivePoint::GENERATOR * share)) {
            return Err(Error::VerificationFailed(
                "Share does not match partial public key".into(),
            ));
        }

        info!(party_id = %config.self_id, "Keygen round completed");

        Ok(Transition::Done(DkgResult {
            session_id: config.session_id,
            self_id: config.self_id.clone(),
            threshold,
            share,
            public_key,
            bks,
            partial_public_keys,
        }))
    }
}

/// `sum_k row_k * C_k`, i.e. `f^(rank)(x) * G` for the row of `(x, rank)`
fn feldman_evaluate(commitments: &[ProjectivePoint], row: &[Scalar]) -> ProjectivePoint {
    commitments
        .iter()
        .zip(row)
        .fold(ProjectivePoint::IDENTITY, |acc, (c, r)| acc + *c * r)
}

fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let point = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::VerificationFailed(e.to_string()))?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&point))
        .ok_or_else(|| Error::VerificationFailed("Invalid commitment point".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// Decode a canonical big-endian scalar; values at or above the group
/// order are rejected
fn decode_scalar(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != 32 {
        return Err(Error::Deserialization("Invalid scalar length".into()));
    }
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::clone_from_slice(bytes)))
        .ok_or_else(|| Error::Deserialization("Scalar is not below the group order".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feldman_matches_derivative() {
        let poly: Vec<Scalar> = (1..=4u64).map(Scalar::from).collect();
        let commitments: Vec<ProjectivePoint> =
            poly.iter().map(|c| ProjectivePoint::GENERATOR * c).collect();

        for rank in 0..3 {
            let bk = BkParameter::new(Scalar::from(7u64), rank);
            assert_eq!(
                feldman_evaluate(&commitments, &bk.row(4)),
                ProjectivePoint::GENERATOR * bk.evaluate(&poly)
            );
        }
    }

    #[test]
    fn test_scalar_decoding_is_strict() {
        let s = Scalar::from(12345u64);
        assert_eq!(decode_scalar(&s.to_bytes()).unwrap(), s);
        assert!(decode_scalar(&[0xff; 32]).is_err());
        assert!(decode_scalar(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_point_encoding() {
        let p = ProjectivePoint::GENERATOR * Scalar::from(99u64);
        assert_eq!(decode_point(&encode_point(&p)).unwrap(), p);
        assert!(decode_point(&[7u8; 5]).is_err());
    }
}
