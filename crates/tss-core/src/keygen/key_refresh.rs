//! Key refresh protocol
//!
//! Every party deals a polynomial with a zero constant term to the same BK
//! parameters as the previous run. Adding the received deltas to the old
//! share re-randomizes it while the secret and the public key stay fixed.

use super::dkg::Mode;
use super::{Dkg, DkgConfig, DkgResult, KeygenMessage};
use crate::mpc::{MessageSink, PeerManager};
use crate::{Result, SessionId};
use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use std::sync::Arc;
use tracing::info;

/// One party's side of a key refresh
pub struct KeyRefresh {
    session: Dkg,
}

impl KeyRefresh {
    pub fn new(
        previous: &DkgResult,
        session_id: SessionId,
        peers: Arc<dyn PeerManager<KeygenMessage>>,
    ) -> Result<Self> {
        Self::with_rng(previous, session_id, peers, &mut OsRng)
    }

    pub fn with_rng<R: RngCore + CryptoRng>(
        previous: &DkgResult,
        session_id: SessionId,
        peers: Arc<dyn PeerManager<KeygenMessage>>,
        rng: &mut R,
    ) -> Result<Self> {
        let bk = previous.bk()?;
        let config = DkgConfig::new(
            session_id,
            previous.self_id.clone(),
            previous.bks.keys().cloned().collect(),
            previous.threshold,
        )
        .with_rank(bk.rank());

        info!(party_id = %previous.self_id, "Preparing key refresh");

        let session = Dkg::build(
            config,
            bk,
            Mode::Refresh(Box::new(previous.clone())),
            peers,
            rng,
        )?;
        Ok(Self { session })
    }

    pub fn sink(&self) -> Arc<dyn MessageSink<KeygenMessage>> {
        self.session.sink()
    }

    pub fn start(&self) -> Result<()> {
        self.session.start()
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    pub async fn wait(&self) -> Result<DkgResult> {
        self.session.wait().await
    }

    pub async fn run(&self) -> Result<DkgResult> {
        self.session.run().await
    }
}
