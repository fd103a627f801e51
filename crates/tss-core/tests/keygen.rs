//! End-to-end keygen, refresh and recovery over the in-memory network

use std::sync::Arc;
use std::time::Duration;
use tss_core::keygen::{
    derive_session_id, Dkg, DkgConfig, DkgResult, KeyRefresh, KeygenMessage, ShareMessage,
};
use tss_core::mpc::{async_trait, MemoryNetwork, MemoryPeerManager, PeerManager};
use tss_core::recovery::{recover_private_key, RecoveryPeer};
use tss_core::{Error, PartyId, Result};

fn party_ids(n: usize) -> Vec<PartyId> {
    (0..n).map(|i| format!("id-{}", i)).collect()
}

async fn run_all<S, F, Fut>(sessions: Vec<S>, run: F) -> Vec<Result<DkgResult>>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>) -> Fut,
    Fut: std::future::Future<Output = Result<DkgResult>> + Send + 'static,
{
    let handles: Vec<_> = sessions
        .into_iter()
        .map(|session| tokio::spawn(run(Arc::new(session))))
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("session timed out")
            .expect("session panicked");
        results.push(result);
    }
    results
}

async fn keygen(threshold: usize, ranks: &[u32]) -> Vec<DkgResult> {
    let ids = party_ids(ranks.len());
    let session_id = derive_session_id(&ids, b"keygen-test");
    let network = MemoryNetwork::<KeygenMessage>::new();

    let sessions: Vec<Dkg> = ids
        .iter()
        .zip(ranks)
        .map(|(id, rank)| {
            let config =
                DkgConfig::new(session_id, id.clone(), ids.clone(), threshold).with_rank(*rank);
            let dkg = Dkg::new(config, Arc::new(network.peer_manager(id.clone(), &ids))).unwrap();
            network.register(id.clone(), dkg.sink());
            dkg
        })
        .collect();

    run_all(sessions, |dkg| async move { dkg.run().await })
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect()
}

fn recovery_peers(results: &[&DkgResult]) -> Vec<RecoveryPeer<k256::Scalar>> {
    results.iter().map(|r| r.recovery_peer().unwrap()).collect()
}

#[tokio::test]
async fn test_dkg_shares_recover_public_key() {
    let results = keygen(2, &[0, 0, 0]).await;

    let public_key = results[0].public_key.clone();
    for result in &results {
        assert_eq!(result.public_key, public_key);
        assert_eq!(result.bks.len(), 3);
        assert_eq!(result.partial_public_keys.len(), 3);
        assert_eq!(
            result.partial_public_keys[&result.self_id],
            k256::ProjectivePoint::GENERATOR * result.share
        );
    }

    for pair in [[0, 1], [0, 2], [1, 2]] {
        let peers = recovery_peers(&[&results[pair[0]], &results[pair[1]]]);
        assert!(recover_private_key(2, &public_key, &peers).is_ok());
    }

    let all = recovery_peers(&results.iter().collect::<Vec<_>>());
    let secret = recover_private_key(2, &public_key, &all).unwrap();
    assert_eq!(secret.public_key(), public_key);
}

#[tokio::test]
async fn test_ranked_dkg() {
    let results = keygen(3, &[0, 0, 1]).await;
    let public_key = results[0].public_key.clone();

    assert_eq!(results[2].bk().unwrap().rank(), 1);
    let peers = recovery_peers(&results.iter().collect::<Vec<_>>());
    assert!(recover_private_key(3, &public_key, &peers).is_ok());
}

#[tokio::test]
async fn test_refresh_keeps_public_key() {
    let before = keygen(2, &[0, 0, 0]).await;
    let ids = party_ids(3);
    let session_id = derive_session_id(&ids, b"refresh-test");
    let network = MemoryNetwork::<KeygenMessage>::new();

    let sessions: Vec<KeyRefresh> = before
        .iter()
        .map(|previous| {
            let peers = Arc::new(network.peer_manager(previous.self_id.clone(), &ids));
            let session = KeyRefresh::new(previous, session_id, peers).unwrap();
            network.register(previous.self_id.clone(), session.sink());
            session
        })
        .collect();

    let after: Vec<DkgResult> = run_all(sessions, |s| async move { s.run().await })
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.self_id, new.self_id);
        assert_eq!(old.public_key, new.public_key);
        assert_eq!(old.bks, new.bks);
        assert_ne!(old.share, new.share);
    }

    // New shares recover the same key; mixing generations does not.
    let public_key = before[0].public_key.clone();
    let fresh = recovery_peers(&[&after[0], &after[2]]);
    assert!(recover_private_key(2, &public_key, &fresh).is_ok());

    let mixed = recovery_peers(&[&before[0], &after[2]]);
    assert_eq!(
        recover_private_key(2, &public_key, &mixed).unwrap_err(),
        Error::PublicKeyMismatch
    );
}

/// Corrupts every share it sends
struct TamperingPeers {
    inner: MemoryPeerManager<KeygenMessage>,
}

#[async_trait]
impl PeerManager<KeygenMessage> for TamperingPeers {
    fn self_id(&self) -> &str {
        self.inner.self_id()
    }

    fn peer_ids(&self) -> Vec<PartyId> {
        self.inner.peer_ids()
    }

    fn send(&self, peer_id: &str, msg: KeygenMessage) -> Result<()> {
        let msg = match msg {
            KeygenMessage::Share(ShareMessage {
                from,
                to,
                session_id,
                mut share,
            }) => {
                share[31] ^= 1;
                KeygenMessage::Share(ShareMessage {
                    from,
                    to,
                    session_id,
                    share,
                })
            }
            other => other,
        };
        self.inner.send(peer_id, msg)
    }

    async fn ensure_all_connected(&self) -> Result<()> {
        self.inner.ensure_all_connected().await
    }
}

#[tokio::test]
async fn test_tampered_share_fails_receivers() {
    let ids = party_ids(3);
    let session_id = derive_session_id(&ids, b"tamper-test");
    let network = MemoryNetwork::<KeygenMessage>::new();

    let sessions: Vec<Dkg> = ids
        .iter()
        .map(|id| {
            let config = DkgConfig::new(session_id, id.clone(), ids.clone(), 2);
            let manager = network.peer_manager(id.clone(), &ids);
            let peers: Arc<dyn PeerManager<KeygenMessage>> = if id == "id-0" {
                Arc::new(TamperingPeers { inner: manager })
            } else {
                Arc::new(manager)
            };
            let dkg = Dkg::new(config, peers).unwrap();
            network.register(id.clone(), dkg.sink());
            dkg
        })
        .collect();

    let results = run_all(sessions, |dkg| async move { dkg.run().await }).await;

    // The cheater still receives honest shares and finishes.
    assert!(results[0].is_ok());
    for result in &results[1..] {
        assert!(matches!(
            result,
            Err(Error::HandlerValidationFailed { sender, .. }) if sender == "id-0"
        ));
    }
}

#[tokio::test]
async fn test_session_mismatch_fails() {
    let ids = party_ids(2);
    let network = MemoryNetwork::<KeygenMessage>::new();

    let sessions: Vec<Dkg> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let session_id = derive_session_id(&ids, &[i as u8]);
            let config = DkgConfig::new(session_id, id.clone(), ids.clone(), 2);
            let dkg = Dkg::new(config, Arc::new(network.peer_manager(id.clone(), &ids))).unwrap();
            network.register(id.clone(), dkg.sink());
            dkg
        })
        .collect();

    let results = run_all(sessions, |dkg| async move { dkg.run().await }).await;
    for result in results {
        assert!(matches!(
            result,
            Err(Error::HandlerValidationFailed { reason, .. }) if reason.contains("Session ID")
        ));
    }
}

#[tokio::test]
async fn test_failed_broadcast_ends_run() {
    let ids = party_ids(2);
    let session_id = derive_session_id(&ids, b"unreachable-test");
    let network = MemoryNetwork::<KeygenMessage>::new();

    // id-1 never registers, so the commitment cannot be delivered.
    let config = DkgConfig::new(session_id, ids[0].clone(), ids.clone(), 2);
    let dkg = Dkg::new(config, Arc::new(network.peer_manager(ids[0].clone(), &ids))).unwrap();
    network.register(ids[0].clone(), dkg.sink());

    assert!(matches!(dkg.start(), Err(Error::Relay(_))));

    let result = tokio::time::timeout(Duration::from_secs(5), dkg.wait())
        .await
        .expect("wait did not resolve");
    assert!(matches!(result, Err(Error::Cancelled)));
}
