//! JSON configuration for operator-driven key recovery

use crate::keygen::DkgResult;
use crate::recovery::{
    public_key_from_coordinates, public_key_to_coordinates, recover_private_key, CurveKind,
    RecoveryPeer,
};
use crate::types::{scalar_from_decimal, scalar_to_decimal};
use crate::{birkhoff::BkParameter, Error, PartyId, Result};
use elliptic_curve::{
    sec1::{FromEncodedPoint, ModulusSize, ToEncodedPoint},
    AffinePoint, CurveArithmetic, FieldBytesSize,
};
use k256::Secp256k1;
use p256::NistP256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Everything needed to recover a threshold key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// `secp256k1` or `p256`
    #[serde(default)]
    pub curve: Option<String>,
    pub threshold: usize,
    pub pubkey: PublicKeyConfig,
    pub peers: Vec<PeerConfig>,
}

/// Affine public key coordinates as decimal strings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyConfig {
    pub x: String,
    pub y: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: PartyId,
    /// Decimal share
    pub share: String,
    pub bk: BkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BkConfig {
    /// Decimal coordinate
    pub x: String,
    #[serde(default)]
    pub rank: u32,
}

/// A recovered private key with its public key
pub struct RecoveredKey {
    pub curve: CurveKind,
    /// Big-endian secret scalar
    pub private_key: Zeroizing<Vec<u8>>,
    /// Compressed SEC1 public key
    pub public_key: Vec<u8>,
}

impl RecoveredKey {
    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.private_key.as_slice()))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }
}

impl RecoveryConfig {
    /// Read a config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Write the config as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Build a config from the secp256k1 keygen outputs of several parties
    pub fn from_dkg_results(results: &[DkgResult]) -> Result<Self> {
        let first = results
            .first()
            .ok_or(Error::NotEnoughPeers(0))?;
        let (x, y) = public_key_to_coordinates::<Secp256k1>(&first.public_key);

        let peers = results
            .iter()
            .map(|result| {
                let bk = result.bk()?;
                Ok(PeerConfig {
                    id: result.self_id.clone(),
                    share: scalar_to_decimal::<Secp256k1>(&result.share),
                    bk: BkConfig {
                        x: scalar_to_decimal::<Secp256k1>(&bk.x()),
                        rank: bk.rank(),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            curve: Some(CurveKind::Secp256k1.to_string()),
            threshold: first.threshold,
            pubkey: PublicKeyConfig { x, y },
            peers,
        })
    }

    /// Recover the private key on the configured curve
    pub fn recover(&self) -> Result<RecoveredKey> {
        if self.peers.len() < 2 {
            return Err(Error::NotEnoughPeers(self.peers.len()));
        }
        let curve: CurveKind = self.curve.as_deref().ok_or(Error::AbsentCurve)?.parse()?;
        debug!(%curve, peers = self.peers.len(), "Recovering key");

        let (private_key, public_key) = match curve {
            CurveKind::Secp256k1 => self.recover_on::<Secp256k1>()?,
            CurveKind::P256 => self.recover_on::<NistP256>()?,
        };

        info!(%curve, "Key recovered from config");
        Ok(RecoveredKey {
            curve,
            private_key,
            public_key,
        })
    }

    fn recover_on<C>(&self) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)>
    where
        C: CurveArithmetic,
        AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
        FieldBytesSize<C>: ModulusSize,
    {
        let mut shares = BTreeMap::new();
        let mut bks = BTreeMap::new();
        for peer in &self.peers {
            let share = scalar_from_decimal::<C>(&peer.share)?;
            let bk = BkParameter::new(scalar_from_decimal::<C>(&peer.bk.x)?, peer.bk.rank);

            if shares.insert(peer.id.clone(), share).is_some() {
                return Err(Error::InvalidConfig(format!("Duplicate peer {}", peer.id)));
            }
            bks.insert(peer.id.clone(), bk);
        }

        let peers = RecoveryPeer::from_maps(&shares, &bks)?;
        let public_key = public_key_from_coordinates::<C>(&self.pubkey.x, &self.pubkey.y)?;
        let secret = recover_private_key::<C>(self.threshold, &public_key, &peers)?;

        Ok((
            Zeroizing::new(secret.to_bytes().to_vec()),
            public_key.to_encoded_point(true).as_bytes().to_vec(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "curve": "secp256k1",
        "threshold": 2,
        "pubkey": {
            "x": "112363345206559513967411659444620105992871732728134049791505159850234274012554",
            "y": "90435951029605018774762791226409664020987295549738711287286651149053644515432"
        },
        "peers": [
            {
                "id": "id-10",
                "share": "4433930311896586173225605911604098714764809986765287553545688226619194396795",
                "bk": { "x": "35708105979892983394462002592936921792160460602972875353936833272812615304178", "rank": 0 }
            },
            {
                "id": "id-20",
                "share": "11206683307503035256881204936677301873389877738402403164108038906992854558074",
                "bk": { "x": "69597477371637251385786663792575032001854147985881576910239092372529440542030", "rank": 0 }
            }
        ]
    }"#;

    #[test]
    fn test_recover_fixture() {
        let config = RecoveryConfig::from_json(FIXTURE).unwrap();
        let key = config.recover().unwrap();

        assert_eq!(key.curve, CurveKind::Secp256k1);
        assert_eq!(key.private_key.len(), 32);
        assert_eq!(key.public_key.len(), 33);
    }

    #[test]
    fn test_absent_curve() {
        let mut config = RecoveryConfig::from_json(FIXTURE).unwrap();
        config.curve = None;
        assert!(matches!(config.recover(), Err(Error::AbsentCurve)));

        config.curve = Some("ed25519".into());
        assert!(matches!(config.recover(), Err(Error::UnsupportedCurve(_))));
    }

    #[test]
    fn test_not_enough_peers_checked_first() {
        let mut config = RecoveryConfig::from_json(FIXTURE).unwrap();
        config.curve = None;
        config.peers.truncate(1);
        assert!(matches!(config.recover(), Err(Error::NotEnoughPeers(1))));
    }

    #[test]
    fn test_duplicate_peer_id() {
        let mut config = RecoveryConfig::from_json(FIXTURE).unwrap();
        config.peers[1].id = config.peers[0].id.clone();
        assert!(matches!(config.recover(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_wrong_public_key() {
        let mut config = RecoveryConfig::from_json(FIXTURE).unwrap();
        config.peers[0].share = "1".into();
        assert!(matches!(config.recover(), Err(Error::PublicKeyMismatch)));
    }

    #[test]
    fn test_save_and_load() {
        let config = RecoveryConfig::from_json(FIXTURE).unwrap();
        let path = std::env::temp_dir().join(format!("recovery-{}.json", std::process::id()));

        config.save(&path).unwrap();
        let loaded = RecoveryConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.peers.len(), 2);
        assert_eq!(loaded.pubkey.x, config.pubkey.x);
        assert!(loaded.recover().is_ok());
    }
}
