//! Private key recovery from threshold shares
//!
//! Reconstruction is fail-closed: a candidate key is only returned when it
//! derives to the public key the caller already knows.

use crate::birkhoff::{ensure_threshold, BkParameter, BkParameters};
use crate::types::decimal_to_be_bytes;
use crate::{Error, PartyId, Result};
use elliptic_curve::{
    group::Group,
    sec1::{FromEncodedPoint, ModulusSize, ToEncodedPoint},
    AffinePoint, CurveArithmetic, FieldBytes, FieldBytesSize, NonZeroScalar, PublicKey,
    SecretKey,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument, warn};

/// A share together with the BK parameter it was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPeer<F> {
    share: F,
    bk: BkParameter<F>,
}

impl<F: Copy> RecoveryPeer<F> {
    pub fn new(share: F, bk: BkParameter<F>) -> Self {
        Self { share, bk }
    }

    pub fn share(&self) -> F {
        self.share
    }

    pub fn bk(&self) -> BkParameter<F> {
        self.bk
    }

    /// Pair peer-keyed shares with their BK parameters
    ///
    /// The result is ordered by peer identifier, so shares and parameters
    /// stay aligned regardless of how the maps were built.
    pub fn from_maps(
        shares: &BTreeMap<PartyId, F>,
        bks: &BTreeMap<PartyId, BkParameter<F>>,
    ) -> Result<Vec<Self>> {
        if shares.len() != bks.len() {
            return Err(Error::InvalidConfig(format!(
                "{} shares for {} BK parameters",
                shares.len(),
                bks.len()
            )));
        }

        shares
            .iter()
            .map(|(id, share)| {
                let bk = bks
                    .get(id)
                    .ok_or_else(|| Error::InvalidConfig(format!("No BK parameter for {}", id)))?;
                Ok(Self::new(*share, *bk))
            })
            .collect()
    }
}

/// Recover the private key shared among `peers`
///
/// Fails with [`Error::PublicKeyMismatch`] unless the reconstructed scalar
/// times the base point equals `public_key`.
#[instrument(skip_all, fields(threshold, peers = peers.len()))]
pub fn recover_private_key<C>(
    threshold: usize,
    public_key: &PublicKey<C>,
    peers: &[RecoveryPeer<C::Scalar>],
) -> Result<SecretKey<C>>
where
    C: CurveArithmetic,
{
    if peers.len() < 2 {
        return Err(Error::NotEnoughPeers(peers.len()));
    }
    ensure_threshold(threshold, peers.len())?;

    let bks: BkParameters<C::Scalar> = peers.iter().map(|peer| peer.bk).collect();
    let shares: Vec<C::Scalar> = peers.iter().map(|peer| peer.share).collect();

    bks.check_valid(threshold)?;
    let candidate = bks.reconstruct(&shares, threshold)?;

    // Extra shares carry no weight in the coefficients, so check them directly.
    if peers.len() > threshold && bks.interpolate(&shares, threshold).is_err() {
        warn!("Shares do not describe a single polynomial");
        return Err(Error::PublicKeyMismatch);
    }

    let derived = C::ProjectivePoint::generator() * candidate;
    if derived != public_key.to_projective() {
        warn!("Recovered key does not match the public key");
        return Err(Error::PublicKeyMismatch);
    }

    let secret = Option::<NonZeroScalar<C>>::from(NonZeroScalar::new(candidate))
        .ok_or(Error::PublicKeyMismatch)?;

    info!("Private key recovered");
    Ok(SecretKey::from(secret))
}

/// Build a public key from decimal affine coordinates
pub fn public_key_from_coordinates<C>(x: &str, y: &str) -> Result<PublicKey<C>>
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let len = FieldBytes::<C>::default().len();
    let mut sec1 = Vec::with_capacity(1 + 2 * len);
    sec1.push(0x04);
    sec1.extend(decimal_to_be_bytes(x, len)?);
    sec1.extend(decimal_to_be_bytes(y, len)?);

    PublicKey::<C>::from_sec1_bytes(&sec1)
        .map_err(|_| Error::VerificationFailed("Point is not on the curve".into()))
}

/// Decimal affine coordinates of a public key
pub fn public_key_to_coordinates<C>(public_key: &PublicKey<C>) -> (String, String)
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let encoded = public_key.to_encoded_point(false);
    let coordinate = |c: Option<&FieldBytes<C>>| {
        c.map(|bytes| crate::types::be_bytes_to_decimal(bytes))
            .unwrap_or_else(|| "0".to_string())
    };
    (coordinate(encoded.x()), coordinate(encoded.y()))
}

/// Curves that recovery can be dispatched to at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveKind {
    Secp256k1,
    P256,
}

impl FromStr for CurveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "k256" => Ok(CurveKind::Secp256k1),
            "p256" | "secp256r1" | "prime256v1" => Ok(CurveKind::P256),
            other => Err(Error::UnsupportedCurve(other.to_string())),
        }
    }
}

impl fmt::Display for CurveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveKind::Secp256k1 => f.write_str("secp256k1"),
            CurveKind::P256 => f.write_str("p256"),
        }
    }
}
