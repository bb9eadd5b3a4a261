//! The signing seam used for the status-request envelope.

use std::fmt;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::prelude::*;
use p256::ecdsa::signature::Signer as _;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::core::jwk::{Curve, KeyType, PublicKeyJwk};

#[async_trait]
pub trait RequestSigner: fmt::Debug + Send + Sync {
    /// The algorithm that will be used to sign.
    fn alg(&self) -> &str;

    /// The public JWK of the signer.
    fn jwk(&self) -> &PublicKeyJwk;

    async fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// A [`RequestSigner`] over a P-256 key.
pub struct P256Signer {
    key: p256::ecdsa::SigningKey,
    jwk: PublicKeyJwk,
}

impl P256Signer {
    pub fn new(key: p256::ecdsa::SigningKey) -> Result<Self> {
        let point = key.verifying_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            bail!("signing key has no affine coordinates");
        };
        let jwk = PublicKeyJwk {
            kty: KeyType::Ec,
            crv: Curve::P256,
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: Some(BASE64_URL_SAFE_NO_PAD.encode(y)),
            ..PublicKeyJwk::default()
        };
        Ok(Self { key, jwk })
    }
}

#[async_trait]
impl RequestSigner for P256Signer {
    fn alg(&self) -> &str {
        "ES256"
    }

    fn jwk(&self) -> &PublicKeyJwk {
        &self.jwk
    }

    async fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let signature: p256::ecdsa::Signature = self.key.sign(payload);
        signature.to_vec()
    }
}

impl fmt::Debug for P256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("P256Signer").field("jwk", &self.jwk).finish_non_exhaustive()
    }
}

/// A [`RequestSigner`] over an Ed25519 key, constructed from a 32-byte
/// seed.
pub struct Ed25519Signer {
    key: ed25519_dalek::SigningKey,
    jwk: PublicKeyJwk,
}

impl Ed25519Signer {
    pub fn new(seed: &[u8; 32]) -> Self {
        let key = ed25519_dalek::SigningKey::from_bytes(seed);
        let jwk = PublicKeyJwk {
            kty: KeyType::Okp,
            crv: Curve::Ed25519,
            x: BASE64_URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes()),
            ..PublicKeyJwk::default()
        };
        Self { key, jwk }
    }
}

#[async_trait]
impl RequestSigner for Ed25519Signer {
    fn alg(&self) -> &str {
        "EdDSA"
    }

    fn jwk(&self) -> &PublicKeyJwk {
        &self.jwk
    }

    async fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let signature: ed25519_dalek::Signature = self.key.sign(payload);
        signature.to_vec()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer").field("jwk", &self.jwk).finish_non_exhaustive()
    }
}
