use serde::{Deserialize, Serialize};

/// Simplified JSON Web Key ([RFC7517]) restricted to the key types wallet
/// tokens are signed with.
///
/// [RFC7517]: https://www.rfc-editor.org/rfc/rfc7517
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key identifier, matched against the `kid` of a JWS header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key type.
    pub kty: KeyType,

    /// Cryptographic curve.
    pub crv: Curve,

    /// X coordinate.
    pub x: String,

    /// Y coordinate. Not present for Ed25519 keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Algorithm intended for use with the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Use of the key.
    #[serde(rename = "use")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_: Option<KeyUse>,
}

/// Cryptographic key type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum KeyType {
    /// Octet key pair (Edwards curve).
    #[default]
    #[serde(rename = "OKP")]
    Okp,

    /// Elliptic curve key pair.
    #[serde(rename = "EC")]
    Ec,
}

/// Cryptographic curve.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Curve {
    /// Ed25519 curve.
    #[default]
    Ed25519,

    /// NIST P-256 curve.
    #[serde(rename = "P-256")]
    P256,

    /// secp256k1 curve.
    #[serde(rename = "secp256k1", alias = "ES256K")]
    Es256K,
}

/// The intended usage of the key.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum KeyUse {
    /// Signature verification.
    #[default]
    #[serde(rename = "sig")]
    Signature,

    /// Encryption.
    #[serde(rename = "enc")]
    Encryption,
}

/// A set of JWKs, as served by an OpenID Connect `jwks_uri` endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Jwks {
    /// The set of public key JWKs.
    pub keys: Vec<PublicKeyJwk>,
}

impl Jwks {
    /// Select the key referenced by a JWS `kid` header. Falls back to the
    /// only key in the set when no `kid` was supplied.
    pub fn find_key(&self, kid: Option<&str>) -> Option<&PublicKeyJwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|key| key.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }
}
