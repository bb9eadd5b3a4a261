//! Caller-supplied expectations, one set per token type.

use std::collections::{HashMap, HashSet};

use url::Url;

/// Expectations for the outer SIOP envelope.
#[derive(Clone, Debug, Default)]
pub struct ExpectedSiop {
    /// The audience the wallet must have addressed.
    pub audience: String,
    /// When set, the payload `nonce` must match bitwise.
    pub nonce: Option<String>,
    /// When set, the payload `state` must match bitwise.
    pub state: Option<String>,
}

/// Expectations for OpenID Connect id-tokens.
#[derive(Clone, Debug, Default)]
pub struct ExpectedIdToken {
    /// The audience the provider must have addressed.
    pub audience: String,
    /// The discovery endpoints tokens may be validated against.
    pub issuers: Vec<String>,
    /// Maps an issuer name in the token to its discovery endpoint.
    pub configuration: HashMap<String, Url>,
}

/// Expectations for verifiable credentials.
#[derive(Clone, Debug, Default)]
pub struct ExpectedVerifiableCredential {
    /// Trusted issuer DIDs, keyed by contract id.
    pub did_issuers: HashMap<String, HashSet<String>>,
}

/// Expectations for verifiable presentations.
#[derive(Clone, Debug, Default)]
pub struct ExpectedVerifiablePresentation {
    /// The DID presentations must be addressed to, when configured.
    pub did_audience: Option<String>,
}
