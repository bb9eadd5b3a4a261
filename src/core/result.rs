//! The assembled verdict of a full validation run.

use std::collections::HashMap;

use serde_json::{Map, Value as Json};

use crate::core::claim_token::ClaimToken;

/// The current standing of one credential, as attested by its issuer's
/// status endpoint.
#[derive(Clone, Debug)]
pub struct StatusEntry {
    /// The raw receipt token for this credential.
    pub raw: String,
    /// The decoded receipt payload.
    pub payload: Map<String, Json>,
}

/// Everything established by a successful run, grouped by token type.
#[derive(Clone, Debug, Default)]
pub struct ValidationResult {
    /// The DID established by the SIOP (or, failing that, the audience of a
    /// contained credential).
    pub did: Option<String>,
    /// The contract referenced by an issuance SIOP.
    pub contract: Option<String>,
    /// The `jti` of the SIOP envelope.
    pub siop_jti: Option<String>,
    /// Validated id-tokens, keyed by queue id.
    pub id_tokens: Option<HashMap<String, ClaimToken>>,
    /// Validated credentials, keyed by queue id.
    pub verifiable_credentials: Option<HashMap<String, ClaimToken>>,
    /// Validated presentations, keyed by queue id.
    pub verifiable_presentations: Option<HashMap<String, ClaimToken>>,
    /// The self-issued claim bundle, when one was presented.
    pub self_issued: Option<ClaimToken>,
    /// The validated SIOP envelope itself.
    pub siop: Option<ClaimToken>,
    /// Per-credential status receipts, keyed by `jti`.
    pub verifiable_presentation_status: Option<HashMap<String, StatusEntry>>,
}
