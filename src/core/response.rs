//! The per-token validation outcome, carrying an HTTP-like status so the
//! first failure can be surfaced to callers unchanged.

use std::collections::HashMap;

use serde_json::{Map, Value as Json};

use crate::core::claim_token::ClaimToken;

/// Validation succeeded.
pub const OK: u16 = 200;
/// The input could not be decoded or classified.
pub const MALFORMED: u16 = 400;
/// A cryptographic or semantic check failed, or a collaborator was
/// unreachable.
pub const REJECTED: u16 = 403;
/// No validator is registered for a token type that appeared.
pub const MISCONFIGURED: u16 = 500;

/// The outcome of validating a single token.
#[derive(Clone, Debug)]
pub struct ValidationResponse {
    pub result: bool,
    pub status: u16,
    /// Human-readable description of the first failing condition.
    pub detailed_error: Option<String>,
    /// The decoded payload, on success.
    pub payload_object: Option<Map<String, Json>>,
    /// The DID the token was verified against, where one applies.
    pub did: Option<String>,
    /// Nested tokens discovered during validation, keyed by queue id.
    pub tokens_to_validate: Option<HashMap<String, ClaimToken>>,
}

impl ValidationResponse {
    pub fn ok() -> Self {
        Self {
            result: true,
            status: OK,
            detailed_error: None,
            payload_object: None,
            did: None,
            tokens_to_validate: None,
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::failure(MALFORMED, detail)
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::failure(REJECTED, detail)
    }

    pub fn misconfigured(detail: impl Into<String>) -> Self {
        Self::failure(MISCONFIGURED, detail)
    }

    /// A network collaborator could not be reached. Reported as rejected.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::failure(REJECTED, detail)
    }

    pub fn with_did(mut self, did: Option<String>) -> Self {
        self.did = did;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Json>) -> Self {
        self.payload_object = Some(payload);
        self
    }

    pub fn with_tokens(mut self, tokens: HashMap<String, ClaimToken>) -> Self {
        self.tokens_to_validate = Some(tokens);
        self
    }

    fn failure(status: u16, detail: impl Into<String>) -> Self {
        Self {
            result: false,
            status,
            detailed_error: Some(detail.into()),
            payload_object: None,
            did: None,
            tokens_to_validate: None,
        }
    }
}
