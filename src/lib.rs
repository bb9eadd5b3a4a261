//! This library implements the verifier side of [SIOPv2] credential
//! presentations: given a single signed response token received from an
//! end-user wallet, it recursively discovers, decodes, authenticates and
//! cross-validates every token nested within it, producing one structured
//! verdict.
//!
//! [SIOPv2]: <https://openid.net/specs/openid-connect-self-issued-v2-1_0.html>
//!
//! # Usage
//!
//! You can create a validator using the [`Validator`] type as follows:
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use siop_verifier::validator::Validator;
//!
//! // Setup the validator.
//! let validator = Validator::builder()
//!     .with_resolver(resolver)
//!     .with_audience("https://verifier.example.com/api")
//!     .with_nonce(nonce)
//!     .with_state(state)
//!     .with_id_token_issuers(vec![configuration_url])
//!     .with_trusted_issuers("Diploma", trusted_dids)
//!     .build()?;
//!
//! // Validate the wallet's response.
//! let response = validator.validate(&raw_siop).await;
//!
//! if response.result {
//!     let result = response.validation_result.unwrap();
//!     println!("wallet DID: {:?}", result.did);
//! }
//! ```
//!
//! The validator's behavior can be customized by implementing the
//! [`DidResolver`], [`AsyncHttpClient`], [`RequestSigner`] and
//! [`TokenValidator`] traits.
//!
//! [`Validator`]: crate::validator::Validator
//! [`DidResolver`]: crate::core::did::DidResolver
//! [`AsyncHttpClient`]: crate::core::http::AsyncHttpClient
//! [`RequestSigner`]: crate::validator::request_signer::RequestSigner
//! [`TokenValidator`]: crate::validator::TokenValidator
//!
//! # Validation overview
//!
//! Here is a simplified overview of a validation run, referencing the
//! types implementing it.
//!
//! 1. *Classification*: the raw response is decoded as a compact JWS and
//!    classified by the shape of its payload into a
//!    [`ClaimToken`](crate::core::ClaimToken).
//! 2. *Queue processing*: the token seeds a
//!    [`ValidationQueue`](crate::core::ValidationQueue); each dequeued
//!    item is dispatched to the registered
//!    [`TokenValidator`](crate::validator::TokenValidator) for its type.
//! 3. *SIOP fan-out*: validating the envelope verifies its self-signed
//!    JWS, enforces audience and replay expectations, and appends every
//!    nested token (id-tokens, self-issued claims, presentations) to the
//!    queue. Presentations in turn append their credentials.
//! 4. *Cross-validation*: the DID established by the envelope must be the
//!    holder of every presentation and the audience of every credential,
//!    and credential issuers must be trusted for the presented contract.
//! 5. *Verdict*: when the queue drains, the per-item results are
//!    aggregated (the first failure wins) and grouped into a
//!    [`ValidationResult`](crate::core::ValidationResult). Optionally,
//!    each credential's status endpoint is polled for a signed receipt.
//!
//! All network access (DID resolution, OpenID Connect discovery, JWKS and
//! status retrieval) goes through caller-supplied implementations of the
//! resolver and HTTP-client traits, making the engine deterministic and
//! fully testable offline.

pub mod core;
pub mod validator;

pub use serde_json_path::JsonPath;
