//! The validation engine: a registry of per-type token validators driven
//! over a FIFO queue, assembling a single verdict for a full SIOP
//! response.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::debug;
use url::Url;

use crate::core::claim_token::{ClaimToken, TokenType};
use crate::core::did::{CachingResolver, DidDocument, DidResolver};
use crate::core::expected::{
    ExpectedIdToken, ExpectedSiop, ExpectedVerifiableCredential, ExpectedVerifiablePresentation,
};
use crate::core::http::{AsyncHttpClient, ReqwestClient};
use crate::core::jws;
use crate::core::queue::{ValidationQueue, ValidationQueueItem};
use crate::core::response::ValidationResponse;
use crate::core::result::ValidationResult;

mod id_token;
pub mod request_signer;
mod self_issued;
mod siop;
mod status;
mod vc;
mod vp;

pub use id_token::IdTokenValidator;
pub use self_issued::SelfIssuedValidator;
pub use siop::SiopValidator;
pub use status::StatusReceiptValidator;
pub use vc::VerifiableCredentialValidator;
pub use vp::VerifiablePresentationValidator;

use request_signer::RequestSigner;

/// Cross-token state established while the queue drains: the DID asserted
/// by the SIOP and the contract it referenced.
#[derive(Clone, Debug, Default)]
pub struct ValidationContext {
    pub subject_did: Option<String>,
    pub contract_id: Option<String>,
}

/// A state machine for one token type. Implementations may append newly
/// discovered tokens to the queue.
#[async_trait]
pub trait TokenValidator: Debug + Send + Sync {
    /// The token type this validator handles.
    fn is_type(&self) -> TokenType;

    async fn validate(
        &self,
        queue: &mut ValidationQueue,
        item: &ValidationQueueItem,
        context: &ValidationContext,
    ) -> ValidationResponse;
}

/// The verdict of a full validation run.
#[derive(Clone, Debug)]
pub struct ValidatorResponse {
    pub result: bool,
    pub status: u16,
    pub detailed_error: Option<String>,
    pub validation_result: Option<ValidationResult>,
}

/// Validates a signed SIOP response and every token nested within it.
///
/// Configuration is frozen at [`ValidatorBuilder::build`]; a `Validator`
/// can serve any number of concurrent `validate` calls.
#[derive(Debug)]
pub struct Validator {
    resolver: Arc<dyn DidResolver>,
    http_client: Arc<dyn AsyncHttpClient>,
    validators: HashMap<TokenType, Box<dyn TokenValidator>>,
    status_check_enabled: bool,
    signer: Option<Arc<dyn RequestSigner>>,
    did: Option<String>,
    signing_key_reference: Option<String>,
    http_timeout: Duration,
}

impl Validator {
    /// Build a new validator.
    pub fn builder() -> ValidatorBuilder {
        ValidatorBuilder::default()
    }

    /// Validate a raw SIOP response token, walking every nested token, and
    /// produce the aggregate verdict.
    pub async fn validate(&self, raw: &str) -> ValidatorResponse {
        let mut queue = ValidationQueue::new();
        queue.enqueue_token("siop", raw);

        let mut context = ValidationContext::default();
        let mut siop_validated = false;

        while let Some(mut item) = queue.get_next() {
            let token = match &item.claim_token {
                Some(token) => token.clone(),
                None => match ClaimToken::from_compact_jws(&item.token_to_validate) {
                    Ok(token) => token,
                    Err(e) => {
                        queue.set_result(&item.id, ValidationResponse::malformed(e.to_string()), None);
                        break;
                    }
                },
            };
            debug!("validating token '{}' as {}", item.id, token.token_type());

            if token.token_type().is_siop() {
                if siop_validated {
                    queue.set_result(
                        &item.id,
                        ValidationResponse::rejected("only one SIOP token may appear in a response"),
                        Some(token),
                    );
                    break;
                }
                siop_validated = true;
            }

            let Some(validator) = self.validators.get(&token.token_type()) else {
                queue.set_result(
                    &item.id,
                    ValidationResponse::misconfigured(format!(
                        "{} does not has a TokenValidator",
                        token.token_type()
                    )),
                    Some(token),
                );
                break;
            };

            item.claim_token = Some(token.clone());
            let response = validator.validate(&mut queue, &item, &context).await;
            let failed = !response.result;

            if token.token_type().is_siop() && response.result {
                context.subject_did = response.did.clone();
                context.contract_id = response
                    .payload_object
                    .as_ref()
                    .and_then(|payload| payload.get("contract"))
                    .and_then(Json::as_str)
                    .and_then(|contract| read_contract_id(contract).ok());
            }

            queue.set_result(&item.id, response, Some(token));
            if failed {
                break;
            }
        }

        let aggregate = queue.aggregate();
        if !aggregate.result {
            return ValidatorResponse {
                result: false,
                status: aggregate.status,
                detailed_error: aggregate.detailed_error,
                validation_result: None,
            };
        }

        let mut result = assemble(&queue);
        if self.status_check_enabled {
            if let Err(failure) = self.check_status(&mut result).await {
                return ValidatorResponse {
                    result: false,
                    status: failure.status,
                    detailed_error: failure.detailed_error,
                    validation_result: None,
                };
            }
        }

        ValidatorResponse {
            result: true,
            status: crate::core::response::OK,
            detailed_error: None,
            validation_result: Some(result),
        }
    }

    pub(crate) fn resolver(&self) -> &Arc<dyn DidResolver> {
        &self.resolver
    }

    pub(crate) fn http_client(&self) -> &Arc<dyn AsyncHttpClient> {
        &self.http_client
    }

    pub(crate) fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub(crate) fn signer(&self) -> Option<&Arc<dyn RequestSigner>> {
        self.signer.as_ref()
    }

    pub(crate) fn did(&self) -> Option<&str> {
        self.did.as_deref()
    }

    pub(crate) fn signing_key_reference(&self) -> Option<&str> {
        self.signing_key_reference.as_deref()
    }
}

/// The last non-empty path segment of a contract URL, percent-decoded.
pub(crate) fn read_contract_id(contract: &str) -> Result<String> {
    let url = Url::parse(contract).with_context(|| format!("'{contract}' is not a valid contract URL"))?;
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .ok_or_else(|| anyhow!("the contract URL '{contract}' has no path"))?;
    Ok(urlencoding::decode(segment)
        .with_context(|| format!("the contract id in '{contract}' is not valid percent-encoding"))?
        .into_owned())
}

/// Resolve a DID and verify the token signature against the key its
/// document exposes for the token's `kid`.
pub(crate) async fn verify_did_signature(
    resolver: &dyn DidResolver,
    token: &ClaimToken,
    did: &str,
) -> Result<DidDocument> {
    let document = resolver
        .resolve(did)
        .await
        .with_context(|| format!("the DID '{did}' could not be resolved"))?;
    let kid = token.header().get("kid").and_then(Json::as_str);
    let key = match kid {
        Some(kid) => document.find_key(kid),
        None => document.first_key(),
    }
    .ok_or_else(|| {
        anyhow!(
            "the DID document of '{did}' has no verification key for '{}'",
            kid.unwrap_or_default()
        )
    })?;
    jws::verify_compact(token.raw(), key).context("the token signature could not be verified")?;
    Ok(document)
}

// Scan the drained queue and group validated tokens by type.
fn assemble(queue: &ValidationQueue) -> ValidationResult {
    let mut result = ValidationResult::default();

    for item in queue.items() {
        let Some(token) = &item.validated_token else {
            continue;
        };
        match token.token_type() {
            TokenType::SiopIssuance
            | TokenType::SiopPresentationAttestation
            | TokenType::SiopPresentationExchange => {
                result.did = item
                    .validation_response
                    .as_ref()
                    .and_then(|response| response.did.clone());
                result.contract = token
                    .payload()
                    .get("contract")
                    .and_then(Json::as_str)
                    .map(ToOwned::to_owned);
                result.siop_jti =
                    token.payload().get("jti").and_then(Json::as_str).map(ToOwned::to_owned);
                result.siop = Some(token.clone());
            }
            TokenType::IdToken => {
                result
                    .id_tokens
                    .get_or_insert_with(HashMap::new)
                    .insert(item.id.clone(), token.clone());
            }
            TokenType::VerifiableCredential => {
                result
                    .verifiable_credentials
                    .get_or_insert_with(HashMap::new)
                    .insert(item.id.clone(), token.clone());
            }
            TokenType::VerifiablePresentation => {
                result
                    .verifiable_presentations
                    .get_or_insert_with(HashMap::new)
                    .insert(item.id.clone(), token.clone());
            }
            TokenType::SelfIssued => result.self_issued = Some(token.clone()),
            TokenType::VerifiablePresentationStatus => {}
        }
    }

    // a response without a SIOP DID can still be attributed through the
    // audience of a contained credential
    if result.did.is_none() {
        result.did = queue
            .items()
            .iter()
            .filter_map(|item| item.validated_token.as_ref())
            .find(|token| token.token_type() == TokenType::VerifiableCredential)
            .and_then(|token| token.payload().get("aud").and_then(Json::as_str))
            .map(ToOwned::to_owned);
    }

    result
}

/// Builder struct for [`Validator`].
#[derive(Debug)]
pub struct ValidatorBuilder {
    resolver: Option<Arc<dyn DidResolver>>,
    http_client: Option<Arc<dyn AsyncHttpClient>>,
    signer: Option<Arc<dyn RequestSigner>>,
    did: Option<String>,
    signing_key_reference: Option<String>,
    audience: Option<String>,
    nonce: Option<String>,
    state: Option<String>,
    id_token_issuers: Vec<String>,
    id_token_configuration: HashMap<String, Url>,
    trusted_issuers: HashMap<String, HashSet<String>>,
    status_check_enabled: bool,
    http_timeout: Duration,
    clock_skew: Duration,
    additional_validators: Vec<Box<dyn TokenValidator>>,
    replacement_validators: Option<Vec<Box<dyn TokenValidator>>>,
}

impl Default for ValidatorBuilder {
    fn default() -> Self {
        Self {
            resolver: None,
            http_client: None,
            signer: None,
            did: None,
            signing_key_reference: None,
            audience: None,
            nonce: None,
            state: None,
            id_token_issuers: Vec::new(),
            id_token_configuration: HashMap::new(),
            trusted_issuers: HashMap::new(),
            status_check_enabled: false,
            http_timeout: Duration::from_secs(10),
            clock_skew: Duration::from_secs(300),
            additional_validators: Vec::new(),
            replacement_validators: None,
        }
    }
}

impl ValidatorBuilder {
    /// Build the validator. Configuration is immutable from here on.
    pub fn build(self) -> Result<Validator> {
        let Some(resolver) = self.resolver else {
            bail!("a DID resolver is required, see `with_resolver`")
        };
        let resolver: Arc<dyn DidResolver> = Arc::new(CachingResolver::new(resolver));

        let http_client: Arc<dyn AsyncHttpClient> = match self.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new()?),
        };

        let Some(audience) = self.audience else {
            bail!("an audience is required, see `with_audience`")
        };

        let skew = self.clock_skew.as_secs() as i64;

        let mut validators: HashMap<TokenType, Box<dyn TokenValidator>> = HashMap::new();
        if let Some(replacements) = self.replacement_validators {
            for validator in replacements {
                validators.insert(validator.is_type(), validator);
            }
        } else {
            let expected_siop = ExpectedSiop {
                audience: audience.clone(),
                nonce: self.nonce,
                state: self.state,
            };
            for flavour in [
                TokenType::SiopIssuance,
                TokenType::SiopPresentationAttestation,
                TokenType::SiopPresentationExchange,
            ] {
                validators.insert(
                    flavour,
                    Box::new(SiopValidator::new(
                        flavour,
                        Arc::clone(&resolver),
                        expected_siop.clone(),
                        skew,
                    )),
                );
            }
            validators.insert(
                TokenType::IdToken,
                Box::new(IdTokenValidator::new(
                    Arc::clone(&http_client),
                    ExpectedIdToken {
                        audience,
                        issuers: self.id_token_issuers,
                        configuration: self.id_token_configuration,
                    },
                    self.http_timeout,
                    skew,
                )),
            );
            validators.insert(
                TokenType::VerifiableCredential,
                Box::new(VerifiableCredentialValidator::new(
                    Arc::clone(&resolver),
                    ExpectedVerifiableCredential {
                        did_issuers: self.trusted_issuers,
                    },
                    skew,
                )),
            );
            validators.insert(
                TokenType::VerifiablePresentation,
                Box::new(VerifiablePresentationValidator::new(
                    Arc::clone(&resolver),
                    ExpectedVerifiablePresentation {
                        did_audience: self.did.clone(),
                    },
                    skew,
                )),
            );
            validators.insert(TokenType::SelfIssued, Box::new(SelfIssuedValidator::new()));
        }
        for validator in self.additional_validators {
            validators.insert(validator.is_type(), validator);
        }

        Ok(Validator {
            resolver,
            http_client,
            validators,
            status_check_enabled: self.status_check_enabled,
            signer: self.signer,
            did: self.did,
            signing_key_reference: self.signing_key_reference,
            http_timeout: self.http_timeout,
        })
    }

    /// Set the resolver used to turn DIDs into DID documents. Resolutions
    /// are cached for the lifetime of the validator.
    pub fn with_resolver(mut self, resolver: Arc<dyn DidResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the HTTP client used for discovery, JWKS and status requests.
    pub fn with_http_client(mut self, client: Arc<dyn AsyncHttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the signer used for status-request envelopes.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Set the verifier's own DID. Presentations must be addressed to it,
    /// and status requests are signed on its behalf.
    pub fn with_did(mut self, did: impl Into<String>) -> Self {
        self.did = Some(did.into());
        self
    }

    /// Set the key reference appended to the DID in the status-request
    /// `kid`.
    pub fn with_signing_key_reference(mut self, reference: impl Into<String>) -> Self {
        self.signing_key_reference = Some(reference.into());
        self
    }

    /// Set the audience the SIOP and id-tokens must be addressed to.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Require the SIOP to echo this nonce.
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Require the SIOP to echo this state.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set the OpenID Connect discovery endpoints id-tokens may be
    /// validated against.
    pub fn with_id_token_issuers(mut self, issuers: Vec<String>) -> Self {
        self.id_token_issuers = issuers;
        self
    }

    /// Map an issuer name to its discovery endpoint.
    pub fn with_id_token_configuration(mut self, issuer: impl Into<String>, url: Url) -> Self {
        self.id_token_configuration.insert(issuer.into(), url);
        self
    }

    /// Trust the given issuer DIDs for credentials of the given contract.
    pub fn with_trusted_issuers(
        mut self,
        contract: impl Into<String>,
        issuers: impl IntoIterator<Item = String>,
    ) -> Self {
        self.trusted_issuers.insert(contract.into(), issuers.into_iter().collect());
        self
    }

    /// Enable the credential-status sub-protocol.
    pub fn with_status_check(mut self, enabled: bool) -> Self {
        self.status_check_enabled = enabled;
        self
    }

    /// Set the per-request network timeout (default 10 seconds).
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the tolerated clock skew for time-based claims (default 5
    /// minutes).
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Add a validator, overriding the default for its type.
    pub fn with_validator(mut self, validator: Box<dyn TokenValidator>) -> Self {
        self.additional_validators.push(validator);
        self
    }

    /// Replace the whole registry. Token types without a validator are
    /// reported as misconfigured when they appear.
    pub fn with_validators(mut self, validators: Vec<Box<dyn TokenValidator>>) -> Self {
        self.replacement_validators = Some(validators);
        self
    }
}
