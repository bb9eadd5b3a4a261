//! Claim tokens are the unit of work of the validation engine: a decoded
//! compact JWS classified by the shape of its payload.

use std::fmt;

use anyhow::{bail, Result};
use serde_json::{Map, Value as Json};
use serde_json_path::JsonPath;

use crate::core::jws;

/// The `iss` value a wallet uses to mark a token as self-issued.
pub const SELF_ISSUED_ISSUER: &str = "https://self-issued.me";

/// The classification of a token, derived from its payload shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Unsigned bundle of claims asserted by the wallet itself.
    SelfIssued,
    /// OpenID Connect id-token from a third-party provider.
    IdToken,
    /// SIOP requesting credential issuance (carries a `contract`).
    SiopIssuance,
    /// SIOP presenting attestations (carries `attestations`).
    SiopPresentationAttestation,
    /// SIOP presenting via Presentation Exchange (carries a
    /// `presentation_submission`).
    SiopPresentationExchange,
    /// W3C verifiable presentation.
    VerifiablePresentation,
    /// W3C verifiable credential.
    VerifiableCredential,
    /// Signed receipt from a credential-status endpoint.
    VerifiablePresentationStatus,
}

impl TokenType {
    /// The wire name of the type, as it appears in error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SelfIssued => "selfIssued",
            Self::IdToken => "idToken",
            Self::SiopIssuance => "siopIssuance",
            Self::SiopPresentationAttestation => "siopPresentationAttestation",
            Self::SiopPresentationExchange => "siopPresentationExchange",
            Self::VerifiablePresentation => "verifiablePresentation",
            Self::VerifiableCredential => "verifiableCredential",
            Self::VerifiablePresentationStatus => "verifiablePresentationStatus",
        }
    }

    /// Whether this is one of the SIOP envelope flavours.
    pub const fn is_siop(self) -> bool {
        matches!(
            self,
            Self::SiopIssuance | Self::SiopPresentationAttestation | Self::SiopPresentationExchange
        )
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded, classified token. Immutable after construction.
#[derive(Clone, Debug)]
pub struct ClaimToken {
    token_type: TokenType,
    raw: String,
    header: Map<String, Json>,
    payload: Map<String, Json>,
    signed: bool,
    configuration: Option<String>,
}

impl ClaimToken {
    /// Decode a compact JWS and classify it by payload shape.
    pub fn from_compact_jws(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() < 2 {
            bail!("the token is not a valid compact JWS");
        }
        let header = jws::decode_part(parts[0])?;
        let payload = jws::decode_part(parts[1])?;
        let signed = parts.len() > 2 && !parts[2].trim().is_empty();
        let token_type = classify(&payload, signed)?;

        Ok(Self {
            token_type,
            raw: raw.to_owned(),
            header,
            payload,
            signed,
            configuration: None,
        })
    }

    /// Decode an id-token that carries an OpenID Connect discovery pointer.
    pub fn with_configuration(raw: &str, configuration: &str) -> Result<Self> {
        let mut token = Self::from_compact_jws(raw)?;
        token.configuration = Some(configuration.to_owned());
        Ok(token)
    }

    /// Wrap a bare claims object as a self-issued token.
    pub fn self_issued(claims: Map<String, Json>) -> Self {
        Self {
            token_type: TokenType::SelfIssued,
            raw: String::new(),
            header: Map::new(),
            payload: claims,
            signed: false,
            configuration: None,
        }
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &Map<String, Json> {
        &self.header
    }

    pub fn payload(&self) -> &Map<String, Json> {
        &self.payload
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// The OpenID Connect discovery URL, for id-tokens that carry one.
    pub fn configuration(&self) -> Option<&str> {
        self.configuration.as_deref()
    }

    /// Collect the nested tokens of an attestation-flavoured SIOP.
    ///
    /// The reserved `selfIssued` group wraps its claims directly; every
    /// other group must be a map of `{child id -> compact JWS}`. Children
    /// of the `idTokens` group record their map key as the discovery URL.
    pub fn attested_tokens(&self) -> Result<Vec<(String, Self)>> {
        let Some(attestations) = self.payload.get("attestations").and_then(Json::as_object) else {
            bail!("the SIOP does not contain attestations");
        };

        let mut tokens = Vec::new();
        for (group, value) in attestations {
            if group == "selfIssued" {
                let Some(claims) = value.as_object() else {
                    bail!("the selfIssued attestation is not an object");
                };
                tokens.push((group.clone(), Self::self_issued(claims.clone())));
                continue;
            }
            let Some(children) = value.as_object() else {
                bail!("the attestation group '{group}' is not a map of tokens");
            };
            for (child_id, raw) in children {
                let Some(raw) = raw.as_str() else {
                    bail!("the attestation '{child_id}' in group '{group}' is not a string token");
                };
                let token = if group == "idTokens" {
                    Self::with_configuration(raw, child_id)?
                } else {
                    Self::from_compact_jws(raw)?
                };
                tokens.push((child_id.clone(), token));
            }
        }
        Ok(tokens)
    }

    /// Resolve the descriptor-map entries of a presentation-exchange SIOP.
    ///
    /// Each entry's `path` is a JSON-path query over the whole payload that
    /// must locate exactly one string token.
    pub fn exchanged_tokens(&self) -> Result<Vec<(String, Self)>> {
        let payload = Json::Object(self.payload.clone());
        let Some(descriptor_map) = payload
            .pointer("/presentation_submission/descriptor_map")
            .and_then(Json::as_array)
        else {
            bail!("the presentation_submission does not contain a descriptor_map");
        };

        let mut tokens = Vec::new();
        for (index, entry) in descriptor_map.iter().enumerate() {
            let Some(id) = entry.get("id").and_then(Json::as_str) else {
                bail!("the descriptor_map entry {index} has no id property");
            };
            let Some(path) = entry.get("path").and_then(Json::as_str) else {
                bail!("the descriptor_map with id '{id}' does not locate a token. No path property found.");
            };
            let query = JsonPath::parse(path).map_err(|e| {
                anyhow::anyhow!("the path '{path}' of descriptor_map with id '{id}' is not a valid JSON path: {e}")
            })?;
            let nodes = query.query(&payload).all();
            let node = match nodes.len() {
                1 => nodes[0],
                0 => bail!("the path '{path}' of descriptor_map with id '{id}' did not return a token."),
                n => bail!("the path '{path}' of descriptor_map with id '{id}' did not return a single token ({n} matches)."),
            };
            let Some(raw) = node.as_str() else {
                bail!("the path '{path}' of descriptor_map with id '{id}' did not return a string token.");
            };
            tokens.push((id.to_owned(), Self::from_compact_jws(raw)?));
        }
        Ok(tokens)
    }

    /// Collect the per-credential tokens of a status receipt.
    pub fn receipt_tokens(&self) -> Result<Vec<(String, Self)>> {
        let Some(receipt) = self.payload.get("receipt").and_then(Json::as_object) else {
            bail!("the status response does not contain a receipt");
        };

        let mut tokens = Vec::new();
        for (id, raw) in receipt {
            let Some(raw) = raw.as_str() else {
                bail!("the receipt entry '{id}' is not a string token");
            };
            tokens.push((id.clone(), Self::from_compact_jws(raw)?));
        }
        Ok(tokens)
    }
}

// Payload-shape dispatch, evaluated in order.
fn classify(payload: &Map<String, Json>, signed: bool) -> Result<TokenType> {
    if payload.get("iss").and_then(Json::as_str) == Some(SELF_ISSUED_ISSUER) {
        if payload.contains_key("contract") {
            return Ok(TokenType::SiopIssuance);
        }
        if payload.contains_key("presentation_submission") {
            return Ok(TokenType::SiopPresentationExchange);
        }
        if payload.contains_key("attestations") {
            return Ok(TokenType::SiopPresentationAttestation);
        }
        bail!("SIOP was not recognized.");
    }
    if payload.contains_key("vc") {
        return Ok(TokenType::VerifiableCredential);
    }
    if payload.contains_key("vp") {
        return Ok(TokenType::VerifiablePresentation);
    }
    if payload.contains_key("receipt") {
        return Ok(TokenType::VerifiablePresentationStatus);
    }
    if signed {
        return Ok(TokenType::IdToken);
    }
    Ok(TokenType::SelfIssued)
}
