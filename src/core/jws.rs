//! Compact JWS (`header.payload.signature`, base64url) encoding and
//! verification, plus the standard registered-claim checks shared by the
//! token validators.

use anyhow::{anyhow, bail, Result};
use base64::prelude::*;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::core::jwk::{Curve, PublicKeyJwk};
use crate::validator::request_signer::RequestSigner;

/// Base64url-decode and JSON-parse one segment of a compact JWS.
pub fn decode_part(segment: &str) -> Result<Map<String, Json>> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| anyhow!("token segment is not valid base64url: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| anyhow!("token segment is not valid JSON: {e}"))
}

/// Serialize the header and claims and sign, returning a compact JWS.
pub async fn encode<S: RequestSigner + ?Sized>(
    header: &Json,
    claims: &impl Serialize,
    signer: &S,
) -> Result<String> {
    let header_b64 = serde_json::to_vec(header).map(|b| BASE64_URL_SAFE_NO_PAD.encode(b))?;
    let claims_b64 = serde_json::to_vec(claims).map(|b| BASE64_URL_SAFE_NO_PAD.encode(b))?;
    let payload = [header_b64.as_bytes(), b".", claims_b64.as_bytes()].concat();
    let signature = signer.sign(&payload).await;
    let signature_b64 = BASE64_URL_SAFE_NO_PAD.encode(signature);
    Ok(format!("{header_b64}.{claims_b64}.{signature_b64}"))
}

/// Verify the signature of a compact JWS against the given public key.
pub fn verify_compact(token: &str, jwk: &PublicKeyJwk) -> Result<()> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts[2].trim().is_empty() {
        bail!("the token does not carry a signature");
    }
    let signature = BASE64_URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|e| anyhow!("the token signature is not valid base64url: {e}"))?;
    let message = format!("{}.{}", parts[0], parts[1]);
    verify(jwk, message.as_bytes(), &signature)
}

/// Verify a signature over `msg` using the JWK, dispatching on its curve.
pub fn verify(jwk: &PublicKeyJwk, msg: &[u8], sig: &[u8]) -> Result<()> {
    match jwk.crv {
        Curve::Ed25519 => verify_eddsa(jwk, msg, sig),
        Curve::P256 => verify_es256(jwk, msg, sig),
        Curve::Es256K => verify_es256k(jwk, msg, sig),
    }
}

fn verify_eddsa(jwk: &PublicKeyJwk, msg: &[u8], sig: &[u8]) -> Result<()> {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let x = BASE64_URL_SAFE_NO_PAD
        .decode(&jwk.x)
        .map_err(|e| anyhow!("unable to base64 decode JWK 'x': {e}"))?;
    let bytes = &x.try_into().map_err(|_| anyhow!("invalid public key length"))?;
    let verifying_key =
        VerifyingKey::from_bytes(bytes).map_err(|e| anyhow!("unable to build verifying key: {e}"))?;
    let signature =
        Signature::from_slice(sig).map_err(|e| anyhow!("unable to build signature: {e}"))?;

    verifying_key
        .verify(msg, &signature)
        .map_err(|e| anyhow!("signature verification failed: {e}"))
}

fn verify_es256(jwk: &PublicKeyJwk, msg: &[u8], sig: &[u8]) -> Result<()> {
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    let verifying_key = VerifyingKey::from_sec1_bytes(&sec1_bytes(jwk)?)
        .map_err(|e| anyhow!("unable to build verifying key: {e}"))?;
    let signature =
        Signature::from_slice(sig).map_err(|e| anyhow!("unable to build signature: {e}"))?;

    verifying_key
        .verify(msg, &signature)
        .map_err(|e| anyhow!("signature verification failed: {e}"))
}

fn verify_es256k(jwk: &PublicKeyJwk, msg: &[u8], sig: &[u8]) -> Result<()> {
    use k256::ecdsa::signature::Verifier;
    use k256::ecdsa::{Signature, VerifyingKey};

    let verifying_key = VerifyingKey::from_sec1_bytes(&sec1_bytes(jwk)?)
        .map_err(|e| anyhow!("unable to build verifying key: {e}"))?;
    let signature =
        Signature::from_slice(sig).map_err(|e| anyhow!("unable to build signature: {e}"))?;
    let normalized = signature.normalize_s().unwrap_or(signature);

    verifying_key
        .verify(msg, &normalized)
        .map_err(|e| anyhow!("signature verification failed: {e}"))
}

// Rebuild the uncompressed SEC1 point from the JWK coordinates.
fn sec1_bytes(jwk: &PublicKeyJwk) -> Result<Vec<u8>> {
    let y = jwk.y.as_ref().ok_or_else(|| anyhow!("JWK 'y' is missing"))?;
    let mut sec1 = vec![0x04];
    sec1.append(
        &mut BASE64_URL_SAFE_NO_PAD
            .decode(&jwk.x)
            .map_err(|e| anyhow!("unable to base64 decode JWK 'x': {e}"))?,
    );
    sec1.append(
        &mut BASE64_URL_SAFE_NO_PAD
            .decode(y)
            .map_err(|e| anyhow!("unable to base64 decode JWK 'y': {e}"))?,
    );
    Ok(sec1)
}

/// Check the `exp` claim. `required` controls whether a missing claim is an
/// error; `skew_secs` is the tolerated clock skew.
pub fn check_expiry(payload: &Map<String, Json>, required: bool, skew_secs: i64) -> Result<()> {
    let Some(exp) = payload.get("exp") else {
        if required {
            bail!("the token has no 'exp' claim");
        }
        return Ok(());
    };
    let Some(exp) = exp.as_i64() else {
        bail!("the token 'exp' claim is not a number");
    };
    let now = Utc::now().timestamp();
    if exp + skew_secs < now {
        bail!("the token expired at {exp} (current time {now})");
    }
    Ok(())
}

/// Check the `nbf` claim when present.
pub fn check_not_before(payload: &Map<String, Json>, skew_secs: i64) -> Result<()> {
    let Some(nbf) = payload.get("nbf") else {
        return Ok(());
    };
    let Some(nbf) = nbf.as_i64() else {
        bail!("the token 'nbf' claim is not a number");
    };
    let now = Utc::now().timestamp();
    if nbf > now + skew_secs {
        bail!("the token is not valid before {nbf} (current time {now})");
    }
    Ok(())
}

/// Check that the `aud` claim equals the expected audience, either directly
/// or as a member of an audience array.
pub fn check_audience(payload: &Map<String, Json>, expected: &str) -> Result<()> {
    match payload.get("aud") {
        Some(Json::String(aud)) => {
            if aud != expected {
                bail!("expected audience '{expected}' does not match the token audience '{aud}'");
            }
            Ok(())
        }
        Some(Json::Array(auds)) => {
            if !auds.iter().any(|aud| aud.as_str() == Some(expected)) {
                bail!("expected audience '{expected}' is not among the token audiences");
            }
            Ok(())
        }
        Some(_) => bail!("the token 'aud' claim is not a string or array"),
        None => bail!("the token has no 'aud' claim"),
    }
}
