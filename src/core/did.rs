//! DID documents and the resolver seam. Resolution itself is a
//! collaborator concern; the engine only needs `DID -> document` and a key
//! lookup by `kid`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::jwk::PublicKeyJwk;

/// The subset of a DID document the engine reads: the verification
/// methods exposing public JWKs.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyJwk", skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<PublicKeyJwk>,
}

impl DidDocument {
    /// Find the verification key referenced by a JWS `kid` header. The
    /// `did#` prefix of either side is ignored; fragments are compared.
    pub fn find_key(&self, kid: &str) -> Option<&PublicKeyJwk> {
        let fragment = fragment_of(kid);
        self.verification_method
            .iter()
            .find(|vm| vm.id == kid || fragment_of(&vm.id) == fragment)
            .and_then(|vm| vm.public_key_jwk.as_ref())
    }

    /// The first verification key, for tokens that carry no `kid`.
    pub fn first_key(&self) -> Option<&PublicKeyJwk> {
        self.verification_method.iter().find_map(|vm| vm.public_key_jwk.as_ref())
    }
}

fn fragment_of(id: &str) -> &str {
    id.rsplit_once('#').map_or(id, |(_, fragment)| fragment)
}

/// Maps a DID to its DID document.
#[async_trait]
pub trait DidResolver: Debug + Send + Sync {
    async fn resolve(&self, did: &str) -> Result<DidDocument>;
}

/// A process-wide, append-only cache in front of another resolver.
/// Entries are never evicted.
#[derive(Debug)]
pub struct CachingResolver {
    inner: Arc<dyn DidResolver>,
    cache: Mutex<HashMap<String, DidDocument>>,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn DidResolver>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DidResolver for CachingResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        if let Some(document) = self.cache.lock().await.get(did) {
            return Ok(document.clone());
        }
        let document = self.inner.resolve(did).await?;
        self.cache.lock().await.insert(did.to_owned(), document.clone());
        Ok(document)
    }
}

/// A local in-memory resolver. Not for production use!
///
/// # Warning
/// This resolver only knows the documents registered with it; it is meant
/// for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    documents: HashMap<String, DidDocument>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: DidDocument) {
        self.documents.insert(document.id.clone(), document);
    }
}

#[async_trait]
impl DidResolver for MemoryResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        match self.documents.get(did) {
            Some(document) => Ok(document.clone()),
            None => bail!("DID '{did}' could not be resolved"),
        }
    }
}
