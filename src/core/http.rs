//! The HTTP seam used for OpenID Connect discovery, JWKS retrieval and
//! credential-status checks.

use std::fmt::Debug;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use http::{Request, Response};

/// An asynchronous HTTP client the engine can drive without caring about
/// the underlying implementation.
#[async_trait]
pub trait AsyncHttpClient: Debug + Send + Sync {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}

/// Execute a request with a hard deadline. Timeouts fail the whole call,
/// naming the URL.
pub async fn execute_with_timeout(
    client: &dyn AsyncHttpClient,
    request: Request<Vec<u8>>,
    timeout: Duration,
) -> Result<Response<Vec<u8>>> {
    let url = request.uri().to_string();
    tokio::time::timeout(timeout, client.execute(request))
        .await
        .map_err(|_| anyhow!("the request to '{url}' timed out"))?
}

/// [`AsyncHttpClient`] backed by [`reqwest`].
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("unable to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let (parts, body) = request.into_parts();
        let url = parts.uri.to_string();

        let mut builder = self.client.request(parts.method, &url);
        for (name, value) in &parts.headers {
            builder = builder.header(name, value.clone());
        }

        let response = builder
            .body(body)
            .send()
            .await
            .with_context(|| format!("failed to execute request to '{url}'"))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read response body from '{url}'"))?;

        match Response::builder().status(status).body(body.to_vec()) {
            Ok(response) => Ok(response),
            Err(e) => bail!("failed to convert response from '{url}': {e}"),
        }
    }
}
