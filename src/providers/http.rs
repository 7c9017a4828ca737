//! HTTP client for the attestation service API.

use alloy_primitives::{Bytes, FixedBytes};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::error::{BridgeError, Result};
use crate::protocol::{
    Attestation, Domain, HealthResponse, ReadyAttestations, ServiceStats, SignatureOutcome,
};
use crate::traits::AttestationSource;

/// Client for a remote attestation service.
///
/// Relayers use it as their [`AttestationSource`]; remote attesters use
/// [`submit_signature`](Self::submit_signature) to push signatures.
///
/// # Examples
///
/// ```rust,no_run
/// use attestation_bridge::providers::HttpAttestationClient;
/// use attestation_bridge::AttestationSource;
///
/// # async fn example() -> Result<(), attestation_bridge::BridgeError> {
/// let client = HttpAttestationClient::new("http://localhost:8080".parse()?);
/// let ready = client.ready_attestations().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpAttestationClient {
    base_url: Url,
    client: Client,
}

impl HttpAttestationClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    /// Uses a client whose requests give up after `timeout`
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Fetches an attestation by message hash, `None` on 404
    #[instrument(skip(self), fields(message_hash = %message_hash))]
    pub async fn attestation(&self, message_hash: FixedBytes<32>) -> Result<Option<Attestation>> {
        let url = self.url(&format!("attestation/{message_hash}"))?;
        self.get_optional(url).await
    }

    /// Fetches an attestation by source domain and nonce, `None` on 404
    #[instrument(skip(self))]
    pub async fn attestation_by_nonce(
        &self,
        source_domain: Domain,
        nonce: u64,
    ) -> Result<Option<Attestation>> {
        let url = self.url(&format!("attestation/{source_domain}/{nonce}"))?;
        self.get_optional(url).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url("health")?).send().await?;
        parse(response).await
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        let response = self.client.get(self.url("stats")?).send().await?;
        parse(response).await
    }

    /// Pushes one attester signature to the service
    #[instrument(skip(self, signature), fields(message_hash = %message_hash))]
    pub async fn submit_signature(
        &self,
        message_hash: FixedBytes<32>,
        signature: Bytes,
    ) -> Result<SignatureOutcome> {
        let url = self.url(&format!("attestation/{message_hash}/signatures"))?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "signature": signature }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BridgeError::AttestationNotFound(message_hash));
        }
        parse(response).await
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        trace!(url = %url, "Requesting attestation service");
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Attestation not found");
            return Ok(None);
        }
        parse(response).await.map(Some)
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    trace!(status_code = %status, "Received response from attestation service");

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        debug!(retry_after_seconds = retry_after, "Rate limit exceeded");
        return Err(BridgeError::Provider(format!(
            "rate limited, retry after {retry_after}s"
        )));
    }

    response.error_for_status_ref()?;
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl AttestationSource for HttpAttestationClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn ready_attestations(&self) -> Result<Vec<Attestation>> {
        let response = self
            .client
            .get(self.url("attestations/ready")?)
            .send()
            .await?;
        let ready: ReadyAttestations = parse(response).await?;
        debug!(count = ready.count, "Fetched ready attestations");
        Ok(ready.attestations)
    }
}
