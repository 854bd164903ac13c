// Aggregator - JSON-RPC client for the inclusion-proof endpoint
//
// POST {aggregatorUrl}/proof
// {"jsonrpc":"2.0","method":"getInclusionProof","params":{"stateHash":"<hex>"},"id":<int>}

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::types::InclusionProof;

/// Aggregator errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Anything that can answer "is there a proof for this hash?"
#[async_trait]
pub trait ProofSource: Send + Sync {
    /// `Ok(None)` when the aggregator has no proof (yet); `Err` when the
    /// question could not be asked
    async fn get_inclusion_proof(
        &self,
        state_hash: &str,
    ) -> Result<Option<InclusionProof>, AggregatorError>;
}

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct JsonRpcRequest<P> {
    jsonrpc: &'static str,
    method: &'static str,
    params: P,
    id: u64,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofParams<'a> {
    state_hash: &'a str,
}

/// HTTP client for the aggregator
pub struct AggregatorClient {
    url: String,
    client: Client,
    request_id: AtomicU64,
}

impl AggregatorClient {
    /// Create new client for `base_url` (the `/proof` suffix is added here)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AggregatorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AggregatorError::Network(e.to_string()))?;

        Ok(Self {
            url: format!("{}/proof", base_url.trim_end_matches('/')),
            client,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get next request ID
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Make a JSON-RPC call; a missing `result` decodes as `None`
    async fn call<P: Serialize + Send + Sync, T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<Option<T>, AggregatorError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AggregatorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AggregatorError::Status(response.status().as_u16()));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| AggregatorError::Parse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(AggregatorError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result)
    }
}

#[async_trait]
impl ProofSource for AggregatorClient {
    async fn get_inclusion_proof(
        &self,
        state_hash: &str,
    ) -> Result<Option<InclusionProof>, AggregatorError> {
        debug!("Requesting inclusion proof for {}", state_hash);
        self.call("getInclusionProof", ProofParams { state_hash }).await
    }
}

/// Fetch a proof, folding every failure into "no proof yet"
pub async fn fetch_proof_lenient(
    source: &dyn ProofSource,
    state_hash: &str,
) -> Option<InclusionProof> {
    match source.get_inclusion_proof(state_hash).await {
        Ok(proof) => proof,
        Err(e) => {
            debug!("No proof for {} ({})", state_hash, e);
            None
        }
    }
}
