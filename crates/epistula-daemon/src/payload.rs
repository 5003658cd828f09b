//! Wire shapes for the ingest path: what a trusted peer submits after
//! fanning a request out to miners.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseStats {
    pub time_to_first_token: f64,
    pub time_for_all_tokens: f64,
    pub total_time: f64,
    pub tps: f64,
    pub tokens: Vec<Value>,
    pub verified: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub organic: Option<bool>,
}

/// One miner's timed response to the fanned-out request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerResponse {
    pub record_id: String,
    pub pubkey: String,
    pub uid: i64,
    pub stats: ResponseStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default)]
    pub messages: Option<Value>,
    #[serde(default)]
    pub prompt: Option<String>,
    pub model: String,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// The originating request as the submitting peer saw it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedRequest {
    pub record_id: String,
    pub block: i64,
    pub endpoint: String,
    pub version: i64,
    pub pubkey: String,
    pub request: InferenceRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    pub responses: Vec<PeerResponse>,
    pub request: SubmittedRequest,
    /// Models the submitting peer currently serves; refreshes the registry.
    pub models: Vec<String>,
}

/// Body of `POST /organics`: which models the scoring consumer wants a
/// batch for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganicsRequest {
    pub models: Vec<String>,
}
