use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Body of `POST /predict`, forwarded to the worker subprocess verbatim.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub instances: Vec<serde_json::Value>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl PredictRequest {
    /// `parameters.model`, the target model name. Missing or non-string is
    /// surfaced to the caller as 400 per spec §6/§7.
    pub fn model(&self) -> Option<&str> {
        self.parameters.get("model")?.as_str()
    }

    /// `parameters.priority`, default 1 per spec §6.
    pub fn priority(&self) -> i64 {
        self.parameters
            .get("priority")
            .and_then(|v| v.as_i64())
            .unwrap_or(1)
    }
}

/// Body of `POST /model-ready`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelReadyRequest {
    pub worker_id: String,
}
