use crate::core::rule_engine::{Classification, Criterion};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesQuery {
    pub library_id: Option<String>,
}

/// Request body for a pushdown preview
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub library_id: String,
    pub criteria: Vec<Criterion>,
    pub limit: Option<usize>,
}

/// Request body for request-time classification
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub metadata: Value,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl From<Option<Classification>> for ClassifyResponse {
    fn from(classification: Option<Classification>) -> Self {
        Self {
            matched: classification.is_some(),
            classification,
        }
    }
}
