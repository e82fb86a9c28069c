use serde::{Deserialize, Serialize};

/// Request body sent to the Generation Service.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model_id: String,
}

/// Body returned by the Generation Service.
///
/// A successful generation carries `text`; failures carry `error` alongside
/// a non-2xx status. Content-filtered requests come back as a 2xx with no
/// text at all.
#[derive(Deserialize, Debug, Default)]
pub struct ServiceBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub mod client;
pub mod models;
