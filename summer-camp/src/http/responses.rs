use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use crate::auth::Role;
use crate::records::{without_id, Document};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ClassQuery {
    pub email: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct IntentRequest {
    pub price: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

/// Accepts only JSON objects and drops any client-supplied `_id`.
pub fn object_body(body: Value) -> Result<Document, ApiError> {
    match body {
        Value::Object(map) => Ok(without_id(map)),
        _ => Err(ApiError::InvalidBody),
    }
}
