use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub script: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ExecuteResponse {
    pub result: Map<String, Value>,
    pub stdout: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}
