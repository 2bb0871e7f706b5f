//! Network deletion gateway client.
//!
//! The gateway deletes file contents from the storage network. One call
//! takes a batch of network file ids and reports which deletions it
//! confirmed; only those are considered done.

pub mod http;
pub mod token;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpDeletionGateway;
pub use token::TokenSigner;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to sign gateway token: {0}")]
    Token(String),

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// Request body of `DELETE <endpoint>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFilesRequest {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFilesOutcome {
    #[serde(default)]
    pub confirmed: Vec<String>,
    #[serde(default, rename = "notConfirmed")]
    pub not_confirmed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFilesResponse {
    pub message: DeleteFilesOutcome,
}

impl DeleteFilesResponse {
    pub fn confirmed(&self) -> &[String] {
        &self.message.confirmed
    }

    pub fn not_confirmed(&self) -> &[String] {
        &self.message.not_confirmed
    }
}

#[async_trait]
pub trait DeletionGateway: Send + Sync {
    async fn delete_files(&self, network_file_ids: &[String]) -> Result<DeleteFilesResponse, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_uses_camel_case_not_confirmed() {
        let response: DeleteFilesResponse = serde_json::from_str(
            r#"{"message":{"confirmed":["a"],"notConfirmed":["b","c"]}}"#,
        )
        .unwrap();

        assert_eq!(response.confirmed(), ["a".to_string()]);
        assert_eq!(response.not_confirmed().len(), 2);
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let response: DeleteFilesResponse = serde_json::from_str(r#"{"message":{}}"#).unwrap();
        assert!(response.confirmed().is_empty());
        assert!(response.not_confirmed().is_empty());
    }
}
