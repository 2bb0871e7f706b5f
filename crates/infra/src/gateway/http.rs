//! `reqwest` implementation of [`DeletionGateway`].

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{DeleteFilesRequest, DeleteFilesResponse, DeletionGateway, GatewayError, TokenSigner};

#[derive(Debug, Clone)]
pub struct HttpDeletionGateway {
    client: reqwest::Client,
    endpoint: String,
    signer: TokenSigner,
}

impl HttpDeletionGateway {
    pub fn new(endpoint: impl Into<String>, signer: TokenSigner) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, signer)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>, signer: TokenSigner) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            signer,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DeletionGateway for HttpDeletionGateway {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, files = network_file_ids.len()), err)]
    async fn delete_files(&self, network_file_ids: &[String]) -> Result<DeleteFilesResponse, GatewayError> {
        let token = self.signer.sign()?;
        let body = DeleteFilesRequest {
            files: network_file_ids.to_vec(),
        };

        let response = self
            .client
            .delete(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DeleteFilesResponse = response.json().await?;
        debug!(
            confirmed = parsed.confirmed().len(),
            not_confirmed = parsed.not_confirmed().len(),
            "gateway answered"
        );
        Ok(parsed)
    }
}
