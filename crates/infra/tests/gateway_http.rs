use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::delete;
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Value, json};

use sweeper_infra::gateway::token::GatewayClaims;
use sweeper_infra::gateway::{
    DeleteFilesRequest, DeletionGateway, GatewayError, HttpDeletionGateway, TokenSigner,
};

const PRIVATE_PEM: &str = include_str!("fixtures/gateway_rsa.pem");
const PUBLIC_PEM: &str = include_str!("fixtures/gateway_rsa.pub.pem");

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let app = Router::new()
            .route("/v1/files", delete(delete_files))
            .with_state(DecodingKey::from_rsa_pem(PUBLIC_PEM.as_bytes()).unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/files", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Confirms every id except those starting with `missing-`.
async fn delete_files(
    State(key): State<DecodingKey>,
    headers: HeaderMap,
    Json(body): Json<DeleteFilesRequest>,
) -> Result<Json<Value>, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = jsonwebtoken::decode::<GatewayClaims>(token, &key, &Validation::new(Algorithm::RS256))
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .claims;
    if claims.exp - claims.iat != 300 {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let (not_confirmed, confirmed): (Vec<String>, Vec<String>) =
        body.files.into_iter().partition(|id| id.starts_with("missing-"));
    Ok(Json(json!({
        "message": { "confirmed": confirmed, "notConfirmed": not_confirmed }
    })))
}

fn signer() -> TokenSigner {
    TokenSigner::from_base64_pem(&STANDARD.encode(PRIVATE_PEM)).unwrap()
}

#[tokio::test]
async fn gateway_reports_confirmed_and_unconfirmed_ids() {
    let server = TestServer::spawn().await;
    let gateway = HttpDeletionGateway::new(server.endpoint(), signer());

    let response = gateway
        .delete_files(&["net-a".to_string(), "missing-b".to_string(), "net-c".to_string()])
        .await
        .unwrap();

    assert_eq!(response.confirmed(), ["net-a".to_string(), "net-c".to_string()]);
    assert_eq!(response.not_confirmed(), ["missing-b".to_string()]);
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = TestServer::spawn().await;
    let gateway = HttpDeletionGateway::new(format!("{}/v2/unknown", server.base_url), signer());

    let err = gateway.delete_files(&["net-a".to_string()]).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 404, .. }));
}

#[tokio::test]
async fn tokens_signed_with_another_key_are_refused() {
    let server = TestServer::spawn().await;
    let other = TokenSigner::from_pem(include_bytes!("fixtures/other_rsa.pem")).unwrap();
    let gateway = HttpDeletionGateway::new(server.endpoint(), other);

    let err = gateway.delete_files(&["net-a".to_string()]).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 401, .. }));
}
