/// Axum routes and handlers for the wallet fabric HTTP surface
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use super::types::*;
use crate::errors::WalletError;
use crate::fabric::WalletFabric;

pub fn create_router(fabric: WalletFabric) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/init", post(init))
        .route("/addresses/preview", post(preview_addresses))
        .route("/addresses/mint", post(mint_addresses))
        .route("/wallets/generate", post(generate_wallets))
        .route("/sync", post(sync_balances))
        .with_state(fabric)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(fabric: WalletFabric, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Wallet fabric listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(fabric)).await?;
    Ok(())
}

/// Error returned by every handler; rendered as `{"ok": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError(WalletError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            err if err.is_invalid_input() => StatusCode::BAD_REQUEST,
            WalletError::AllocationConflict(_) | WalletError::NotInitialized => StatusCode::CONFLICT,
            WalletError::EscrowUnavailable(_)
            | WalletError::NetworkError(_)
            | WalletError::PersistenceFailure(_)
            | WalletError::StorageError(_) => StatusCode::SERVICE_UNAVAILABLE,
            WalletError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", status, self.0);
        } else {
            log::warn!("Request rejected ({}): {}", status, self.0);
        }

        let body = ErrorResponse {
            ok: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Decode a JSON body; an empty body means "all defaults".
fn parse_body<T>(body: &Bytes) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError(WalletError::ValidationError(format!(
            "Invalid request body: {}",
            e
        )))
    })
}

/// GET /health
pub async fn health(State(fabric): State<WalletFabric>) -> (StatusCode, Json<HealthResponse>) {
    let report = fabric.health().await;
    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// POST /init
pub async fn init(
    State(fabric): State<WalletFabric>,
    body: Bytes,
) -> Result<Json<InitResponse>, ApiError> {
    let request: InitRequest = parse_body(&body)?;
    Ok(Json(fabric.init(request.mnemonic.as_deref()).await?))
}

/// POST /addresses/preview
pub async fn preview_addresses(
    State(fabric): State<WalletFabric>,
    body: Bytes,
) -> Result<Json<PreviewResponse>, ApiError> {
    let request: PreviewRequest = parse_body(&body)?;
    Ok(Json(
        fabric.preview(request.start_index, request.count).await?,
    ))
}

/// POST /addresses/mint
pub async fn mint_addresses(
    State(fabric): State<WalletFabric>,
    body: Bytes,
) -> Result<Json<MintResponse>, ApiError> {
    let request: MintRequest = parse_body(&body)?;
    Ok(Json(
        fabric.mint(request.count, request.label.as_deref()).await?,
    ))
}

/// POST /wallets/generate
pub async fn generate_wallets(
    State(fabric): State<WalletFabric>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request: GenerateRequest = parse_body(&body)?;
    Ok(Json(
        fabric
            .generate(request.count, request.label.as_deref(), request.shadows)
            .await?,
    ))
}

/// POST /sync
pub async fn sync_balances(
    State(fabric): State<WalletFabric>,
    body: Bytes,
) -> Result<Json<SyncResponse>, ApiError> {
    let request: SyncRequest = parse_body(&body)?;
    Ok(Json(
        fabric
            .sync(request.chain, request.run_mode, request.limit)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (WalletError::InvalidMnemonic("x".into()), StatusCode::BAD_REQUEST),
            (WalletError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (WalletError::AllocationConflict("x".into()), StatusCode::CONFLICT),
            (WalletError::NotInitialized, StatusCode::CONFLICT),
            (WalletError::EscrowUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (WalletError::PersistenceFailure("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (WalletError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (WalletError::CryptoError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn error_body_carries_the_message() {
        let response = ApiError::from(WalletError::ValidationError("count too large".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.ok);
        assert!(body.error.contains("count too large"));
    }

    #[test]
    fn empty_body_uses_defaults() {
        let request: MintRequest = parse_body(&Bytes::new()).unwrap();
        assert_eq!(request.count, 1);

        let request: PreviewRequest = parse_body(&Bytes::from_static(b"{\"count\":2}")).unwrap();
        assert_eq!((request.start_index, request.count), (0, 2));

        let err = parse_body::<SyncRequest>(&Bytes::from_static(b"not json")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        use crate::app_state::FabricContext;
        use crate::config::FabricConfig;
        use crate::escrow::MemorySecretManager;
        use crate::store::MemoryStore;
        use std::sync::Arc;

        let config = FabricConfig::for_tests().unwrap();
        let chain = Arc::new(
            crate::blockchain_client::BlockchainClient::new(
                "http://127.0.0.1:9",
                config.rpc_timeout,
            )
            .unwrap(),
        );
        let context = FabricContext::initialize(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySecretManager::new()),
            chain,
        )
        .unwrap();
        let app = create_router(WalletFabric::new(Arc::new(context)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
