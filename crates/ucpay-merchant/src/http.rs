//! HTTP surface of the merchant service.
//!
//! Handlers are thin translations onto the components in
//! [`MerchantState`]; everything interesting happens in the manager and
//! the agent. Each handler records its serialized response into the
//! request-log capture slot before returning.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use ucpay_core::checkout::{
    CheckoutSessionView, CompleteResponse, CreateSessionRequest, UpdateSessionRequest,
};
use ucpay_core::discovery::DiscoveryDocument;
use ucpay_core::error::{ApiError, ErrorKind};

use crate::catalog::{Catalog, UcpSearchResponse};
use crate::config::MerchantConfig;
use crate::credentials::{CredentialRegistry, RegisterCredentialRequest};
use crate::manager::CheckoutManager;
use crate::recorder::{record_requests, RequestLogStore, ResponseCapture};

/// Shared state behind every merchant handler.
pub struct MerchantState {
    /// Service configuration.
    pub config: MerchantConfig,
    /// Product catalog.
    pub catalog: Arc<Catalog>,
    /// Checkout session manager.
    pub manager: CheckoutManager,
    /// Device credential registry.
    pub credentials: Arc<CredentialRegistry>,
    /// Request-log store.
    pub logs: Arc<RequestLogStore>,
}

/// Builds the merchant router with the request-log recorder installed.
pub fn router(state: Arc<MerchantState>) -> Router {
    let logs = Arc::clone(&state.logs);
    Router::new()
        .route("/.well-known/ucp", get(discovery))
        .route("/ucp/products/search", get(search_products))
        .route("/ucp/v1/checkout-sessions", post(create_session))
        .route("/ucp/v1/checkout-sessions/{session_id}", get(get_session))
        .route("/ucp/v1/checkout-sessions/{session_id}", put(update_session))
        .route(
            "/ucp/v1/checkout-sessions/{session_id}/complete",
            post(complete_session),
        )
        .route("/ap2/credentials/register", post(register_credential))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(logs, record_requests))
        .with_state(state)
}

async fn discovery(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
) -> Json<DiscoveryDocument> {
    let document = DiscoveryDocument::for_merchant(
        &state.config.merchant_id,
        &state.config.merchant_name,
        &state.config.merchant_url,
    );
    capture.record(&document);
    Json(document)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

const fn default_limit() -> usize {
    10
}

async fn search_products(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
    Query(params): Query<SearchParams>,
) -> Json<UcpSearchResponse> {
    let response = state.catalog.search(params.q.as_deref(), params.limit);
    capture.record(&response);
    Json(response)
}

async fn create_session(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CheckoutSessionView>), ApiError> {
    let view = state.manager.create(&request)?;
    capture.record(&view);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_session(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
    Path(session_id): Path<String>,
) -> Result<Json<CheckoutSessionView>, ApiError> {
    let view = state.manager.get(&session_id)?;
    capture.record(&view);
    Ok(Json(view))
}

async fn update_session(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
    Path(session_id): Path<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> Result<Json<CheckoutSessionView>, ApiError> {
    let view = state.manager.update(&session_id, request).await?;
    capture.record(&view);
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    otp_code: Option<String>,
}

async fn complete_session(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
    Path(session_id): Path<String>,
    Query(params): Query<CompleteParams>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let response = state
        .manager
        .complete(&session_id, params.otp_code.as_deref())
        .await?;
    capture.record(&response);
    Ok(Json(response))
}

async fn register_credential(
    State(state): State<Arc<MerchantState>>,
    Extension(capture): Extension<ResponseCapture>,
    Json(request): Json<RegisterCredentialRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .credentials
        .register(&request)
        .map_err(|e| ApiError::new(ErrorKind::InvalidInput, e.to_string()))?;

    tracing::info!(payer_email = %request.payer_email, "device credential registered");
    let body = json!({"registered": true, "payer_email": request.payer_email});
    capture.record(&body);
    Ok((StatusCode::CREATED, Json(body)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "ucpay-merchant",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }))
}

#[cfg(test)]
mod tests {
    use ucpay_core::checkout::LineItem;

    use super::*;
    use crate::agent::{AgentConfig, MerchantAgent};
    use crate::challenge::ChallengeStore;
    use crate::signer::ReceiptSigner;
    use crate::store::InMemorySessionStore;

    fn test_state() -> Arc<MerchantState> {
        let config = MerchantConfig::default();
        let catalog = Arc::new(Catalog::seeded());
        let credentials = Arc::new(CredentialRegistry::new());
        let agent = MerchantAgent::new(
            AgentConfig {
                merchant_id: config.merchant_id.clone(),
                step_up_enabled: config.step_up_enabled,
                amount_threshold: config.otp_amount_threshold,
                threshold_small: config.threshold_small,
                threshold_large: config.threshold_large,
            },
            Arc::clone(&credentials),
            ReceiptSigner::disabled(),
        );
        let manager = CheckoutManager::new(
            Arc::new(InMemorySessionStore::new()),
            agent,
            ChallengeStore::new(true),
            Some(Arc::clone(&catalog)),
        );
        Arc::new(MerchantState {
            config,
            catalog,
            manager,
            credentials,
            logs: Arc::new(RequestLogStore::default()),
        })
    }

    #[tokio::test]
    async fn test_discovery_handler() {
        let state = test_state();
        let Json(document) = discovery(State(state), Extension(ResponseCapture::default())).await;
        assert!(document.supports_ap2_checkout());
        assert_eq!(document.merchant.id, "merchant-001");
    }

    #[tokio::test]
    async fn test_search_handler() {
        let state = test_state();
        let Json(response) = search_products(
            State(state),
            Extension(ResponseCapture::default()),
            Query(SearchParams {
                q: Some("cookies".into()),
                limit: 10,
            }),
        )
        .await;
        assert_eq!(response.total, 2);
    }

    #[tokio::test]
    async fn test_create_then_get_session() {
        let state = test_state();
        let request = CreateSessionRequest {
            line_items: vec![LineItem {
                sku: "PROD-001".into(),
                name: "Chocochip Cookies".into(),
                quantity: 2,
                unit_price: 4.99,
            }],
            buyer_email: "a@example.com".into(),
            currency: "SGD".into(),
        };

        let (status, Json(view)) = create_session(
            State(Arc::clone(&state)),
            Extension(ResponseCapture::default()),
            Json(request),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view.totals.total, 9.98);

        let Json(fetched) = get_session(
            State(state),
            Extension(ResponseCapture::default()),
            Path(view.id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(fetched.id, view.id);
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let state = test_state();
        let result = get_session(
            State(state),
            Extension(ResponseCapture::default()),
            Path("cs_missing".into()),
        )
        .await;
        assert!(matches!(
            result,
            Err(ApiError {
                error_kind: ErrorKind::NotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_register_credential_rejects_bad_key() {
        let state = test_state();
        let result = register_credential(
            State(state),
            Extension(ResponseCapture::default()),
            Json(RegisterCredentialRequest {
                payer_email: "a@example.com".into(),
                credential_id: "cred".into(),
                public_key: "dG9vLXNob3J0".into(),
            }),
        )
        .await;
        assert!(result.is_err());
    }
}
