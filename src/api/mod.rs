//! HTTP surface: upload, ledger lookups, history and runtime config.

pub mod handlers;

use axum::extract::multipart::MultipartError;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::{ErrorBody, ErrorKind, PipelineError};
use crate::ledger::LedgerError;
use crate::state::AppState;

/// Header carrying the admin token for config and revocation endpoints.
pub const ADMIN_HEADER: &str = "x-admin-token";

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/verify", post(handlers::verify))
        .route("/api/documents/:fingerprint", get(handlers::document))
        .route("/api/documents/:fingerprint/certificate", get(handlers::certificate))
        .route("/api/documents/:fingerprint/revoke", post(handlers::revoke))
        .route("/api/history/:owner", get(handlers::history))
        .route("/api/notaries/:address/documents", get(handlers::documents_by_notary))
        .route("/api/networks", get(handlers::networks))
        .route("/api/networks/current", put(handlers::select_network))
        .route("/api/config", get(handlers::get_config).put(handlers::put_config))
        .route("/api/reconciliation", get(handlers::pending_reconciliation))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Error response: `{success: false, error: {kind, message, txHash?}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: ErrorKind::InputError,
                message: message.into(),
                tx_hash: None,
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            ..Self::input(message)
        }
    }

    pub fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            ..Self::input("admin token required")
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "request failed");
        Self::from(PipelineError::persistence(err, None))
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match (&err, err.kind()) {
            (PipelineError::Ledger(LedgerError::NotNotarized(_)), _) => StatusCode::CONFLICT,
            (PipelineError::Ledger(LedgerError::UnknownNetwork(_)), _) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::InputError) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::HeuristicRejection) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::AlreadyNotarized) => StatusCode::CONFLICT,
            (_, ErrorKind::ConnectionRejected) => StatusCode::FORBIDDEN,
            (_, ErrorKind::WalletUnavailable | ErrorKind::CollaboratorUnavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            (_, ErrorKind::NetworkMismatch | ErrorKind::TransactionFailure) => StatusCode::BAD_GATEWAY,
            (_, ErrorKind::PersistenceFailure) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: err.body(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        PipelineError::from(err).into()
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            ..Self::input(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "success": false, "error": self.body }))).into_response()
    }
}
