use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use rayo_gateway::GatewayError;
use rayo_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Gateway(GatewayError::Store(err)) => match err {
                StoreError::AlreadyExists { .. } => (StatusCode::CONFLICT, self.to_string()),
                StoreError::NotFound { .. } | StoreError::NodeNotFound(_) => {
                    (StatusCode::NOT_FOUND, self.to_string())
                }
                StoreError::DatastoreFailure(_) => {
                    tracing::error!(error = %err, "datastore failure while serving request");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Datastore failure".to_string())
                }
            },
            ServerError::Gateway(GatewayError::NoNodeAvailable(_))
            | ServerError::Gateway(GatewayError::NodeOperation { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Gateway(GatewayError::InvalidJid(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
