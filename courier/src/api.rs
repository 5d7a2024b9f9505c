//! HTTP API
//!
//! - `POST /api/send` with `{id, to, subject, body}` dispatches a message
//! - `GET /api/status/{id}` reports its status
//! - `GET /` answers with a liveness string

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use courier_common::{DispatchRequest, StatusLookup};
use courier_delivery::DispatchEngine;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    controller::Signal,
    error::{ApiError, ServerError},
};

/// HTTP server for the dispatch API
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    /// Bind the API to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(address: &str, router: Router) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::BindError {
                address: address.to_string(),
                source: e,
            })?;

        tracing::info!(address = %address, "API server bound successfully");

        Ok(Self { listener, router })
    }

    /// Address the server is listening on
    ///
    /// # Errors
    /// If the socket's address cannot be read
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the API server until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ServerError> {
        tracing::info!("API server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("API server received shutdown signal");
            })
            .await
            .map_err(|e| ServerError::ServerError(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// Routes for the dispatch API
pub fn router(engine: Arc<DispatchEngine>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/send", post(send_handler))
        .route("/api/status/{id}", get(status_handler))
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}

/// Body of `POST /api/send`
///
/// Every field is optional here so that a missing field is reported as such
/// rather than as a malformed body.
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    pub id: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

impl SendRequest {
    /// # Errors
    /// If a field is missing or empty, or `to` is not an email address
    pub fn validate(self) -> Result<DispatchRequest, ApiError> {
        let non_empty = |field: Option<String>| field.filter(|f| !f.is_empty());

        let (Some(id), Some(to), Some(subject), Some(body)) = (
            non_empty(self.id),
            non_empty(self.to),
            non_empty(self.subject),
            non_empty(self.body),
        ) else {
            return Err(ApiError::MissingFields);
        };

        if !is_valid_email(&to) {
            return Err(ApiError::InvalidEmail);
        }

        Ok(DispatchRequest::new(id, to, subject, body))
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    id: String,
    status: StatusLookup,
}

/// `local@domain.tld`: one `@`, no whitespace, and a dot inside the domain
pub fn is_valid_email(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain
            .char_indices()
            .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

async fn root_handler() -> &'static str {
    "Email Service is Running"
}

async fn send_handler(
    State(engine): State<Arc<DispatchEngine>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let request = payload.validate()?;

    // Dispatch in its own task so a dropped connection cannot abandon a
    // record in PENDING
    let outcome = tokio::spawn(async move { engine.dispatch(&request).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    match outcome {
        Ok(_) => Ok(Json(json!({ "message": "Email sending triggered or retried." }))),
        Err(e) => {
            tracing::error!(error = %e, "Error sending email");
            Err(e.into())
        }
    }
}

async fn status_handler(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    match engine.get_status(&id).await {
        Ok(status) => Ok(Json(StatusResponse { id, status })),
        Err(e) => {
            tracing::error!(error = %e, message_id = %id, "Error getting status");
            Err(ApiError::Status)
        }
    }
}
