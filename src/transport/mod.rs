//! HTTP transport for contactlink.
//!
//! Routes:
//! - `POST /identify` takes a JSON or form body and returns the caller's cluster
//! - `GET /` reports liveness
//!
//! The resolver is synchronous, so each identify call runs on tokio's
//! blocking pool.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Form, FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::error::{ResolveError, ValidationError};
use crate::request::{FormIdentifyRequest, IdentifyQuery, IdentifyRequest};
use crate::resolver::IdentityResolver;
use crate::summary::IdentifyResponse;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Error body: `{"error": "<message>"}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// A failed request, rendered as a status code plus [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    /// HTTP status of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Validation(e) => e.into(),
            other => {
                tracing::error!(error = %other, "identify failed");
                Self::internal()
            }
        }
    }
}

/// An identify body in either supported encoding.
#[derive(Debug)]
pub enum IdentifyBody {
    /// `application/json`.
    Json(IdentifyRequest),
    /// `application/x-www-form-urlencoded`.
    Form(FormIdentifyRequest),
}

impl IdentifyBody {
    fn normalize(self) -> Result<IdentifyQuery, ValidationError> {
        match self {
            Self::Json(body) => body.normalize(),
            Self::Form(body) => body.normalize(),
        }
    }
}

#[async_trait]
impl<S> FromRequest<S> for IdentifyBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(body) = Form::<FormIdentifyRequest>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
            Ok(Self::Form(body))
        } else {
            let Json(body) = Json::<IdentifyRequest>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
            Ok(Self::Json(body))
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        message: "Identity Reconciliation Service is running",
    })
}

async fn identify(
    State(resolver): State<Arc<IdentityResolver>>,
    body: IdentifyBody,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let query = body.normalize()?;
    let response = tokio::task::spawn_blocking(move || resolver.identify(&query))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "identify task did not complete");
            ApiError::internal()
        })??;
    Ok(Json(response))
}

/// Build the HTTP router.
pub fn router(resolver: Arc<IdentityResolver>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/identify", post(identify))
        .with_state(resolver)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    resolver: Arc<IdentityResolver>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(resolver))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryContactStore, StorageError};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(InMemoryContactStore::new());
        router(Arc::new(IdentityResolver::new(store)))
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_storage_errors_become_generic_500() {
        let err: ApiError = ResolveError::Storage(StorageError::BackendError("disk on fire".into())).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, INTERNAL_ERROR_MESSAGE);

        let err: ApiError = ResolveError::integrity("dangling").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_errors_keep_message() {
        let err: ApiError = ResolveError::Validation(ValidationError::MissingContactPoint).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Either email or phoneNumber must be provided");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "OK");
        assert_eq!(body["message"], "Identity Reconciliation Service is running");
    }

    #[tokio::test]
    async fn test_identify_empty_body_is_400() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/identify")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Either email or phoneNumber must be provided");
    }

    #[tokio::test]
    async fn test_identify_form_body() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/identify")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("email=a%40x.io&phoneNumber=123"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["contact"]["primaryContactId"], 1);
        assert_eq!(body["contact"]["emails"][0], "a@x.io");
        assert_eq!(body["contact"]["phoneNumbers"][0], "123");
    }
}
