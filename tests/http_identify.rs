//! HTTP surface tests driven through the router with `oneshot`.

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use contactlink::storage::{open_database, ContactStore, StorageError};
use contactlink::transport::router;
use contactlink::{Contact, ContactId, IdentityResolver, InMemoryContactStore, NewContact};
use serde_json::{json, Value};
use tower::ServiceExt;

/// A store whose every call fails, standing in for a lost database.
struct UnavailableStore;

impl ContactStore for UnavailableStore {
    fn find_by_email_or_phone(
        &self,
        _email: Option<&str>,
        _phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        Err(StorageError::ConnectionError("database at 10.0.0.5 refused connection".into()))
    }

    fn create(&self, _contact: NewContact) -> Result<Contact, StorageError> {
        Err(StorageError::ConnectionError("unavailable".into()))
    }

    fn update_link_precedence(&self, _id: ContactId, _linked_id: ContactId) -> Result<(), StorageError> {
        Err(StorageError::ConnectionError("unavailable".into()))
    }

    fn find_all_linked_contacts(&self, _primary_id: ContactId) -> Result<Vec<Contact>, StorageError> {
        Err(StorageError::ConnectionError("unavailable".into()))
    }

    fn get(&self, _id: ContactId) -> Result<Option<Contact>, StorageError> {
        Err(StorageError::ConnectionError("unavailable".into()))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Err(StorageError::ConnectionError("unavailable".into()))
    }
}

fn app_with(store: Arc<dyn ContactStore>) -> Router {
    router(Arc::new(IdentityResolver::new(store)))
}

fn app() -> Router {
    app_with(Arc::new(InMemoryContactStore::new()))
}

fn post_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/identify")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response: Response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_identify_response_shape() {
    let app = app();

    let (status, body) = send(&app, post_json(r#"{"email":"lorraine@hillvalley.edu","phoneNumber":"123456"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "contact": {
                "primaryContactId": 1,
                "emails": ["lorraine@hillvalley.edu"],
                "phoneNumbers": ["123456"],
                "secondaryContactIds": []
            }
        })
    );

    let (status, body) = send(&app, post_json(r#"{"email":"mcfly@hillvalley.edu","phoneNumber":123456}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "contact": {
                "primaryContactId": 1,
                "emails": ["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"],
                "phoneNumbers": ["123456"],
                "secondaryContactIds": [2]
            }
        })
    );
}

#[tokio::test]
async fn test_missing_fields_are_400() {
    let app = app();
    for body in [r"{}", r#"{"email":null,"phoneNumber":null}"#, r#"{"email":"","phoneNumber":0}"#] {
        let (status, body) = send(&app, post_json(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Either email or phoneNumber must be provided");
    }
}

#[tokio::test]
async fn test_wrong_field_type_is_400() {
    let (status, body) = send(&app(), post_json(r#"{"phoneNumber":true}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("phoneNumber"));
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let (status, body) = send(&app(), post_json(r#"{"email": "#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_storage_failure_is_generic_500() {
    let app = app_with(Arc::new(UnavailableStore));
    let (status, body) = send(&app, post_json(r#"{"email":"a@x.io"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));
}

#[tokio::test]
async fn test_form_body_accepted() {
    let request = Request::builder()
        .method("POST")
        .uri("/identify")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("email=doc%40hillvalley.edu&phoneNumber="))
        .unwrap();
    let (status, body) = send(&app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact"]["emails"], json!(["doc@hillvalley.edu"]));
    assert_eq!(body["contact"]["phoneNumbers"], json!([]));
}

#[tokio::test]
async fn test_health_endpoint() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(&app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "OK", "message": "Identity Reconciliation Service is running"})
    );
}

#[tokio::test]
async fn test_persistent_backed_router() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_database(dir.path(), None).unwrap());
    let app = app_with(store.clone());

    send(&app, post_json(r#"{"email":"a@x.io","phoneNumber":"1"}"#)).await;
    send(&app, post_json(r#"{"email":"b@x.io","phoneNumber":"2"}"#)).await;
    let (status, body) = send(&app, post_json(r#"{"email":"a@x.io","phoneNumber":"2"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact"]["primaryContactId"], 1);
    assert_eq!(body["contact"]["secondaryContactIds"], json!([2]));
    assert_eq!(store.len().unwrap(), 2);
}
