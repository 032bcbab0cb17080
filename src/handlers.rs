// handlers.rs
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{dispatch, Dispatch};
use crate::webhook::{SignatureError, WebhookVerifier};
use crate::AppState;

/// `POST /stripe`. Replies 400 when the body cannot be read or fails
/// verification, 200 for every verified event.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read webhook body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match process_delivery(&state.verifier, &headers, &body) {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!("Failed to validate signature: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

/// Verifies one delivery, dispatches it and logs the outcome.
pub fn process_delivery(
    verifier: &WebhookVerifier,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Dispatch, SignatureError> {
    let event = verifier.construct_event(body, headers)?;
    let outcome = dispatch(&event);

    match &outcome {
        Dispatch::FieldError { .. } => {
            warn!(event_id = ?event.id, event_type = %event.event_type, "{}", outcome)
        }
        _ => info!(event_id = ?event.id, "{}", outcome),
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::webhook::{signature_header, SIGNATURE_HEADER};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use serde_json::json;
    use std::io;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const SECRET: &str = "whsec_handler_test";

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, f);
        (result, logs.contents())
    }

    fn signed_headers(body: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            signature_header(secret, Utc::now().timestamp(), body.as_bytes())
                .parse()
                .unwrap(),
        );
        headers
    }

    fn app() -> axum::Router {
        let config = Config {
            stripe_secret: SECRET.to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            signature_tolerance_secs: 300,
        };
        crate::router(AppState::new(config))
    }

    fn signed_request(body: &str, secret: &str) -> Request<Body> {
        let header = signature_header(secret, Utc::now().timestamp(), body.as_bytes());
        Request::builder()
            .method("POST")
            .uri("/stripe")
            .header(SIGNATURE_HEADER, header)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn created_body(object: serde_json::Value) -> String {
        json!({
            "id": "evt_handler",
            "type": "customer.subscription.created",
            "data": { "object": object }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_valid_delivery_is_ok() {
        let body = created_body(json!({ "customer": "cus_123", "status": "active", "quantity": 2 }));
        let response = app().oneshot(signed_request(&body, SECRET)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_field_is_still_ok() {
        let body = created_body(json!({ "customer": "cus_123", "quantity": 2 }));
        let response = app().oneshot(signed_request(&body, SECRET)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let body = created_body(json!({ "customer": "cus_123", "status": "active", "quantity": 2 }));
        let response = app()
            .oneshot(signed_request(&body, "whsec_wrong"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/stripe")
            .body(Body::from(created_body(json!({}))))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreadable_body_is_rejected() {
        let stream = futures::stream::iter(vec![Err::<Bytes, std::io::Error>(
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection reset"),
        )]);
        let request = Request::builder()
            .method("POST")
            .uri("/stripe")
            .header(SIGNATURE_HEADER, "t=1,v1=00")
            .body(Body::from_stream(stream))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_only_post_is_routed() {
        let request = Request::builder()
            .method("GET")
            .uri("/stripe")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_unrecognized_type_is_logged() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = json!({ "type": "charge.refunded", "data": { "object": {} } }).to_string();
        let headers = signed_headers(&body, SECRET);

        let (outcome, logs) =
            with_captured_logs(|| process_delivery(&verifier, &headers, body.as_bytes()));

        assert_eq!(
            outcome.unwrap(),
            Dispatch::Unrecognized("charge.refunded".to_string())
        );
        assert!(logs.contains("Unknown event type received: charge.refunded"));
    }

    #[test]
    fn test_subscription_line_is_logged() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = created_body(json!({ "customer": "cus_123", "status": "active", "quantity": 2 }));
        let headers = signed_headers(&body, SECRET);

        let (outcome, logs) =
            with_captured_logs(|| process_delivery(&verifier, &headers, body.as_bytes()));

        assert!(outcome.is_ok());
        assert!(logs.contains(
            "customer cus_123 subscription created, quantity (2), current status: active"
        ));
    }

    #[test]
    fn test_bad_signature_logs_no_event() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let body = created_body(json!({ "customer": "cus_123", "status": "active", "quantity": 2 }));
        let headers = signed_headers(&body, "whsec_wrong");

        let (outcome, logs) =
            with_captured_logs(|| process_delivery(&verifier, &headers, body.as_bytes()));

        assert!(matches!(outcome, Err(SignatureError::NoValidSignature)));
        assert!(!logs.contains("subscription created"));
    }
}
