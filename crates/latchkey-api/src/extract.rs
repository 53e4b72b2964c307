//! Request extractors
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use axum::extract::FromRequest;

/// JSON request body whose rejections (bad JSON, missing fields, wrong
/// content type) are answered as `400 BAD_REQUEST` in the API error shape
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::IntoResponse,
        routing::post,
        Router,
    };
    use serde::Deserialize;
    use serde_json::Value;
    use tower::ServiceExt;

    #[derive(Deserialize)]
    struct Credentials {
        username: String,
        password: String,
    }

    async fn echo(JsonBody(body): JsonBody<Credentials>) -> impl IntoResponse {
        format!("{}:{}", body.username, body.password.len())
    }

    fn app() -> Router {
        Router::new().route("/echo", post(echo))
    }

    async fn error_code(request: Request<Body>) -> (StatusCode, String) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        (status, json["code"].as_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn test_valid_body_passes_through() {
        let request = Request::post("/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"alice","password":"secret1"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let request = Request::post("/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"alice"}"#))
            .unwrap();
        assert_eq!(
            error_code(request).await,
            (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string())
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let request = Request::post("/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        assert_eq!(
            error_code(request).await,
            (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_content_type_is_bad_request() {
        let request = Request::post("/echo")
            .body(Body::from(r#"{"username":"alice","password":"secret1"}"#))
            .unwrap();
        assert_eq!(
            error_code(request).await,
            (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string())
        );
    }
}
