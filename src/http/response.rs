//! HTTP response building helpers
//!
//! Every JSON body carries a `status` field: `"ok"` with the payload fields
//! next to it, or `"error"` with an `error: {code, message}` object.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::convert::{Converted, Payload};
use crate::error::FragmentError;

/// Build a JSON response with the given status code
pub fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// `{"status":"ok", ...fields}`
pub fn success_body(fields: Value) -> Value {
    let mut body = Map::new();
    body.insert("status".to_string(), Value::from("ok"));
    if let Value::Object(fields) = fields {
        body.extend(fields);
    }
    Value::Object(body)
}

/// 200 with a success envelope
pub fn ok(fields: Value) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &success_body(fields))
}

/// 201 with a success envelope and a `Location` header
pub fn created(location: &str, fields: Value) -> Response<Full<Bytes>> {
    let mut response = json_response(StatusCode::CREATED, &success_body(fields));
    if let Ok(value) = header::HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// `{"status":"error","error":{"code":N,"message":"..."}}`
pub fn error_body(status: StatusCode, message: &str) -> Value {
    serde_json::json!({
        "status": "error",
        "error": {
            "code": status.as_u16(),
            "message": message,
        }
    })
}

pub fn error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &error_body(status, message))
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error(StatusCode::NOT_FOUND, message)
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn payload_too_large(limit: usize) -> Response<Full<Bytes>> {
    error(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds {} bytes", limit),
    )
}

/// 401 asking the client for Basic credentials
pub fn unauthorized() -> Response<Full<Bytes>> {
    let mut response = error(StatusCode::UNAUTHORIZED, "Unauthorized");
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Basic realm=\"fragments\""),
    );
    response
}

/// HTTP status for a core error
pub fn status_for(error: &FragmentError) -> StatusCode {
    match error {
        FragmentError::NotFound(_) => StatusCode::NOT_FOUND,
        FragmentError::Validation(_) | FragmentError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        FragmentError::UnsupportedMediaType(_) | FragmentError::UnsupportedConversion { .. } => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        FragmentError::ConversionFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FragmentError::Auth(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a FragmentError to an appropriate HTTP response
pub fn error_response(err: FragmentError) -> Response<Full<Bytes>> {
    let status = status_for(&err);
    if status == StatusCode::UNAUTHORIZED {
        return unauthorized();
    }

    if status.is_server_error() {
        error!(error = %err, "Request failed");
        error(status, "Internal server error")
    } else {
        warn!(status = status.as_u16(), error = %err, "Request rejected");
        error(status, &err.to_string())
    }
}

/// Raw bytes with the given content type
pub fn data_response(content_type: &str, data: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .body(Full::new(data))
        .unwrap()
}

/// Conversion output; text is always sent as UTF-8
pub fn converted_response(converted: Converted) -> Response<Full<Bytes>> {
    let content_type = match &converted.payload {
        Payload::Text(_) => format!("{}; charset=utf-8", converted.mime_type),
        Payload::Binary(_) => converted.mime_type.to_string(),
    };
    data_response(&content_type, converted.payload.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<Full<Bytes>>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ok_envelope() {
        let resp = ok(serde_json::json!({"fragments": []}));
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body, serde_json::json!({"status": "ok", "fragments": []}));
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let body = body_json(not_found("missing")).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], 404);
        assert_eq!(body["error"]["message"], "missing");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&FragmentError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&FragmentError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&FragmentError::UnsupportedConversion {
                from: "image/png".into(),
                ext: "json".into()
            }),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(&FragmentError::ConversionFailure("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&FragmentError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_challenges() {
        let resp = error_response(FragmentError::Auth("no".into()));
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[test]
    fn test_text_conversion_gets_charset() {
        let resp = converted_response(Converted {
            mime_type: "text/html",
            payload: Payload::Text("<p>hi</p>".to_string()),
        });
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    }
}
