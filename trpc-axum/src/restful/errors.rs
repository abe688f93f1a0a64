//! Mapping framework errors onto HTTP responses.

use axum::body::Body;
use http::{HeaderValue, Response, StatusCode, header, request::Parts};
use trpc_axum_core::{Error, RetCode, content_type};

/// Sent when the error itself cannot be encoded.
pub const MARSHAL_ERROR_FALLBACK: &str = r#"{"code":999,"message":"failed to marshal error response"}"#;

/// The HTTP status for an error.
///
/// An explicit status attached with [`Error::with_http_status`] wins;
/// otherwise framework codes map through a fixed table and everything else
/// is `500`.
pub fn http_status(err: &Error) -> StatusCode {
    if let Some(status) = err.http_status() {
        return status;
    }
    match err.ret_code() {
        Some(RetCode::ServerDecodeFail) => StatusCode::BAD_REQUEST,
        Some(RetCode::ServerEncodeFail) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(RetCode::ServerNoService) | Some(RetCode::ServerNoFunc) => StatusCode::NOT_FOUND,
        Some(RetCode::ServerTimeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(RetCode::ServerOverload) => StatusCode::TOO_MANY_REQUESTS,
        Some(RetCode::ServerSystemErr) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(RetCode::ServerAuthFail) => StatusCode::UNAUTHORIZED,
        Some(RetCode::ServerValidateFail) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The default error handler: a JSON `{"code", "message"}` body.
pub fn default_error_handler(_parts: &Parts, err: &Error) -> Response<Body> {
    let body = match serde_json::to_vec(&err.response_body()) {
        Ok(body) => Body::from(body),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode error response");
            Body::from(MARSHAL_ERROR_FALLBACK)
        }
    };
    let mut response = Response::new(body);
    *response.status_mut() = http_status(err);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type::JSON));
    response
}
