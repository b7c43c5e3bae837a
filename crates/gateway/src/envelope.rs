//! HTTP response envelope: `{ok: true, ...}` on success,
//! `{ok: false, error, code?, retryAfter?}` on failure.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use porter_common::GatewayError;

pub fn success(data: Value) -> Response {
    let mut body = json!({ "ok": true });
    if let (Some(target), Some(source)) = (body.as_object_mut(), data.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(body).into_response()
}

pub fn failure(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "ok": false, "error": message, "code": code })),
    )
        .into_response()
}

pub fn failure_from(error: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    failure(status, &error.code, &error.message)
}
