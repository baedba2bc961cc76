//! Success response envelope helpers.
//!
//! All 2xx responses share the `{"status": "success", data, results?}`
//! shape; list endpoints carry a `results` count alongside the data.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": data })),
    )
        .into_response()
}

pub fn success_list<T: Serialize>(results: usize, data: T) -> Response {
    Json(json!({
        "status": "success",
        "results": results,
        "data": data,
    }))
    .into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
