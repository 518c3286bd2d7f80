use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use lessonbook_core::DomainError;
use lessonbook_infra::processor::PlaceOrderError;
use lessonbook_infra::store::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

/// Storage faults never leak backend detail to the client.
pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Duplicate(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "storage fault");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "transient_error",
                "storage temporarily unavailable, retry later",
            )
        }
    }
}

pub fn place_order_error_to_response(err: PlaceOrderError) -> axum::response::Response {
    match err {
        PlaceOrderError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        PlaceOrderError::LessonNotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("lesson {id} not found"),
        ),
        PlaceOrderError::InsufficientCapacity(id) => json_error(
            StatusCode::CONFLICT,
            "insufficient_capacity",
            format!("not enough seats left on lesson {id}"),
        ),
        PlaceOrderError::Transient(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "transient_error", msg)
        }
    }
}
