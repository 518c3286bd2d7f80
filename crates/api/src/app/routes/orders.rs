use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use lessonbook_infra::processor::PlaceOrderOutcome;
use lessonbook_orders::{OrderDraft, OrderId, OrderLine};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let mut lines = Vec::with_capacity(body.lines.len());
    for line in body.lines {
        let lesson_id = match line.lesson_id.parse() {
            Ok(v) => v,
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    format!("invalid lesson id: {}", line.lesson_id),
                )
            }
        };
        lines.push(OrderLine {
            lesson_id,
            seats: line.seats,
        });
    }

    let draft = OrderDraft {
        customer_name: body.name,
        customer_phone: body.phone,
        lines,
        idempotency_key: body.idempotency_key,
    };

    match services.place_order(draft).await {
        Ok(PlaceOrderOutcome::Created(order)) => {
            (StatusCode::CREATED, Json(dto::order_to_json(&order))).into_response()
        }
        Ok(PlaceOrderOutcome::Replayed(order)) => {
            (StatusCode::OK, Json(dto::order_to_json(&order))).into_response()
        }
        Err(e) => errors::place_order_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.list_orders().await {
        Ok(orders) => {
            let items: Vec<_> = orders.iter().map(dto::order_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: OrderId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
        }
    };

    match services.get_order(id).await {
        Ok(Some(order)) => (StatusCode::OK, Json(dto::order_to_json(&order))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}
