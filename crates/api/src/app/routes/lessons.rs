use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use lessonbook_core::RecordId;
use lessonbook_lessons::{Lesson, LessonId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_lessons).post(create_lesson))
        .route("/:id", get(get_lesson).put(update_lesson))
}

pub async fn list_lessons(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.list_lessons().await {
        Ok(lessons) => {
            let items: Vec<_> = lessons.iter().map(dto::lesson_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_lesson(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: LessonId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid lesson id")
        }
    };

    match services.get_lesson(id).await {
        Ok(Some(lesson)) => (StatusCode::OK, Json(dto::lesson_to_json(&lesson))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "lesson not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn create_lesson(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateLessonRequest>,
) -> axum::response::Response {
    let id = LessonId::new(RecordId::new());
    let lesson = match Lesson::create(id, body.into_new_lesson(), Utc::now()) {
        Ok(l) => l,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.insert_lesson(lesson.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(dto::lesson_to_json(&lesson))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn update_lesson(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateLessonRequest>,
) -> axum::response::Response {
    let id: LessonId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid lesson id")
        }
    };

    let patch = body.into_patch();
    if let Err(e) = patch.validate() {
        return errors::domain_error_to_response(e);
    }

    match services.update_lesson(id, &patch).await {
        Ok(Some(lesson)) => (StatusCode::OK, Json(dto::lesson_to_json(&lesson))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "lesson not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}
