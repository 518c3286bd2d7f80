use axum::http::StatusCode;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn root() -> &'static str {
    "lessonbook API is running"
}
