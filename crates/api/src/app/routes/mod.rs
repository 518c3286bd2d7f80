use axum::Router;

pub mod lessons;
pub mod orders;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .nest("/lessons", lessons::router())
        .nest("/orders", orders::router())
}
