//! Durable storage for lessons and orders.
//!
//! One trait pair ([`LessonStore`]/[`OrderStore`]), two backends: an
//! in-memory implementation for tests/dev and a Postgres implementation
//! for production.

pub mod in_memory;
pub mod postgres;
mod r#trait;

pub use in_memory::{InMemoryLessonStore, InMemoryOrderStore};
pub use postgres::{PostgresLessonStore, PostgresOrderStore};
pub use r#trait::{DecrementOutcome, LessonStore, OrderStore, StoreError};
