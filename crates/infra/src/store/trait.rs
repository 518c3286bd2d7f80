use async_trait::async_trait;
use thiserror::Error;

use lessonbook_lessons::{Lesson, LessonId, LessonPatch};
use lessonbook_orders::{Order, OrderId};

/// Storage operation error.
///
/// These are **infrastructure errors** (backend faults, key collisions) as
/// opposed to domain errors (validation, invariants). Callers above the
/// store layer must not leak backend detail to clients; log it and surface
/// an opaque transient failure instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was hit (currently only the order
    /// idempotency key).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// The backend failed (connection loss, poisoned lock, corrupt row).
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Outcome of a conditional capacity decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// The decrement was applied; `remaining` is the capacity left.
    Applied { remaining: u32 },
    /// Capacity was lower than requested. Nothing changed.
    Insufficient,
    /// The lesson does not exist. Nothing changed.
    Missing,
}

/// Durable store of lesson records.
///
/// ## Capacity discipline
///
/// `capacity` has exactly two write paths: [`try_decrement`] and
/// [`restore`]. Both are **atomic per record**: implementations must make
/// the check-and-write a single indivisible step (a conditional `UPDATE`,
/// or a write under one lock), because the capacity ledger's no-oversell
/// guarantee reduces to this primitive. `update_fields` never touches
/// capacity; [`LessonPatch`] has no capacity field and implementations must
/// not add one.
///
/// Every capacity or field write bumps the record's `version`, so an
/// observer can detect concurrent modification cheaply.
///
/// [`try_decrement`]: LessonStore::try_decrement
/// [`restore`]: LessonStore::restore
#[async_trait]
pub trait LessonStore: Send + Sync {
    /// Insert a freshly created lesson.
    async fn insert(&self, lesson: Lesson) -> Result<(), StoreError>;

    /// Fetch one lesson, `None` if absent.
    async fn get(&self, id: LessonId) -> Result<Option<Lesson>, StoreError>;

    /// All lessons, sorted by topic ascending (id as tie-break).
    async fn list(&self) -> Result<Vec<Lesson>, StoreError>;

    /// Apply an administrative patch (already validated by the caller).
    ///
    /// Returns the updated lesson, or `None` if the lesson is absent.
    async fn update_fields(
        &self,
        id: LessonId,
        patch: &LessonPatch,
    ) -> Result<Option<Lesson>, StoreError>;

    /// Atomically decrement capacity by `seats` iff `capacity >= seats`.
    async fn try_decrement(&self, id: LessonId, seats: u32)
        -> Result<DecrementOutcome, StoreError>;

    /// Hand `seats` back, clamped at the lesson's creation-time ceiling.
    ///
    /// Restoring a missing lesson is a no-op: the compensation path must
    /// not fail on a record it cannot help.
    async fn restore(&self, id: LessonId, seats: u32) -> Result<(), StoreError>;
}

/// Durable store of confirmed orders.
///
/// Orders are immutable once inserted; there is no update operation.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a confirmed order.
    ///
    /// Fails with [`StoreError::Duplicate`] when the order carries an
    /// idempotency key that is already persisted; the caller treats that
    /// as "someone else already completed this request".
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    /// Fetch one order, `None` if absent.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// All orders, oldest first.
    async fn list(&self) -> Result<Vec<Order>, StoreError>;

    /// Look up the order persisted under an idempotency key, if any.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError>;
}
