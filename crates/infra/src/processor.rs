//! Order placement pipeline.
//!
//! Each incoming order request walks this state machine:
//!
//! ```text
//! Received → Validated → Reserved → Persisted → Confirmed
//!     ↓          ↓           ↓           ↓
//!  Rejected   Rejected    Rejected    Rejected (reservation released)
//! ```
//!
//! No gate leaves state behind: a rejection before `Reserved` has touched
//! nothing, and a persistence failure after `Reserved` hands the seats
//! back through the ledger before reporting a transient failure. The
//! persist step carries a timeout that feeds the same release path as an
//! explicit storage fault.
//!
//! ## Retries
//!
//! Callers may retry a transient failure. With an idempotency key the
//! retry is safe: a key that already maps to a persisted order returns
//! that order without reserving again, and a duplicate-key conflict at
//! persist time releases the fresh reservation and returns the original.
//! Without a key, a retried request after a timeout is a new order and
//! can reserve capacity twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use lessonbook_core::RecordId;
use lessonbook_lessons::LessonId;
use lessonbook_orders::{Order, OrderDraft, OrderId};

use crate::ledger::{CapacityLedger, LedgerError, ReservationToken};
use crate::store::{LessonStore, OrderStore, StoreError};

/// How long the persist step may take before it is treated as failed.
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Order placement failure, as reported to the caller.
///
/// Storage faults are deliberately opaque here: the detail is logged, the
/// caller only learns the attempt is retryable.
#[derive(Debug, Error)]
pub enum PlaceOrderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("lesson {0} not found")]
    LessonNotFound(LessonId),

    #[error("insufficient capacity for lesson {0}")]
    InsufficientCapacity(LessonId),

    #[error("transient failure: {0}")]
    Transient(&'static str),
}

/// A successfully placed order, marking whether it was created by this
/// request or replayed from an earlier one via the idempotency key.
#[derive(Debug)]
pub enum PlaceOrderOutcome {
    Created(Order),
    Replayed(Order),
}

impl PlaceOrderOutcome {
    pub fn order(&self) -> &Order {
        match self {
            PlaceOrderOutcome::Created(o) | PlaceOrderOutcome::Replayed(o) => o,
        }
    }
}

/// Validates drafts, reserves seats through the ledger, and persists the
/// order only when every line's reservation succeeded.
#[derive(Debug)]
pub struct OrderProcessor<L, O> {
    ledger: CapacityLedger<L>,
    orders: Arc<O>,
    persist_timeout: Duration,
}

impl<L, O> OrderProcessor<L, O> {
    pub fn new(ledger: CapacityLedger<L>, orders: Arc<O>) -> Self {
        Self {
            ledger,
            orders,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }

    pub fn with_persist_timeout(mut self, persist_timeout: Duration) -> Self {
        self.persist_timeout = persist_timeout;
        self
    }
}

impl<L: LessonStore, O: OrderStore> OrderProcessor<L, O> {
    /// Place an order: validate, reserve, persist, confirm.
    ///
    /// Run this to completion independently of the client connection:
    /// the release-on-failure path must execute even if the caller has
    /// gone away (the HTTP layer spawns it on a detached task).
    pub async fn place_order(
        &self,
        draft: OrderDraft,
    ) -> Result<PlaceOrderOutcome, PlaceOrderError> {
        // Validated
        draft
            .validate()
            .map_err(|e| PlaceOrderError::Validation(e.to_string()))?;

        // Replay check before any capacity is touched.
        if let Some(key) = draft.idempotency_key.as_deref() {
            if let Some(existing) = self
                .orders
                .find_by_idempotency_key(key)
                .await
                .map_err(|e| transient("idempotency lookup failed", e))?
            {
                tracing::info!(order_id = %existing.id, key, "replaying persisted order");
                return Ok(PlaceOrderOutcome::Replayed(existing));
            }
        }

        // Reserved
        let token = self.ledger.reserve_many(&draft.lines).await.map_err(|e| match e {
            LedgerError::Validation(msg) => PlaceOrderError::Validation(msg),
            LedgerError::NotFound(id) => PlaceOrderError::LessonNotFound(id),
            LedgerError::InsufficientCapacity(id) => PlaceOrderError::InsufficientCapacity(id),
            LedgerError::Conflict(msg) => {
                tracing::warn!(error = %msg, "reservation gave up under contention");
                PlaceOrderError::Transient("reservation conflict, retry later")
            }
            LedgerError::Store(e) => transient("reservation failed", e),
        })?;

        // Persisted
        let order = draft.into_order(OrderId::new(RecordId::new()), Utc::now());
        let persisted = tokio::time::timeout(
            self.persist_timeout,
            self.orders.insert(order.clone()),
        )
        .await;

        match persisted {
            Ok(Ok(())) => {
                tracing::info!(order_id = %order.id, lines = order.lines.len(), "order confirmed");
                Ok(PlaceOrderOutcome::Created(order))
            }
            Ok(Err(StoreError::Duplicate(_))) if order.idempotency_key.is_some() => {
                // A concurrent request with the same key persisted first;
                // this attempt's seats go back and the winner is returned.
                self.release_quietly(token).await;
                let key = order.idempotency_key.as_deref().unwrap_or_default();
                match self.orders.find_by_idempotency_key(key).await {
                    Ok(Some(existing)) => Ok(PlaceOrderOutcome::Replayed(existing)),
                    Ok(None) => Err(PlaceOrderError::Transient("order persistence conflicted")),
                    Err(e) => Err(transient("idempotency lookup failed", e)),
                }
            }
            Ok(Err(e)) => {
                tracing::error!(order_id = %order.id, error = %e, "order persistence failed");
                self.release_quietly(token).await;
                Err(PlaceOrderError::Transient("order persistence failed"))
            }
            Err(_elapsed) => {
                tracing::error!(order_id = %order.id, "order persistence timed out");
                self.release_quietly(token).await;
                Err(PlaceOrderError::Transient("order persistence timed out"))
            }
        }
    }

    async fn release_quietly(&self, token: ReservationToken) {
        // Release already logs per-line failures; the order attempt is
        // reported as transient either way.
        let _ = self.ledger.release(token).await;
    }
}

fn transient(context: &'static str, err: StoreError) -> PlaceOrderError {
    tracing::error!(error = %err, context, "storage fault");
    PlaceOrderError::Transient(context)
}
