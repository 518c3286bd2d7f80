//! Capacity ledger: the single authority for capacity changes.
//!
//! Every seat that leaves or re-enters a lesson's capacity goes through
//! this module. The guarantee it provides:
//!
//! ```text
//! reserve_many(lines)
//!   ↓
//! 1. Coalesce duplicate lesson ids (sum seats, first occurrence wins order)
//!   ↓
//! 2. Validate every line in submission order (exists? enough seats?)
//!   ↓
//! 3. Apply conditional decrements in ascending lesson-id order
//!   ↓
//! 4. On a mid-batch refusal: roll back applied decrements, go to 2
//!    (bounded attempts)
//! ```
//!
//! No interleaving of two concurrent `reserve_many` calls can push the
//! total reserved seats for any lesson past its capacity: the store's
//! `try_decrement` is atomic per record, so a batch only ever holds seats
//! it actually won. All-or-nothing across the batch comes from the
//! rollback in step 4. The fixed apply order exists so two batches that
//! overlap on several lessons cannot hold-and-wait against each other.
//!
//! When two concurrent batches both want the last seats of the same
//! lesson, whichever decrement commits first wins; the loser's re-run of
//! step 2 then reports `InsufficientCapacity` for that lesson. Only a
//! batch that keeps winning validation but keeps losing the apply race
//! (possible under sustained contention with concurrent releases) gives
//! up with `Conflict`, which callers surface as a transient failure.

use std::sync::Arc;

use thiserror::Error;

use lessonbook_lessons::LessonId;
use lessonbook_orders::{coalesce_lines, OrderLine};

use crate::store::{DecrementOutcome, LessonStore, StoreError};

/// Attempts before a contended reservation gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Reservation failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The line set itself was unusable (empty, seat-count overflow).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced lesson does not exist. No capacity was touched.
    #[error("lesson {0} not found")]
    NotFound(LessonId),

    /// The first lesson (in submission order) whose capacity was too low.
    /// No capacity is held when this is returned.
    #[error("insufficient capacity for lesson {0}")]
    InsufficientCapacity(LessonId),

    /// Retries exhausted under contention. No capacity is held.
    #[error("reservation conflict: {0}")]
    Conflict(String),

    /// The storage backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Proof that a batch of decrements was applied.
///
/// Hold it until the order is persisted; on any later failure, hand it to
/// [`CapacityLedger::release`] so the seats return to the pool.
#[derive(Debug)]
#[must_use = "dropping a reservation token strands the reserved seats; release it instead"]
pub struct ReservationToken {
    lines: Vec<OrderLine>,
}

impl ReservationToken {
    /// The coalesced lines this token holds seats for.
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }
}

/// Serializes conflicting capacity updates per lesson while leaving
/// disjoint lessons fully parallel. Stateless apart from the injected
/// store; safe to share across request tasks.
#[derive(Debug)]
pub struct CapacityLedger<S> {
    store: Arc<S>,
    max_attempts: u32,
}

impl<S> CapacityLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(store: Arc<S>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl<S: LessonStore> CapacityLedger<S> {
    /// Reserve seats across one or more lessons, all-or-nothing.
    pub async fn reserve_many(
        &self,
        lines: &[OrderLine],
    ) -> Result<ReservationToken, LedgerError> {
        let coalesced =
            coalesce_lines(lines).map_err(|e| LedgerError::Validation(e.to_string()))?;
        if coalesced.is_empty() {
            return Err(LedgerError::Validation(
                "reservation must have at least one line".to_string(),
            ));
        }

        let mut apply_order = coalesced.clone();
        apply_order.sort_by_key(|l| l.lesson_id);

        let mut attempt = 0;
        loop {
            attempt += 1;

            // Validation pass, in submission order: error attribution is
            // fixed to the first offending lesson the caller referenced.
            for line in &coalesced {
                match self.store.get(line.lesson_id).await? {
                    None => return Err(LedgerError::NotFound(line.lesson_id)),
                    Some(lesson) if lesson.capacity < line.seats => {
                        return Err(LedgerError::InsufficientCapacity(line.lesson_id));
                    }
                    Some(_) => {}
                }
            }

            // Apply pass, in ascending id order.
            let mut applied: Vec<OrderLine> = Vec::with_capacity(apply_order.len());
            let mut raced = false;
            for line in &apply_order {
                match self.store.try_decrement(line.lesson_id, line.seats).await {
                    Ok(DecrementOutcome::Applied { .. }) => applied.push(*line),
                    Ok(DecrementOutcome::Insufficient | DecrementOutcome::Missing) => {
                        // Another batch got there between validate and
                        // apply; give back what this one holds and re-run
                        // validation so the loser reports the true state.
                        self.rollback(&applied).await;
                        raced = true;
                        break;
                    }
                    Err(e) => {
                        self.rollback(&applied).await;
                        return Err(e.into());
                    }
                }
            }

            if !raced {
                return Ok(ReservationToken { lines: apply_order });
            }
            if attempt >= self.max_attempts {
                return Err(LedgerError::Conflict(format!(
                    "reservation lost the apply race {attempt} times"
                )));
            }
            tracing::debug!(attempt, "capacity changed underfoot, retrying reservation");
        }
    }

    /// Compensating action: restore previously reserved seats.
    ///
    /// Keeps going through the remaining lines when one restore fails, so
    /// a single bad record cannot strand the rest of the batch; the first
    /// error is returned after the sweep.
    pub async fn release(&self, token: ReservationToken) -> Result<(), StoreError> {
        let mut first_err = None;
        for line in &token.lines {
            if let Err(e) = self.store.restore(line.lesson_id, line.seats).await {
                tracing::error!(
                    lesson_id = %line.lesson_id,
                    seats = line.seats,
                    error = %e,
                    "failed to restore reserved seats"
                );
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn rollback(&self, applied: &[OrderLine]) {
        for line in applied {
            if let Err(e) = self.store.restore(line.lesson_id, line.seats).await {
                tracing::error!(
                    lesson_id = %line.lesson_id,
                    seats = line.seats,
                    error = %e,
                    "failed to roll back a partial reservation; seats are stranded"
                );
            }
        }
    }
}
