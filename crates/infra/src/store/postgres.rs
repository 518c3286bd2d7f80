//! Postgres-backed lesson and order stores.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS lessons (
//!     id               UUID PRIMARY KEY,
//!     topic            TEXT NOT NULL,
//!     location         TEXT NOT NULL,
//!     price            BIGINT NOT NULL CHECK (price >= 1),
//!     capacity         INT NOT NULL CHECK (capacity >= 0),
//!     initial_capacity INT NOT NULL CHECK (capacity <= initial_capacity),
//!     image            TEXT,
//!     version          BIGINT NOT NULL DEFAULT 0,
//!     created_at       TIMESTAMPTZ NOT NULL,
//!     updated_at       TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE IF NOT EXISTS orders (
//!     id              UUID PRIMARY KEY,
//!     customer_name   TEXT NOT NULL,
//!     customer_phone  TEXT NOT NULL,
//!     lines           JSONB NOT NULL,
//!     idempotency_key TEXT,
//!     created_at      TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE UNIQUE INDEX IF NOT EXISTS orders_idempotency_key_idx
//!     ON orders (idempotency_key) WHERE idempotency_key IS NOT NULL;
//! ```
//!
//! The CHECK constraints are the database-level backstop for the capacity
//! invariant; the conditional `UPDATE` in `try_decrement` is what enforces
//! it under concurrency (the row lock taken by `UPDATE` serializes
//! concurrent decrements of the same lesson, and the `capacity >= $n`
//! predicate is re-evaluated after the lock is acquired).
//!
//! ## Error mapping
//!
//! | SQLx error | SQLSTATE | StoreError | Scenario |
//! |------------|----------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | Idempotency-key replay |
//! | Database (other) | any other | `Backend` | Constraint/IO faults |
//! | PoolClosed / network / decode | n/a | `Backend` | Backend unavailable or corrupt row |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use lessonbook_core::RecordId;
use lessonbook_lessons::{Lesson, LessonId, LessonPatch};
use lessonbook_orders::{Order, OrderId, OrderLine};

use super::r#trait::{DecrementOutcome, LessonStore, OrderStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lessons (
    id               UUID PRIMARY KEY,
    topic            TEXT NOT NULL,
    location         TEXT NOT NULL,
    price            BIGINT NOT NULL CHECK (price >= 1),
    capacity         INT NOT NULL CHECK (capacity >= 0),
    initial_capacity INT NOT NULL CHECK (capacity <= initial_capacity),
    image            TEXT,
    version          BIGINT NOT NULL DEFAULT 0,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    id              UUID PRIMARY KEY,
    customer_name   TEXT NOT NULL,
    customer_phone  TEXT NOT NULL,
    lines           JSONB NOT NULL,
    idempotency_key TEXT,
    created_at      TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS orders_idempotency_key_idx
    ON orders (idempotency_key) WHERE idempotency_key IS NOT NULL;
"#;

/// Create the tables and indexes if they do not exist yet.
///
/// Called once at startup; failure here is fatal (storage unreachable at
/// boot is the one non-recoverable condition).
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

/// Postgres-backed lesson store.
#[derive(Debug, Clone)]
pub struct PostgresLessonStore {
    pool: PgPool,
}

impl PostgresLessonStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LessonStore for PostgresLessonStore {
    #[instrument(skip(self, lesson), fields(lesson_id = %lesson.id), err)]
    async fn insert(&self, lesson: Lesson) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO lessons (
                id, topic, location, price, capacity, initial_capacity,
                image, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(lesson.id.0.as_uuid())
        .bind(&lesson.topic)
        .bind(&lesson.location)
        .bind(lesson.price as i64)
        .bind(lesson.capacity as i32)
        .bind(lesson.initial_capacity as i32)
        .bind(&lesson.image)
        .bind(lesson.version as i64)
        .bind(lesson.created_at)
        .bind(lesson.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_lesson", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(lesson_id = %id), err)]
    async fn get(&self, id: LessonId) -> Result<Option<Lesson>, StoreError> {
        let row = sqlx::query(
            "SELECT id, topic, location, price, capacity, initial_capacity, image, version, created_at, updated_at
             FROM lessons WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_lesson", e))?;

        row.map(lesson_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Lesson>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, topic, location, price, capacity, initial_capacity, image, version, created_at, updated_at
             FROM lessons ORDER BY topic ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_lessons", e))?;

        rows.into_iter().map(lesson_from_row).collect()
    }

    #[instrument(skip(self, patch), fields(lesson_id = %id), err)]
    async fn update_fields(
        &self,
        id: LessonId,
        patch: &LessonPatch,
    ) -> Result<Option<Lesson>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE lessons SET
                topic = COALESCE($2, topic),
                location = COALESCE($3, location),
                price = COALESCE($4, price),
                image = COALESCE($5, image),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, topic, location, price, capacity, initial_capacity, image, version, created_at, updated_at
            "#,
        )
        .bind(id.0.as_uuid())
        .bind(patch.topic.as_ref().map(|t| t.trim().to_string()))
        .bind(patch.location.as_ref().map(|l| l.trim().to_string()))
        .bind(patch.price.map(|p| p as i64))
        .bind(&patch.image)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_lesson_fields", e))?;

        row.map(lesson_from_row).transpose()
    }

    #[instrument(skip(self), fields(lesson_id = %id, seats), err)]
    async fn try_decrement(
        &self,
        id: LessonId,
        seats: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE lessons
            SET capacity = capacity - $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND capacity >= $2
            RETURNING capacity
            "#,
        )
        .bind(id.0.as_uuid())
        .bind(seats as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_decrement", e))?;

        if let Some(row) = updated {
            let remaining: i32 = row
                .try_get("capacity")
                .map_err(|e| StoreError::Backend(format!("failed to read capacity: {e}")))?;
            return Ok(DecrementOutcome::Applied {
                remaining: remaining as u32,
            });
        }

        // Condition failed: distinguish a missing lesson from a full one.
        let exists = sqlx::query("SELECT 1 AS one FROM lessons WHERE id = $1")
            .bind(id.0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("try_decrement_probe", e))?;

        Ok(if exists.is_some() {
            DecrementOutcome::Insufficient
        } else {
            DecrementOutcome::Missing
        })
    }

    #[instrument(skip(self), fields(lesson_id = %id, seats), err)]
    async fn restore(&self, id: LessonId, seats: u32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE lessons
            SET capacity = LEAST(capacity + $2, initial_capacity),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0.as_uuid())
        .bind(seats as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("restore", e))?;
        Ok(())
    }
}

/// Postgres-backed order store.
///
/// Order lines are stored as a JSONB document, matching the order's
/// submitted shape; one row insert keeps persistence atomic without an
/// explicit transaction.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id), err)]
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let lines = serde_json::to_value(&order.lines)
            .map_err(|e| StoreError::Backend(format!("failed to serialize lines: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_name, customer_phone, lines, idempotency_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.0.as_uuid())
        .bind(&order.customer_name)
        .bind(&order.customer_phone)
        .bind(&lines)
        .bind(&order.idempotency_key)
        .bind(order.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT id, customer_name, customer_phone, lines, idempotency_key, created_at
             FROM orders WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        row.map(order_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, customer_name, customer_phone, lines, idempotency_key, created_at
             FROM orders ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        rows.into_iter().map(order_from_row).collect()
    }

    #[instrument(skip(self, key), err)]
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT id, customer_name, customer_phone, lines, idempotency_key, created_at
             FROM orders WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_order_by_key", e))?;

        row.map(order_from_row).transpose()
    }
}

fn lesson_from_row(row: sqlx::postgres::PgRow) -> Result<Lesson, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("corrupt lesson row: {e}"));
    let id: uuid::Uuid = row.try_get("id").map_err(read)?;
    let price: i64 = row.try_get("price").map_err(read)?;
    let capacity: i32 = row.try_get("capacity").map_err(read)?;
    let initial_capacity: i32 = row.try_get("initial_capacity").map_err(read)?;
    let version: i64 = row.try_get("version").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(read)?;

    Ok(Lesson {
        id: LessonId::new(RecordId::from_uuid(id)),
        topic: row.try_get("topic").map_err(read)?,
        location: row.try_get("location").map_err(read)?,
        price: price as u64,
        capacity: capacity as u32,
        initial_capacity: initial_capacity as u32,
        image: row.try_get("image").map_err(read)?,
        version: version as u64,
        created_at,
        updated_at,
    })
}

fn order_from_row(row: sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("corrupt order row: {e}"));
    let id: uuid::Uuid = row.try_get("id").map_err(read)?;
    let lines: serde_json::Value = row.try_get("lines").map_err(read)?;
    let lines: Vec<OrderLine> = serde_json::from_value(lines)
        .map_err(|e| StoreError::Backend(format!("corrupt order lines: {e}")))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    Ok(Order {
        id: OrderId::new(RecordId::from_uuid(id)),
        customer_name: row.try_get("customer_name").map_err(read)?,
        customer_phone: row.try_get("customer_phone").map_err(read)?,
        lines,
        idempotency_key: row.try_get("idempotency_key").map_err(read)?,
        created_at,
    })
}

/// Map SQLx errors to [`StoreError`].
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                StoreError::Duplicate(msg)
            } else {
                StoreError::Backend(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
