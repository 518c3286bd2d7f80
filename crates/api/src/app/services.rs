//! Service wiring: storage backend selection and dispatch.
//!
//! The backend is picked once at startup: `DATABASE_URL` set selects
//! Postgres (schema ensured on boot, unreachable storage is fatal),
//! otherwise everything runs on the in-memory stores.

use std::sync::Arc;

use sqlx::PgPool;

use lessonbook_infra::ledger::CapacityLedger;
use lessonbook_infra::processor::{OrderProcessor, PlaceOrderError, PlaceOrderOutcome};
use lessonbook_infra::store::{
    postgres, InMemoryLessonStore, InMemoryOrderStore, LessonStore, OrderStore,
    PostgresLessonStore, PostgresOrderStore, StoreError,
};
use lessonbook_lessons::{Lesson, LessonId, LessonPatch};
use lessonbook_orders::{Order, OrderDraft, OrderId};

type InMemoryProcessor = OrderProcessor<InMemoryLessonStore, InMemoryOrderStore>;
type PostgresProcessor = OrderProcessor<PostgresLessonStore, PostgresOrderStore>;

pub enum AppServices {
    InMemory {
        lessons: Arc<InMemoryLessonStore>,
        orders: Arc<InMemoryOrderStore>,
        processor: Arc<InMemoryProcessor>,
    },
    Postgres {
        lessons: Arc<PostgresLessonStore>,
        orders: Arc<PostgresOrderStore>,
        processor: Arc<PostgresProcessor>,
    },
}

pub async fn build_services() -> AppServices {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = PgPool::connect(&url)
                .await
                .expect("failed to connect to DATABASE_URL");
            postgres::ensure_schema(&pool)
                .await
                .expect("failed to ensure database schema");
            tracing::info!("using postgres stores");
            AppServices::postgres(pool)
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set; using in-memory stores");
            AppServices::in_memory()
        }
    }
}

impl AppServices {
    pub fn in_memory() -> Self {
        let lessons = Arc::new(InMemoryLessonStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let processor = Arc::new(OrderProcessor::new(
            CapacityLedger::new(lessons.clone()),
            orders.clone(),
        ));
        AppServices::InMemory {
            lessons,
            orders,
            processor,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let lessons = Arc::new(PostgresLessonStore::new(pool.clone()));
        let orders = Arc::new(PostgresOrderStore::new(pool));
        let processor = Arc::new(OrderProcessor::new(
            CapacityLedger::new(lessons.clone()),
            orders.clone(),
        ));
        AppServices::Postgres {
            lessons,
            orders,
            processor,
        }
    }

    pub async fn list_lessons(&self) -> Result<Vec<Lesson>, StoreError> {
        match self {
            AppServices::InMemory { lessons, .. } => lessons.list().await,
            AppServices::Postgres { lessons, .. } => lessons.list().await,
        }
    }

    pub async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StoreError> {
        match self {
            AppServices::InMemory { lessons, .. } => lessons.get(id).await,
            AppServices::Postgres { lessons, .. } => lessons.get(id).await,
        }
    }

    pub async fn insert_lesson(&self, lesson: Lesson) -> Result<(), StoreError> {
        match self {
            AppServices::InMemory { lessons, .. } => lessons.insert(lesson).await,
            AppServices::Postgres { lessons, .. } => lessons.insert(lesson).await,
        }
    }

    pub async fn update_lesson(
        &self,
        id: LessonId,
        patch: &LessonPatch,
    ) -> Result<Option<Lesson>, StoreError> {
        match self {
            AppServices::InMemory { lessons, .. } => lessons.update_fields(id, patch).await,
            AppServices::Postgres { lessons, .. } => lessons.update_fields(id, patch).await,
        }
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        match self {
            AppServices::InMemory { orders, .. } => orders.list().await,
            AppServices::Postgres { orders, .. } => orders.list().await,
        }
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        match self {
            AppServices::InMemory { orders, .. } => orders.get(id).await,
            AppServices::Postgres { orders, .. } => orders.get(id).await,
        }
    }

    pub async fn place_order(
        &self,
        draft: OrderDraft,
    ) -> Result<PlaceOrderOutcome, PlaceOrderError> {
        match self {
            AppServices::InMemory { processor, .. } => {
                place_detached(processor.clone(), draft).await
            }
            AppServices::Postgres { processor, .. } => {
                place_detached(processor.clone(), draft).await
            }
        }
    }
}

/// Run placement on a detached task: a dropped client connection must not
/// abort the pipeline between reserve and persist, or the release path
/// would never run.
async fn place_detached<L, O>(
    processor: Arc<OrderProcessor<L, O>>,
    draft: OrderDraft,
) -> Result<PlaceOrderOutcome, PlaceOrderError>
where
    L: LessonStore + 'static,
    O: OrderStore + 'static,
{
    let handle = tokio::spawn(async move { processor.place_order(draft).await });
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "order placement task failed");
            Err(PlaceOrderError::Transient("order placement task failed"))
        }
    }
}
