use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use lessonbook_lessons::{Lesson, LessonId, LessonPatch};
use lessonbook_orders::{Order, OrderId};

use super::r#trait::{DecrementOutcome, LessonStore, OrderStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory lesson store.
///
/// Intended for tests/dev. Atomicity of `try_decrement` comes from holding
/// the write lock across the check and the write.
#[derive(Debug, Default)]
pub struct InMemoryLessonStore {
    lessons: RwLock<HashMap<LessonId, Lesson>>,
}

impl InMemoryLessonStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LessonStore for InMemoryLessonStore {
    async fn insert(&self, lesson: Lesson) -> Result<(), StoreError> {
        let mut lessons = self.lessons.write().map_err(|_| poisoned())?;
        if lessons.contains_key(&lesson.id) {
            return Err(StoreError::Duplicate(lesson.id.to_string()));
        }
        lessons.insert(lesson.id, lesson);
        Ok(())
    }

    async fn get(&self, id: LessonId) -> Result<Option<Lesson>, StoreError> {
        let lessons = self.lessons.read().map_err(|_| poisoned())?;
        Ok(lessons.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Lesson>, StoreError> {
        let lessons = self.lessons.read().map_err(|_| poisoned())?;
        let mut all: Vec<Lesson> = lessons.values().cloned().collect();
        all.sort_by(|a, b| a.topic.cmp(&b.topic).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn update_fields(
        &self,
        id: LessonId,
        patch: &LessonPatch,
    ) -> Result<Option<Lesson>, StoreError> {
        let mut lessons = self.lessons.write().map_err(|_| poisoned())?;
        let Some(lesson) = lessons.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply_to(lesson, Utc::now());
        lesson.version += 1;
        Ok(Some(lesson.clone()))
    }

    async fn try_decrement(
        &self,
        id: LessonId,
        seats: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        let mut lessons = self.lessons.write().map_err(|_| poisoned())?;
        let Some(lesson) = lessons.get_mut(&id) else {
            return Ok(DecrementOutcome::Missing);
        };
        if lesson.capacity < seats {
            return Ok(DecrementOutcome::Insufficient);
        }
        lesson.capacity -= seats;
        lesson.version += 1;
        lesson.updated_at = Utc::now();
        Ok(DecrementOutcome::Applied {
            remaining: lesson.capacity,
        })
    }

    async fn restore(&self, id: LessonId, seats: u32) -> Result<(), StoreError> {
        let mut lessons = self.lessons.write().map_err(|_| poisoned())?;
        if let Some(lesson) = lessons.get_mut(&id) {
            lesson.capacity = lesson
                .capacity
                .saturating_add(seats)
                .min(lesson.initial_capacity);
            lesson.version += 1;
            lesson.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OrderMaps {
    orders: HashMap<OrderId, Order>,
    by_key: HashMap<String, OrderId>,
}

/// In-memory order store.
///
/// A single lock over both maps keeps the idempotency-key check and the
/// insert indivisible.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<OrderMaps>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if let Some(key) = &order.idempotency_key {
            if inner.by_key.contains_key(key) {
                return Err(StoreError::Duplicate(key.clone()));
            }
        }
        if inner.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(order.id.to_string()));
        }
        if let Some(key) = &order.idempotency_key {
            inner.by_key.insert(key.clone(), order.id);
        }
        inner.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.orders.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut all: Vec<Order> = inner.orders.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .by_key
            .get(key)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }
}
