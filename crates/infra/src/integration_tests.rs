//! End-to-end tests for the reservation pipeline:
//! OrderDraft → OrderProcessor → CapacityLedger → stores.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use lessonbook_core::RecordId;
    use lessonbook_lessons::{Lesson, LessonId, NewLesson};
    use lessonbook_orders::{Order, OrderDraft, OrderId, OrderLine};

    use crate::ledger::CapacityLedger;
    use crate::processor::{OrderProcessor, PlaceOrderError, PlaceOrderOutcome};
    use crate::store::{
        InMemoryLessonStore, InMemoryOrderStore, LessonStore, OrderStore, StoreError,
    };

    /// Order store that fails the next N inserts, for exercising the
    /// release-on-failure path.
    struct FlakyOrderStore {
        inner: InMemoryOrderStore,
        fail_remaining: AtomicU32,
    }

    impl FlakyOrderStore {
        fn failing_once() -> Self {
            Self {
                inner: InMemoryOrderStore::new(),
                fail_remaining: AtomicU32::new(1),
            }
        }
    }

    #[async_trait]
    impl OrderStore for FlakyOrderStore {
        async fn insert(&self, order: Order) -> Result<(), StoreError> {
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Backend("injected fault".to_string()));
            }
            self.inner.insert(order).await
        }

        async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<Order>, StoreError> {
            self.inner.list().await
        }

        async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
            self.inner.find_by_idempotency_key(key).await
        }
    }

    async fn seed(store: &InMemoryLessonStore, topic: &str, capacity: u32) -> LessonId {
        let lesson = Lesson::create(
            LessonId::new(RecordId::new()),
            NewLesson {
                topic: topic.to_string(),
                location: "Camden".to_string(),
                price: 80,
                capacity,
                image: None,
            },
            Utc::now(),
        )
        .unwrap();
        let id = lesson.id;
        store.insert(lesson).await.unwrap();
        id
    }

    fn draft(name: &str, phone: &str, lines: Vec<OrderLine>) -> OrderDraft {
        OrderDraft {
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            lines,
            idempotency_key: None,
        }
    }

    fn line(lesson_id: LessonId, seats: u32) -> OrderLine {
        OrderLine { lesson_id, seats }
    }

    type TestProcessor = OrderProcessor<InMemoryLessonStore, InMemoryOrderStore>;

    fn setup() -> (Arc<InMemoryLessonStore>, Arc<InMemoryOrderStore>, TestProcessor) {
        let lessons = Arc::new(InMemoryLessonStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let processor =
            OrderProcessor::new(CapacityLedger::new(lessons.clone()), orders.clone());
        (lessons, orders, processor)
    }

    #[tokio::test]
    async fn full_order_drains_the_lesson() {
        let (lessons, orders, processor) = setup();
        let l1 = seed(&lessons, "Drama", 5).await;

        let outcome = processor
            .place_order(draft("Ann", "555-1", vec![line(l1, 5)]))
            .await
            .unwrap();

        let order = outcome.order();
        assert_eq!(order.lines, vec![line(l1, 5)]);
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 0);
        assert!(orders.get(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn drained_lesson_rejects_the_next_order() {
        let (lessons, orders, processor) = setup();
        let l1 = seed(&lessons, "Drama", 5).await;

        processor
            .place_order(draft("Ann", "555-1", vec![line(l1, 5)]))
            .await
            .unwrap();

        let err = processor
            .place_order(draft("Bob", "555-2", vec![line(l1, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaceOrderError::InsufficientCapacity(id) if id == l1));
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 0);
        // Bob's order never reached storage.
        assert_eq!(orders.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_for_the_last_seats_pick_one_winner() {
        let (lessons, orders, processor) = setup();
        let l2 = seed(&lessons, "Music", 3).await;
        let processor = Arc::new(processor);
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut tasks = Vec::new();
        for (name, phone) in [("Ann", "555-1"), ("Bob", "555-2")] {
            let processor = processor.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                processor
                    .place_order(draft(name, phone, vec![line(l2, 2)]))
                    .await
            }));
        }

        let mut successes = 0;
        let mut insufficient = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(PlaceOrderError::InsufficientCapacity(id)) => {
                    assert_eq!(id, l2);
                    insufficient += 1;
                }
                Err(other) => panic!("unexpected failure: {other}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(lessons.get(l2).await.unwrap().unwrap().capacity, 1);
        assert_eq!(orders.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_draft_is_rejected_before_any_write() {
        let (lessons, orders, processor) = setup();
        let l1 = seed(&lessons, "Drama", 5).await;

        let err = processor
            .place_order(draft("", "", vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaceOrderError::Validation(_)));
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 5);
        assert!(orders.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_lesson_is_rejected_and_named() {
        let (lessons, orders, processor) = setup();
        let l1 = seed(&lessons, "Drama", 5).await;
        let ghost = LessonId::new(RecordId::new());

        let err = processor
            .place_order(draft("Cid", "555-3", vec![line(ghost, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaceOrderError::LessonNotFound(id) if id == ghost));
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 5);
        assert!(orders.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persisted_lines_match_the_observed_decrement() {
        let (lessons, orders, processor) = setup();
        let a = seed(&lessons, "Art", 5).await;
        let b = seed(&lessons, "Coding", 5).await;

        // Duplicate lines for `a` on purpose: 1 + 2 = 3 seats.
        let outcome = processor
            .place_order(draft(
                "Dee",
                "555-4",
                vec![line(a, 1), line(b, 4), line(a, 2)],
            ))
            .await
            .unwrap();

        let stored = orders.get(outcome.order().id).await.unwrap().unwrap();
        let seats_for = |id: LessonId| -> u32 {
            stored
                .lines
                .iter()
                .filter(|l| l.lesson_id == id)
                .map(|l| l.seats)
                .sum()
        };

        assert_eq!(seats_for(a), 5 - lessons.get(a).await.unwrap().unwrap().capacity);
        assert_eq!(seats_for(b), 5 - lessons.get(b).await.unwrap().unwrap().capacity);
    }

    #[tokio::test]
    async fn persistence_failure_releases_the_reservation() {
        let lessons = Arc::new(InMemoryLessonStore::new());
        let orders = Arc::new(FlakyOrderStore::failing_once());
        let processor =
            OrderProcessor::new(CapacityLedger::new(lessons.clone()), orders.clone());
        let l1 = seed(&lessons, "Science", 4).await;

        let mut attempt = draft("Eve", "555-5", vec![line(l1, 2)]);
        attempt.idempotency_key = Some("eve-retry".to_string());

        let err = processor.place_order(attempt.clone()).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Transient(_)));
        // Compensation ran: no seats lost to the failed attempt.
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 4);
        assert!(orders.list().await.unwrap().is_empty());

        // The retry with the same key goes through and reserves once.
        let outcome = processor.place_order(attempt).await.unwrap();
        assert!(matches!(outcome, PlaceOrderOutcome::Created(_)));
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 2);
    }

    #[tokio::test]
    async fn idempotency_key_replays_instead_of_reserving_twice() {
        let (lessons, orders, processor) = setup();
        let l1 = seed(&lessons, "English", 5).await;

        let mut request = draft("Fay", "555-6", vec![line(l1, 2)]);
        request.idempotency_key = Some("fay-1".to_string());

        let first = processor.place_order(request.clone()).await.unwrap();
        let second = processor.place_order(request).await.unwrap();

        let PlaceOrderOutcome::Created(first_order) = first else {
            panic!("first placement should create");
        };
        let PlaceOrderOutcome::Replayed(second_order) = second else {
            panic!("second placement should replay");
        };
        assert_eq!(first_order.id, second_order.id);
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 3);
        assert_eq!(orders.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_key_requests_reserve_once() {
        let (lessons, orders, processor) = setup();
        let l1 = seed(&lessons, "Dance", 8).await;
        let processor = Arc::new(processor);
        let barrier = Arc::new(tokio::sync::Barrier::new(4));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let processor = processor.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                let mut request = draft("Gil", "555-7", vec![line(l1, 2)]);
                request.idempotency_key = Some("gil-1".to_string());
                processor.place_order(request).await
            }));
        }

        let mut order_ids = std::collections::HashSet::new();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            order_ids.insert(outcome.order().id);
        }

        // Every caller saw the same order, and only its seats are gone.
        assert_eq!(order_ids.len(), 1);
        assert_eq!(lessons.get(l1).await.unwrap().unwrap().capacity, 6);
        assert_eq!(orders.list().await.unwrap().len(), 1);
    }
}
