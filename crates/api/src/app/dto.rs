use serde::Deserialize;

use lessonbook_lessons::{Lesson, LessonPatch, NewLesson};
use lessonbook_orders::Order;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateLessonRequest {
    pub topic: String,
    pub location: String,
    pub price: u64,
    pub capacity: u32,
    #[serde(default)]
    pub image: Option<String>,
}

impl CreateLessonRequest {
    pub fn into_new_lesson(self) -> NewLesson {
        NewLesson {
            topic: self.topic,
            location: self.location,
            price: self.price,
            capacity: self.capacity,
            image: self.image,
        }
    }
}

/// Unknown fields are rejected so a payload carrying `capacity` (or
/// `initial_capacity`) fails instead of silently bypassing the ledger.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLessonRequest {
    pub topic: Option<String>,
    pub location: Option<String>,
    pub price: Option<u64>,
    pub image: Option<String>,
}

impl UpdateLessonRequest {
    pub fn into_patch(self) -> LessonPatch {
        LessonPatch {
            topic: self.topic,
            location: self.location,
            price: self.price,
            image: self.image,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub lesson_id: String,
    pub seats: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub name: String,
    pub phone: String,
    pub lines: Vec<OrderLineRequest>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn lesson_to_json(lesson: &Lesson) -> serde_json::Value {
    serde_json::json!({
        "id": lesson.id.to_string(),
        "topic": lesson.topic,
        "location": lesson.location,
        "price": lesson.price,
        "capacity": lesson.capacity,
        "initial_capacity": lesson.initial_capacity,
        "image": lesson.image,
        "created_at": lesson.created_at.to_rfc3339(),
        "updated_at": lesson.updated_at.to_rfc3339(),
    })
}

pub fn order_to_json(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "id": order.id.to_string(),
        "name": order.customer_name,
        "phone": order.customer_phone,
        "lines": order.lines.iter().map(|l| serde_json::json!({
            "lesson_id": l.lesson_id.to_string(),
            "seats": l.seats,
        })).collect::<Vec<_>>(),
        "created_at": order.created_at.to_rfc3339(),
    })
}
