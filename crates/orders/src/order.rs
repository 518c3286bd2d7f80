use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lessonbook_core::{DomainError, DomainResult, Entity, RecordId};
use lessonbook_lessons::LessonId;

/// Order identifier.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(pub RecordId);

impl OrderId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for OrderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// One requested line: seats against one lesson.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub lesson_id: LessonId,
    pub seats: u32,
}

/// Immutable record of a confirmed order.
///
/// Exists in storage only if every line's reservation succeeded; never
/// edited afterwards. `lines` keeps the sequence as submitted (duplicate
/// lesson ids allowed); reservation works on the coalesced form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_name: String,
    pub customer_phone: String,
    pub lines: Vec<OrderLine>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> OrderId {
        self.id
    }
}

/// Validated input for placing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub customer_name: String,
    pub customer_phone: String,
    pub lines: Vec<OrderLine>,
    /// Caller-supplied retry guard. Requests replayed with the same key
    /// return the originally persisted order instead of reserving again.
    pub idempotency_key: Option<String>,
}

impl OrderDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.customer_name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        if self.customer_phone.trim().is_empty() {
            return Err(DomainError::validation("customer phone cannot be empty"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }
        for (idx, line) in self.lines.iter().enumerate() {
            if line.seats == 0 {
                return Err(DomainError::validation(format!(
                    "line {idx}: seats must be positive"
                )));
            }
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(DomainError::validation("idempotency key cannot be empty"));
            }
        }
        Ok(())
    }

    /// Build the order record from a validated draft.
    pub fn into_order(self, id: OrderId, created_at: DateTime<Utc>) -> Order {
        Order {
            id,
            customer_name: self.customer_name.trim().to_string(),
            customer_phone: self.customer_phone.trim().to_string(),
            lines: self.lines,
            idempotency_key: self.idempotency_key,
            created_at,
        }
    }
}

/// Sum seats per lesson id, preserving first-occurrence order.
///
/// The result's ordering matters: capacity errors are attributed to the
/// first referenced lesson in submission order.
pub fn coalesce_lines(lines: &[OrderLine]) -> DomainResult<Vec<OrderLine>> {
    let mut coalesced: Vec<OrderLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match coalesced.iter_mut().find(|c| c.lesson_id == line.lesson_id) {
            Some(existing) => {
                existing.seats = existing.seats.checked_add(line.seats).ok_or_else(|| {
                    DomainError::validation(format!(
                        "total seats for lesson {} overflow",
                        line.lesson_id
                    ))
                })?;
            }
            None => coalesced.push(*line),
        }
    }
    Ok(coalesced)
}
