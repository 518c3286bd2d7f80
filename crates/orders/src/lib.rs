//! `lessonbook-orders` — customer order domain.

pub mod order;

pub use order::{coalesce_lines, Order, OrderDraft, OrderId, OrderLine};
