//! `lessonbook-lessons` — lesson catalog domain.

pub mod lesson;

pub use lesson::{Lesson, LessonId, LessonPatch, NewLesson};
