use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lessonbook_core::{DomainError, DomainResult, Entity, RecordId};

/// Lesson identifier.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LessonId(pub RecordId);

impl LessonId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LessonId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for LessonId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Durable record: a bookable activity offering with finite seat capacity.
///
/// `capacity` is owned by the capacity ledger. Nothing outside the ledger's
/// reserve/release path may write it; administrative edits go through
/// [`LessonPatch`], which has no capacity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub topic: String,
    pub location: String,
    /// Price in the smallest currency unit.
    pub price: u64,
    /// Seats currently available.
    pub capacity: u32,
    /// Ceiling fixed at creation; `capacity` never exceeds it.
    pub initial_capacity: u32,
    /// Static asset path for the catalog front-end.
    pub image: Option<String>,
    /// Bumped on every stored write; used for optimistic concurrency.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Lesson {
    type Id = LessonId;

    fn id(&self) -> LessonId {
        self.id
    }
}

/// Input for creating a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLesson {
    pub topic: String,
    pub location: String,
    pub price: u64,
    pub capacity: u32,
    pub image: Option<String>,
}

impl NewLesson {
    fn validate(&self) -> DomainResult<()> {
        if self.topic.trim().is_empty() {
            return Err(DomainError::validation("topic cannot be empty"));
        }
        if self.location.trim().is_empty() {
            return Err(DomainError::validation("location cannot be empty"));
        }
        if self.price == 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        Ok(())
    }
}

impl Lesson {
    /// Validate the input and build the lesson record.
    ///
    /// The capacity ceiling is fixed here: `initial_capacity` takes the
    /// creation-time capacity and is never written again.
    pub fn create(id: LessonId, new: NewLesson, now: DateTime<Utc>) -> DomainResult<Lesson> {
        new.validate()?;
        Ok(Lesson {
            id,
            topic: new.topic.trim().to_string(),
            location: new.location.trim().to_string(),
            price: new.price,
            capacity: new.capacity,
            initial_capacity: new.capacity,
            image: new.image,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Administrative edit of a lesson's descriptive fields.
///
/// Deliberately has no capacity field: capacity changes bypass this type
/// entirely and go through the ledger's conditional decrement/restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonPatch {
    pub topic: Option<String>,
    pub location: Option<String>,
    pub price: Option<u64>,
    pub image: Option<String>,
}

impl LessonPatch {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(topic) = &self.topic {
            if topic.trim().is_empty() {
                return Err(DomainError::validation("topic cannot be empty"));
            }
        }
        if let Some(location) = &self.location {
            if location.trim().is_empty() {
                return Err(DomainError::validation("location cannot be empty"));
            }
        }
        if let Some(price) = self.price {
            if price == 0 {
                return Err(DomainError::validation("price must be positive"));
            }
        }
        Ok(())
    }

    /// Apply the patch to a lesson, leaving capacity fields untouched.
    pub fn apply_to(&self, lesson: &mut Lesson, now: DateTime<Utc>) {
        if let Some(topic) = &self.topic {
            lesson.topic = topic.trim().to_string();
        }
        if let Some(location) = &self.location {
            lesson.location = location.trim().to_string();
        }
        if let Some(price) = self.price {
            lesson.price = price;
        }
        if let Some(image) = &self.image {
            lesson.image = Some(image.clone());
        }
        lesson.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_id() -> LessonId {
        LessonId::new(RecordId::new())
    }

    fn new_lesson() -> NewLesson {
        NewLesson {
            topic: "Art".to_string(),
            location: "Golders Green".to_string(),
            price: 85,
            capacity: 5,
            image: Some("/images/art.jpg".to_string()),
        }
    }

    #[test]
    fn create_fixes_the_capacity_ceiling() {
        let lesson = Lesson::create(test_id(), new_lesson(), Utc::now()).unwrap();
        assert_eq!(lesson.capacity, 5);
        assert_eq!(lesson.initial_capacity, 5);
        assert_eq!(lesson.version, 0);
    }

    #[test]
    fn create_trims_text_fields() {
        let mut new = new_lesson();
        new.topic = "  Coding ".to_string();
        new.location = " Barnet  ".to_string();
        let lesson = Lesson::create(test_id(), new, Utc::now()).unwrap();
        assert_eq!(lesson.topic, "Coding");
        assert_eq!(lesson.location, "Barnet");
    }

    #[test]
    fn create_rejects_blank_topic() {
        let mut new = new_lesson();
        new.topic = "   ".to_string();
        let err = Lesson::create(test_id(), new, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_zero_price() {
        let mut new = new_lesson();
        new.price = 0;
        let err = Lesson::create(test_id(), new, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_accepts_zero_capacity() {
        let mut new = new_lesson();
        new.capacity = 0;
        let lesson = Lesson::create(test_id(), new, Utc::now()).unwrap();
        assert_eq!(lesson.capacity, 0);
    }

    #[test]
    fn patch_rejects_blank_location() {
        let patch = LessonPatch {
            location: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            patch.validate().unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn patch_updates_only_named_fields() {
        let mut lesson = Lesson::create(test_id(), new_lesson(), Utc::now()).unwrap();
        let patch = LessonPatch {
            price: Some(95),
            ..Default::default()
        };
        patch.validate().unwrap();
        patch.apply_to(&mut lesson, Utc::now());
        assert_eq!(lesson.price, 95);
        assert_eq!(lesson.topic, "Art");
    }

    proptest! {
        #[test]
        fn patch_never_touches_capacity(
            topic in proptest::option::of("[a-zA-Z ]{1,20}"),
            location in proptest::option::of("[a-zA-Z ]{1,20}"),
            price in proptest::option::of(1u64..100_000),
            image in proptest::option::of("/images/[a-z]{1,10}\\.jpg"),
        ) {
            let mut lesson = Lesson::create(test_id(), new_lesson(), Utc::now()).unwrap();
            let before_capacity = lesson.capacity;
            let before_ceiling = lesson.initial_capacity;

            let patch = LessonPatch { topic, location, price, image };
            if patch.validate().is_ok() {
                patch.apply_to(&mut lesson, Utc::now());
            }

            prop_assert_eq!(lesson.capacity, before_capacity);
            prop_assert_eq!(lesson.initial_capacity, before_ceiling);
        }
    }
}
