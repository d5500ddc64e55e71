//! Completion records for content items.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kinds of completable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Quiz,
    Lesson,
    Walkthrough,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Lesson => "lesson",
            Self::Walkthrough => "walkthrough",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quiz" => Ok(Self::Quiz),
            "lesson" => Ok(Self::Lesson),
            "walkthrough" => Ok(Self::Walkthrough),
            _ => Err(Error::InvalidArgument(format!("Unknown content type: {s}"))),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion of one content item by one student.
///
/// Keyed by `(student_id, content_type, content_id)`. Once `completed`
/// is true the rewards recorded here are never granted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: String,
    pub student_id: String,
    pub content_type: ContentType,
    pub content_id: String,
    pub completed: bool,
    pub completed_at: Option<i64>,
    pub xp_awarded: u64,
    pub currency_awarded: u64,
}

impl ProgressRecord {
    /// A completed record stamped now.
    #[must_use]
    pub fn completed(
        student_id: &str,
        content_type: ContentType,
        content_id: &str,
        xp: u64,
        currency: u64,
    ) -> Self {
        Self {
            id: super::new_id("prog"),
            student_id: student_id.to_string(),
            content_type,
            content_id: content_id.to_string(),
            completed: true,
            completed_at: Some(super::now_millis()),
            xp_awarded: xp,
            currency_awarded: currency,
        }
    }

    /// Whether this record is for the given triple.
    #[must_use]
    pub fn is_for(&self, student_id: &str, content_type: ContentType, content_id: &str) -> bool {
        self.student_id == student_id
            && self.content_type == content_type
            && self.content_id == content_id
    }
}
