//! Content hierarchy.
//!
//! Courses contain stages, stages contain modules, modules contain
//! completable items. Projects contain tasks. These are read-only to
//! the sync core: authored elsewhere and loaded for rollups.

use serde::{Deserialize, Serialize};

use super::{ContentType, Department};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    /// Restricts the course to one department; `None` means everyone
    pub department: Option<Department>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub stage_id: String,
    pub title: String,
    pub position: i64,
}

/// A quiz, lesson or walkthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub module_id: String,
    pub content_type: ContentType,
    pub title: String,
    pub xp_reward: u64,
    pub currency_reward: u64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub department: Option<Department>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub position: i64,
}

/// Whether content restricted to `scope` is visible to `department`.
#[must_use]
pub fn visible_to(scope: Option<Department>, department: Department) -> bool {
    scope.is_none_or(|d| d == department)
}
