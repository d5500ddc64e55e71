//! Data models for progress-sync.
//!
//! This module contains all domain entities:
//! - Student
//! - Submission, ProjectAssessment
//! - ProgressRecord
//! - Achievement, StudentAchievement, Badge, BadgeAttachment, StudentBadge
//! - Notification
//! - Content hierarchy: Course, Stage, Module, ContentItem, Project, Task
//!
//! Timestamps are Unix milliseconds.

pub mod content;
pub mod notification;
pub mod progress;
pub mod reward;
pub mod student;
pub mod submission;

pub use content::{ContentItem, Course, Module, Project, Stage, Task};
pub use notification::{Notification, NotificationKind};
pub use progress::{ContentType, ProgressRecord};
pub use reward::{
    Achievement, Badge, BadgeAttachment, BadgeTargetType, StudentAchievement, StudentBadge,
};
pub use student::{Cohort, Department, Student, StudentStatus};
pub use submission::{
    EvidenceItem, EvidenceKind, IvStatus, ProjectAssessment, Submission, SubmissionStatus,
};

/// Current time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a prefixed client-side id (e.g. `sub_1a2b3c4d5e6f`).
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}
