//! Achievements and badges.
//!
//! Earning an achievement is one-way and grants its xp once. Badges are
//! free-standing; attachments bind a badge to a content entity so that
//! completing the entity awards it. Detaching never revokes a badge a
//! student already holds.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An achievement definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub xp_value: u64,
    /// Free-form unlock criteria
    pub criteria: Option<serde_json::Value>,
}

/// An achievement earned by a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentAchievement {
    pub id: String,
    pub student_id: String,
    pub achievement_id: String,
    pub earned_at: i64,
}

impl StudentAchievement {
    #[must_use]
    pub fn earned(student_id: &str, achievement_id: &str) -> Self {
        Self {
            id: super::new_id("sa"),
            student_id: student_id.to_string(),
            achievement_id: achievement_id.to_string(),
            earned_at: super::now_millis(),
        }
    }
}

/// A badge definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

/// What a badge can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTargetType {
    Course,
    Module,
    Stage,
    Project,
    Task,
    Achievement,
}

impl BadgeTargetType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Module => "module",
            Self::Stage => "stage",
            Self::Project => "project",
            Self::Task => "task",
            Self::Achievement => "achievement",
        }
    }
}

impl std::str::FromStr for BadgeTargetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "course" => Ok(Self::Course),
            "module" => Ok(Self::Module),
            "stage" => Ok(Self::Stage),
            "project" => Ok(Self::Project),
            "task" => Ok(Self::Task),
            "achievement" => Ok(Self::Achievement),
            _ => Err(Error::InvalidArgument(format!("Unknown badge target: {s}"))),
        }
    }
}

impl std::fmt::Display for BadgeTargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a badge to a content entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeAttachment {
    pub id: String,
    pub badge_id: String,
    pub target_type: BadgeTargetType,
    pub target_id: String,
    pub created_at: i64,
}

impl BadgeAttachment {
    #[must_use]
    pub fn new(badge_id: &str, target_type: BadgeTargetType, target_id: &str) -> Self {
        Self {
            id: super::new_id("batt"),
            badge_id: badge_id.to_string(),
            target_type,
            target_id: target_id.to_string(),
            created_at: super::now_millis(),
        }
    }

    #[must_use]
    pub fn targets(&self, target_type: BadgeTargetType, target_id: &str) -> bool {
        self.target_type == target_type && self.target_id == target_id
    }
}

/// A badge held by a student. Unique per `(student_id, badge_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentBadge {
    pub id: String,
    pub student_id: String,
    pub badge_id: String,
    pub awarded_at: i64,
}

impl StudentBadge {
    #[must_use]
    pub fn awarded(student_id: &str, badge_id: &str) -> Self {
        Self {
            id: super::new_id("sb"),
            student_id: student_id.to_string(),
            badge_id: badge_id.to_string(),
            awarded_at: super::now_millis(),
        }
    }
}
