//! Submission and project assessment models.
//!
//! There is at most one live submission per (task, student); a second
//! submit for the same pair overwrites the first.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Primary grading status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    PendingMark,
    Graded,
    ResubmissionRequired,
    Verified,
    InProgress,
    Late,
}

impl SubmissionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingMark => "pending_mark",
            Self::Graded => "graded",
            Self::ResubmissionRequired => "resubmission_required",
            Self::Verified => "verified",
            Self::InProgress => "in_progress",
            Self::Late => "late",
        }
    }

    /// Whether this status counts the task as done in rollups.
    #[must_use]
    pub const fn counts_as_complete(&self) -> bool {
        matches!(self, Self::Verified | Self::Graded)
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending_mark" => Ok(Self::PendingMark),
            "graded" => Ok(Self::Graded),
            "resubmission_required" => Ok(Self::ResubmissionRequired),
            "verified" => Ok(Self::Verified),
            "in_progress" => Ok(Self::InProgress),
            "late" => Ok(Self::Late),
            _ => Err(Error::InvalidStatus(format!("Unknown submission status: {s}"))),
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal-verification status, layered on top of grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvStatus {
    Pending,
    Approved,
    ActionRequired,
}

impl IvStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ActionRequired => "action_required",
        }
    }
}

impl std::str::FromStr for IvStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "action_required" => Ok(Self::ActionRequired),
            _ => Err(Error::InvalidStatus(format!("Unknown IV status: {s}"))),
        }
    }
}

/// What an evidence item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Link,
    File,
    Text,
}

/// One piece of evidence attached to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: EvidenceKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub added_at: i64,
}

impl EvidenceItem {
    /// Evidence from free-form input: URLs become links, anything else text.
    #[must_use]
    pub fn from_input(value: &str) -> Self {
        let kind = if value.starts_with("http://") || value.starts_with("https://") {
            EvidenceKind::Link
        } else {
            EvidenceKind::Text
        };
        Self {
            kind,
            value: value.to_string(),
            label: None,
            added_at: super::now_millis(),
        }
    }
}

/// A student's submission for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub task_id: String,
    pub project_id: String,
    pub student_id: String,
    pub status: SubmissionStatus,

    /// Ordered evidence
    pub evidence: Vec<EvidenceItem>,

    /// Marker feedback
    pub feedback: Option<String>,

    pub verification_requested: bool,
    pub verification_requested_at: Option<i64>,

    pub iv_status: Option<IvStatus>,
    pub iv_feedback: Option<String>,

    pub submitted_at: i64,
    pub updated_at: i64,
}

impl Submission {
    #[must_use]
    pub fn new(task_id: &str, project_id: &str, student_id: &str) -> Self {
        let now = super::now_millis();
        Self {
            id: super::new_id("sub"),
            task_id: task_id.to_string(),
            project_id: project_id.to_string(),
            student_id: student_id.to_string(),
            status: SubmissionStatus::PendingMark,
            evidence: Vec::new(),
            feedback: None,
            verification_requested: false,
            verification_requested_at: None,
            iv_status: None,
            iv_feedback: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Vec<EvidenceItem>) -> Self {
        self.evidence = evidence;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SubmissionStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether this row is the live submission for `(task_id, student_id)`.
    #[must_use]
    pub fn is_for(&self, task_id: &str, student_id: &str) -> bool {
        self.task_id == task_id && self.student_id == student_id
    }
}

/// Teacher's overall assessment of a student's project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAssessment {
    pub id: String,
    pub student_id: String,
    pub project_id: String,
    pub grade: Option<String>,
    pub feedback: Option<String>,
    pub assessed_by: Option<String>,
    pub updated_at: i64,
}

impl ProjectAssessment {
    #[must_use]
    pub fn new(student_id: &str, project_id: &str) -> Self {
        Self {
            id: super::new_id("pa"),
            student_id: student_id.to_string(),
            project_id: project_id.to_string(),
            grade: None,
            feedback: None,
            assessed_by: None,
            updated_at: super::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_statuses() {
        assert!(SubmissionStatus::Verified.counts_as_complete());
        assert!(SubmissionStatus::Graded.counts_as_complete());
        assert!(!SubmissionStatus::PendingMark.counts_as_complete());
        assert!(!SubmissionStatus::ResubmissionRequired.counts_as_complete());
    }

    #[test]
    fn test_evidence_from_input() {
        assert_eq!(
            EvidenceItem::from_input("https://example.com/work").kind,
            EvidenceKind::Link
        );
        assert_eq!(EvidenceItem::from_input("see attached").kind, EvidenceKind::Text);
    }

    #[test]
    fn test_unknown_status_is_invalid_status() {
        let err = "done-ish".parse::<SubmissionStatus>().unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(_)));
    }
}
