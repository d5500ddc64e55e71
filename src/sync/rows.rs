//! Mapping between remote rows and entities.
//!
//! This is the one place that knows remote column names. Readers are
//! lenient: optional columns the remote schema lacks (or returns null
//! for) fall back to defaults, and list columns accept either a JSON
//! value or JSON text. Only identity columns are required.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::gateway::Row;
use crate::model::{
    Achievement, Badge, BadgeAttachment, ContentItem, Course, EvidenceItem, Module, Notification,
    ProgressRecord, Project, ProjectAssessment, Stage, Student, StudentAchievement, StudentBadge,
    Submission, Task,
};
use crate::store::Stored;

/// An entity that round-trips through a remote table.
pub trait RemoteRecord: Stored {
    /// Remote table name.
    fn table() -> &'static str {
        Self::KIND.table()
    }

    /// Map a remote row to the entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] when a required column is missing or
    /// holds an unparseable value.
    fn from_row(row: &Row) -> Result<Self>;

    /// Full row for this entity.
    fn to_row(&self) -> Row;

    /// Payload for an insert. Defaults to the full row.
    fn insert_payload(&self) -> Row {
        self.to_row()
    }
}

fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

struct Reader<'a> {
    table: &'static str,
    row: &'a Row,
}

impl<'a> Reader<'a> {
    fn new<T: RemoteRecord>(row: &'a Row) -> Self {
        Self {
            table: T::table(),
            row,
        }
    }

    fn value(&self, column: &str) -> Option<&'a Value> {
        self.row.get(column).filter(|v| !v.is_null())
    }

    fn missing(&self, column: &str) -> Error {
        Error::mapping(self.table, format!("missing column '{column}'"))
    }

    fn string(&self, column: &str) -> Result<String> {
        self.opt_string(column).ok_or_else(|| self.missing(column))
    }

    fn opt_string(&self, column: &str) -> Option<String> {
        match self.value(column)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn opt_i64(&self, column: &str) -> Option<i64> {
        match self.value(column)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn i64_or(&self, column: &str, default: i64) -> i64 {
        self.opt_i64(column).unwrap_or(default)
    }

    /// Non-negative counter; negative values clamp to zero.
    fn u64_or_zero(&self, column: &str) -> u64 {
        self.opt_i64(column)
            .map_or(0, |v| u64::try_from(v).unwrap_or(0))
    }

    fn bool_or(&self, column: &str, default: bool) -> bool {
        match self.value(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "t" | "1"),
            _ => default,
        }
    }

    fn parse<T: FromStr<Err = Error>>(&self, column: &str) -> Result<T> {
        let raw = self.string(column)?;
        raw.parse()
            .map_err(|e: Error| Error::mapping(self.table, format!("column '{column}': {e}")))
    }

    fn parse_or<T: FromStr<Err = Error>>(&self, column: &str, default: T) -> Result<T> {
        match self.opt_string(column) {
            Some(_) => self.parse(column),
            None => Ok(default),
        }
    }

    fn opt_parse<T: FromStr<Err = Error>>(&self, column: &str) -> Result<Option<T>> {
        match self.opt_string(column) {
            Some(_) => self.parse(column).map(Some),
            None => Ok(None),
        }
    }

    /// JSON column held either as a value or as JSON text.
    fn json<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>> {
        let Some(value) = self.value(column) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        };
        parsed
            .map(Some)
            .map_err(|e| Error::mapping(self.table, format!("column '{column}': {e}")))
    }
}

impl RemoteRecord for Student {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            display_name: r.opt_string("display_name").unwrap_or_default(),
            username: r.opt_string("username"),
            cohort: r.parse("cohort")?,
            department: r.parse("department")?,
            status: r.parse_or("status", crate::model::StudentStatus::InvitePending)?,
            xp: r.u64_or_zero("xp"),
            balance: r.u64_or_zero("balance"),
            predicted_grade: r.opt_string("predicted_grade"),
            created_at: r.i64_or("created_at", 0),
            updated_at: r.i64_or("updated_at", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "display_name": self.display_name,
            "username": self.username,
            "cohort": self.cohort.as_str(),
            "department": self.department.as_str(),
            "status": self.status.as_str(),
            "xp": self.xp,
            "balance": self.balance,
            "predicted_grade": self.predicted_grade,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        }))
    }

    /// The store assigns student ids; a placeholder id is never sent.
    fn insert_payload(&self) -> Row {
        let mut row = self.to_row();
        if self.has_temp_id() {
            row.remove("id");
        }
        if self.predicted_grade.is_none() {
            row.remove("predicted_grade");
        }
        row
    }
}

impl RemoteRecord for Submission {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        let submitted_at = r.i64_or("submitted_at", 0);
        Ok(Self {
            id: r.string("id")?,
            task_id: r.string("task_id")?,
            project_id: r.opt_string("project_id").unwrap_or_default(),
            student_id: r.string("student_id")?,
            status: r.parse_or("status", crate::model::SubmissionStatus::PendingMark)?,
            evidence: r.json::<Vec<EvidenceItem>>("evidence")?.unwrap_or_default(),
            feedback: r.opt_string("feedback"),
            verification_requested: r.bool_or("verification_requested", false),
            verification_requested_at: r.opt_i64("verification_requested_at"),
            iv_status: r.opt_parse("iv_status")?,
            iv_feedback: r.opt_string("iv_feedback"),
            submitted_at,
            updated_at: r.i64_or("updated_at", submitted_at),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "task_id": self.task_id,
            "project_id": self.project_id,
            "student_id": self.student_id,
            "status": self.status.as_str(),
            "evidence": self.evidence,
            "feedback": self.feedback,
            "verification_requested": self.verification_requested,
            "verification_requested_at": self.verification_requested_at,
            "iv_status": self.iv_status.map(|s| s.as_str()),
            "iv_feedback": self.iv_feedback,
            "submitted_at": self.submitted_at,
            "updated_at": self.updated_at,
        }))
    }
}

impl RemoteRecord for ProjectAssessment {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            student_id: r.string("student_id")?,
            project_id: r.string("project_id")?,
            grade: r.opt_string("grade"),
            feedback: r.opt_string("feedback"),
            assessed_by: r.opt_string("assessed_by"),
            updated_at: r.i64_or("updated_at", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "student_id": self.student_id,
            "project_id": self.project_id,
            "grade": self.grade,
            "feedback": self.feedback,
            "assessed_by": self.assessed_by,
            "updated_at": self.updated_at,
        }))
    }
}

impl RemoteRecord for ProgressRecord {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            student_id: r.string("student_id")?,
            content_type: r.parse("content_type")?,
            content_id: r.string("content_id")?,
            completed: r.bool_or("completed", false),
            completed_at: r.opt_i64("completed_at"),
            xp_awarded: r.u64_or_zero("xp_awarded"),
            currency_awarded: r.u64_or_zero("currency_awarded"),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "student_id": self.student_id,
            "content_type": self.content_type.as_str(),
            "content_id": self.content_id,
            "completed": self.completed,
            "completed_at": self.completed_at,
            "xp_awarded": self.xp_awarded,
            "currency_awarded": self.currency_awarded,
        }))
    }
}

impl RemoteRecord for Achievement {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            title: r.opt_string("title").unwrap_or_default(),
            description: r.opt_string("description"),
            category: r.opt_string("category").unwrap_or_else(|| "general".to_string()),
            xp_value: r.u64_or_zero("xp_value"),
            criteria: r.json("criteria")?,
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "title": self.title,
            "description": self.description,
            "category": self.category,
            "xp_value": self.xp_value,
            "criteria": self.criteria,
        }))
    }
}

impl RemoteRecord for StudentAchievement {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            student_id: r.string("student_id")?,
            achievement_id: r.string("achievement_id")?,
            earned_at: r.i64_or("earned_at", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "student_id": self.student_id,
            "achievement_id": self.achievement_id,
            "earned_at": self.earned_at,
        }))
    }
}

impl RemoteRecord for Badge {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            name: r.opt_string("name").unwrap_or_default(),
            description: r.opt_string("description"),
            icon: r.opt_string("icon"),
            color: r.opt_string("color"),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "icon": self.icon,
            "color": self.color,
        }))
    }
}

impl RemoteRecord for BadgeAttachment {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            badge_id: r.string("badge_id")?,
            target_type: r.parse("target_type")?,
            target_id: r.string("target_id")?,
            created_at: r.i64_or("created_at", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "badge_id": self.badge_id,
            "target_type": self.target_type.as_str(),
            "target_id": self.target_id,
            "created_at": self.created_at,
        }))
    }
}

impl RemoteRecord for StudentBadge {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            student_id: r.string("student_id")?,
            badge_id: r.string("badge_id")?,
            awarded_at: r.i64_or("awarded_at", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "student_id": self.student_id,
            "badge_id": self.badge_id,
            "awarded_at": self.awarded_at,
        }))
    }
}

impl RemoteRecord for Notification {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            user_id: r.string("user_id")?,
            title: r.opt_string("title").unwrap_or_default(),
            message: r.opt_string("message").unwrap_or_default(),
            kind: r.parse_or("kind", crate::model::NotificationKind::Info)?,
            link: r.opt_string("link"),
            is_read: r.bool_or("is_read", false),
            created_at: r.i64_or("created_at", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "user_id": self.user_id,
            "title": self.title,
            "message": self.message,
            "kind": self.kind.as_str(),
            "link": self.link,
            "is_read": self.is_read,
            "created_at": self.created_at,
        }))
    }
}

impl RemoteRecord for Course {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            title: r.opt_string("title").unwrap_or_default(),
            department: r.opt_parse("department")?,
            position: r.i64_or("position", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "title": self.title,
            "department": self.department.map(|d| d.as_str()),
            "position": self.position,
        }))
    }
}

impl RemoteRecord for Stage {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            course_id: r.string("course_id")?,
            title: r.opt_string("title").unwrap_or_default(),
            position: r.i64_or("position", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "course_id": self.course_id,
            "title": self.title,
            "position": self.position,
        }))
    }
}

impl RemoteRecord for Module {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            stage_id: r.string("stage_id")?,
            title: r.opt_string("title").unwrap_or_default(),
            position: r.i64_or("position", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "stage_id": self.stage_id,
            "title": self.title,
            "position": self.position,
        }))
    }
}

impl RemoteRecord for ContentItem {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            module_id: r.string("module_id")?,
            content_type: r.parse("content_type")?,
            title: r.opt_string("title").unwrap_or_default(),
            xp_reward: r.u64_or_zero("xp_reward"),
            currency_reward: r.u64_or_zero("currency_reward"),
            position: r.i64_or("position", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "module_id": self.module_id,
            "content_type": self.content_type.as_str(),
            "title": self.title,
            "xp_reward": self.xp_reward,
            "currency_reward": self.currency_reward,
            "position": self.position,
        }))
    }
}

impl RemoteRecord for Project {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            title: r.opt_string("title").unwrap_or_default(),
            department: r.opt_parse("department")?,
            position: r.i64_or("position", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "title": self.title,
            "department": self.department.map(|d| d.as_str()),
            "position": self.position,
        }))
    }
}

impl RemoteRecord for Task {
    fn from_row(row: &Row) -> Result<Self> {
        let r = Reader::new::<Self>(row);
        Ok(Self {
            id: r.string("id")?,
            project_id: r.string("project_id")?,
            title: r.opt_string("title").unwrap_or_default(),
            position: r.i64_or("position", 0),
        })
    }

    fn to_row(&self) -> Row {
        object(json!({
            "id": self.id,
            "project_id": self.project_id,
            "title": self.title,
            "position": self.position,
        }))
    }
}

/// Map every row, failing on the first unmappable one.
///
/// # Errors
///
/// Returns the first mapping error.
pub fn map_rows<T: RemoteRecord>(rows: &[Row]) -> Result<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}

/// Map every row, skipping (and logging) rows that cannot be mapped.
#[must_use]
pub fn map_rows_lenient<T: RemoteRecord>(rows: &[Row]) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match T::from_row(row) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(table = T::table(), error = %e, "Skipping unmappable row");
                None
            }
        })
        .collect()
}

/// Columns of `after` whose values differ from `before`.
#[must_use]
pub fn changed_columns(before: &Row, after: &Row) -> Row {
    after
        .iter()
        .filter(|(column, value)| before.get(*column) != Some(*value))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cohort, Department, EvidenceKind, StudentStatus, SubmissionStatus};

    #[test]
    fn test_student_from_sqlite_row() {
        let row = object(json!({
            "id": "ab12",
            "display_name": "Ada",
            "username": null,
            "cohort": "advanced",
            "department": "engineering",
            "status": "active",
            "xp": 120,
            "balance": 5,
            "created_at": 1,
            "updated_at": 2,
        }));
        let student = Student::from_row(&row).unwrap();
        assert_eq!(student.cohort, Cohort::Advanced);
        assert_eq!(student.status, StudentStatus::Active);
        assert_eq!(student.xp, 120);
        assert!(student.predicted_grade.is_none());
    }

    #[test]
    fn test_student_insert_payload_omits_temp_id() {
        let student = Student::invite("Ada", Cohort::Foundation, Department::Creative);
        let payload = student.insert_payload();
        assert!(!payload.contains_key("id"));
        assert!(!payload.contains_key("predicted_grade"));
        assert_eq!(payload["display_name"], "Ada");
    }

    #[test]
    fn test_submission_evidence_from_text_or_value() {
        let evidence = json!([{"kind": "link", "value": "https://x.test", "added_at": 1}]);
        let base = json!({
            "id": "sub_1", "task_id": "t1", "project_id": "p1", "student_id": "s1",
            "status": "verified", "submitted_at": 5, "verification_requested": 1,
        });

        let mut as_text = object(base.clone());
        as_text.insert("evidence".into(), Value::String(evidence.to_string()));
        let mut as_value = object(base);
        as_value.insert("evidence".into(), evidence);

        let a = Submission::from_row(&as_text).unwrap();
        let b = Submission::from_row(&as_value).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.evidence[0].kind, EvidenceKind::Link);
        assert_eq!(a.status, SubmissionStatus::Verified);
        assert!(a.verification_requested);
        assert_eq!(a.updated_at, 5);
    }

    #[test]
    fn test_missing_identity_column_is_mapping_error() {
        let row = object(json!({"student_id": "s1", "badge_id": "b1"}));
        let err = StudentBadge::from_row(&row).unwrap_err();
        assert!(matches!(err, Error::Mapping { ref table, .. } if table == "student_badges"));
    }

    #[test]
    fn test_bad_enum_is_mapping_error() {
        let row = object(json!({
            "id": "p1", "student_id": "s1", "content_type": "podcast", "content_id": "c1",
        }));
        assert!(matches!(
            ProgressRecord::from_row(&row),
            Err(Error::Mapping { .. })
        ));
    }

    #[test]
    fn test_changed_columns() {
        let before = object(json!({"id": "s1", "xp": 1, "status": "active"}));
        let after = object(json!({"id": "s1", "xp": 2, "status": "active"}));
        let patch = changed_columns(&before, &after);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch["xp"], 2);
    }
}
