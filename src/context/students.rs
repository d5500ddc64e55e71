//! Student roster operations.

use tracing::info;

use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::model::{Cohort, Department, Student, StudentStatus, now_millis};
use crate::store::EntityKind;
use crate::sync::Mutator;

/// Profile fields a teacher may change. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentPatch {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub cohort: Option<Cohort>,
    pub department: Option<Department>,
    pub status: Option<StudentStatus>,
    pub predicted_grade: Option<String>,
}

impl StudentPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, student: &mut Student) {
        if let Some(name) = self.display_name {
            student.display_name = name;
        }
        if let Some(username) = self.username {
            student.username = Some(username);
        }
        if let Some(cohort) = self.cohort {
            student.cohort = cohort;
        }
        if let Some(department) = self.department {
            student.department = department;
        }
        if let Some(status) = self.status {
            student.status = status;
        }
        if let Some(grade) = self.predicted_grade {
            student.predicted_grade = Some(grade);
        }
    }
}

pub struct Students<'a, G> {
    mutator: &'a Mutator<G>,
}

impl<'a, G: RemoteGateway> Students<'a, G> {
    #[must_use]
    pub fn new(mutator: &'a Mutator<G>) -> Self {
        Self { mutator }
    }

    /// Students in the store, sorted by display name.
    #[must_use]
    pub fn list(&self, cohort: Option<Cohort>, status: Option<StudentStatus>) -> Vec<Student> {
        let mut students = self.mutator.store().filter(|s: &Student| {
            cohort.is_none_or(|c| s.cohort == c) && status.is_none_or(|st| s.status == st)
        });
        students.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.id.cmp(&b.id)));
        students
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the student is not loaded.
    pub fn get(&self, id: &str) -> Result<Student> {
        self.mutator
            .store()
            .get::<Student>(id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::Student,
                id: id.to_string(),
            })
    }

    /// Invite a student. The returned student carries the store's id.
    ///
    /// # Errors
    ///
    /// Returns the write error, e.g. a conflict on a taken username.
    pub async fn invite(
        &self,
        display_name: &str,
        cohort: Cohort,
        department: Department,
        username: Option<&str>,
    ) -> Result<Student> {
        if display_name.trim().is_empty() {
            return Err(Error::InvalidArgument("Display name cannot be empty".to_string()));
        }
        let mut student = Student::invite(display_name.trim(), cohort, department);
        if let Some(username) = username {
            student = student.with_username(username);
        }
        let student = self.mutator.create(student).await?;
        info!(id = %student.id, cohort = %student.cohort, "Student invited");
        Ok(student)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the write error.
    pub async fn update(&self, id: &str, patch: StudentPatch) -> Result<Student> {
        self.mutator
            .update(id, |s: &mut Student| {
                patch.apply(s);
                s.updated_at = now_millis();
            })
            .await
    }

    /// Soft delete: the student stays, marked inactive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the write error.
    pub async fn deactivate(&self, id: &str) -> Result<Student> {
        let student = self.get(id)?;
        if student.status == StudentStatus::Inactive {
            return Ok(student);
        }
        let student = self
            .update(
                id,
                StudentPatch {
                    status: Some(StudentStatus::Inactive),
                    ..StudentPatch::default()
                },
            )
            .await?;
        info!(id = %id, "Student deactivated");
        Ok(student)
    }

    /// Add xp and currency to a student's totals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the write error.
    pub async fn grant_rewards(&self, id: &str, xp: u64, currency: u64) -> Result<Student> {
        if xp == 0 && currency == 0 {
            return self.get(id);
        }
        self.mutator
            .update(id, |s: &mut Student| {
                s.xp = s.xp.saturating_add(xp);
                s.balance = s.balance.saturating_add(currency);
                s.updated_at = now_millis();
            })
            .await
    }

    /// Spend from a student's balance.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when the balance is too low;
    /// nothing is written in that case.
    pub async fn spend_balance(&self, id: &str, amount: u64) -> Result<Student> {
        let student = self.get(id)?;
        if student.balance < amount {
            return Err(Error::InvalidArgument(format!(
                "Insufficient balance: {} has {}, needs {amount}",
                student.display_name, student.balance
            )));
        }
        self.mutator
            .update(id, |s: &mut Student| {
                s.balance = s.balance.saturating_sub(amount);
                s.updated_at = now_millis();
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::fixture;
    use crate::gateway::{Filter, RemoteGateway};

    #[tokio::test]
    async fn test_invite_swaps_temp_id() {
        let f = fixture().await;
        let students = Students::new(&f.mutator);

        let invited = students
            .invite("Grace", Cohort::Advanced, Department::Creative, Some("grace"))
            .await
            .unwrap();
        assert!(!invited.has_temp_id());
        assert_eq!(students.get(&invited.id).unwrap().username.as_deref(), Some("grace"));
        assert!(students.list(None, None).iter().all(|s| !s.has_temp_id()));
    }

    #[tokio::test]
    async fn test_duplicate_username_rolls_back_with_field_alert() {
        let f = fixture().await;
        let students = Students::new(&f.mutator);
        students
            .invite("Grace", Cohort::Advanced, Department::Creative, Some("grace"))
            .await
            .unwrap();
        let before = students.list(None, None);

        let err = students
            .invite("Other", Cohort::Advanced, Department::Creative, Some("grace"))
            .await
            .unwrap_err();
        assert!(err.user_message().contains("username"));
        assert_eq!(students.list(None, None), before);
        assert_eq!(f.mutator.alerts().head().unwrap().field.as_deref(), Some("username"));
    }

    #[tokio::test]
    async fn test_deactivate_is_soft() {
        let f = fixture().await;
        let students = Students::new(&f.mutator);
        let student = students.deactivate("stu_1").await.unwrap();
        assert_eq!(student.status, StudentStatus::Inactive);

        let rows = f
            .gateway
            .select("students", &Filter::new().eq("id", "stu_1"))
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "inactive");
    }

    #[tokio::test]
    async fn test_spend_rejects_overdraft() {
        let f = fixture().await;
        let students = Students::new(&f.mutator);
        students.grant_rewards("stu_1", 50, 10).await.unwrap();

        let err = students.spend_balance("stu_1", 11).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(students.get("stu_1").unwrap().balance, 10);

        let student = students.spend_balance("stu_1", 10).await.unwrap();
        assert_eq!(student.balance, 0);
        assert_eq!(student.xp, 50);
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let f = fixture().await;
        let students = Students::new(&f.mutator);
        students
            .invite("Bob", Cohort::Foundation, Department::Creative, None)
            .await
            .unwrap();

        let names: Vec<String> = students
            .list(Some(Cohort::Foundation), None)
            .into_iter()
            .map(|s| s.display_name)
            .collect();
        assert_eq!(names, ["Ada", "Bob"]);
        assert_eq!(students.list(None, Some(StudentStatus::Active)).len(), 1);
    }
}
