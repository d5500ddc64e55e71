//! Task submissions, grading and internal verification.
//!
//! There is at most one live submission per (task, student); submitting
//! again overwrites it through a composite-key upsert.

use std::cmp::Reverse;

use tracing::{info, warn};

use crate::celebration::Celebrations;
use crate::context::notifications::Notifications;
use crate::context::rewards::Rewards;
use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::model::{
    BadgeTargetType, EvidenceItem, IvStatus, NotificationKind, ProjectAssessment, StudentBadge,
    Submission, SubmissionStatus, Task, now_millis,
};
use crate::progress::{ProgressEngine, ProgressSnapshot};
use crate::store::EntityKind;
use crate::sync::Mutator;

const SUBMISSION_CONFLICT_KEYS: &[&str] = &["task_id", "student_id"];
const ASSESSMENT_CONFLICT_KEYS: &[&str] = &["student_id", "project_id"];

/// A teacher's marking decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Pass,
    Resubmit,
}

impl Grade {
    #[must_use]
    pub const fn status(self) -> SubmissionStatus {
        match self {
            Self::Pass => SubmissionStatus::Graded,
            Self::Resubmit => SubmissionStatus::ResubmissionRequired,
        }
    }
}

pub struct Submissions<'a, G> {
    mutator: &'a Mutator<G>,
    celebrations: &'a Celebrations,
}

impl<'a, G: RemoteGateway> Submissions<'a, G> {
    #[must_use]
    pub fn new(mutator: &'a Mutator<G>, celebrations: &'a Celebrations) -> Self {
        Self {
            mutator,
            celebrations,
        }
    }

    /// Loaded submissions, most recently updated first.
    #[must_use]
    pub fn list(
        &self,
        student_id: Option<&str>,
        status: Option<SubmissionStatus>,
    ) -> Vec<Submission> {
        let mut items = self.mutator.store().filter(|s: &Submission| {
            student_id.is_none_or(|id| s.student_id == id) && status.is_none_or(|st| s.status == st)
        });
        items.sort_by_key(|s| (Reverse(s.updated_at), s.id.clone()));
        items
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it is not loaded.
    pub fn get(&self, id: &str) -> Result<Submission> {
        self.mutator
            .store()
            .get::<Submission>(id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::Submission,
                id: id.to_string(),
            })
    }

    /// Submit work for a task, replacing any earlier submission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task, or the write error.
    pub async fn submit(
        &self,
        task_id: &str,
        student_id: &str,
        evidence: Vec<EvidenceItem>,
    ) -> Result<Submission> {
        let mut submission = self.live_or_new(task_id, student_id)?;
        submission.status = SubmissionStatus::PendingMark;
        submission.evidence = evidence;
        submission.updated_at = now_millis();
        submission.submitted_at = submission.updated_at;

        let submission = self.save(submission).await?;
        info!(id = %submission.id, task_id = %task_id, student_id = %student_id, "Work submitted");
        Ok(submission)
    }

    /// Ask a teacher to verify a task. Creates the submission if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task, or the write error.
    pub async fn request_verification(&self, task_id: &str, student_id: &str) -> Result<Submission> {
        let mut submission = self.live_or_new(task_id, student_id)?;
        if submission.verification_requested {
            return Ok(submission);
        }
        let now = now_millis();
        submission.verification_requested = true;
        submission.verification_requested_at = Some(now);
        submission.updated_at = now;
        self.save(submission).await
    }

    /// Mark a submission.
    ///
    /// The student is notified once the grade is saved. A pass completes
    /// the task and may unlock badges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the write error.
    pub async fn grade(
        &self,
        id: &str,
        grade: Grade,
        feedback: Option<&str>,
    ) -> Result<(Submission, Vec<StudentBadge>)> {
        let submission = self
            .mutator
            .update(id, |s: &mut Submission| {
                s.status = grade.status();
                if let Some(feedback) = feedback {
                    s.feedback = Some(feedback.to_string());
                }
                s.updated_at = now_millis();
            })
            .await?;
        info!(id = %id, status = %submission.status, "Submission graded");

        let (title, message) = match grade {
            Grade::Pass => ("Work graded", "Your submission has been graded."),
            Grade::Resubmit => (
                "Resubmission required",
                "Your submission needs changes before it can be graded.",
            ),
        };
        self.notify(&submission, title, message).await;
        let badges = self.after_status_change(&submission).await;
        Ok((submission, badges))
    }

    /// Sign a submission off as verified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the write error.
    pub async fn verify(&self, id: &str) -> Result<(Submission, Vec<StudentBadge>)> {
        let submission = self
            .mutator
            .update(id, |s: &mut Submission| {
                s.status = SubmissionStatus::Verified;
                s.verification_requested = false;
                s.updated_at = now_millis();
            })
            .await?;
        info!(id = %id, "Submission verified");
        self.notify(&submission, "Work verified", "Your submission has been verified.")
            .await;
        let badges = self.after_status_change(&submission).await;
        Ok((submission, badges))
    }

    /// Record the internal verifier's decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the write error.
    pub async fn review_iv(
        &self,
        id: &str,
        status: IvStatus,
        feedback: Option<&str>,
    ) -> Result<Submission> {
        self.mutator
            .update(id, |s: &mut Submission| {
                s.iv_status = Some(status);
                s.iv_feedback = feedback.map(ToString::to_string);
                s.updated_at = now_millis();
            })
            .await
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or the remote error.
    pub async fn delete(&self, id: &str) -> Result<Submission> {
        self.mutator.delete::<Submission>(id).await
    }

    /// Save the overall assessment of a project for a student.
    ///
    /// # Errors
    ///
    /// Returns the write error.
    pub async fn assess_project(
        &self,
        student_id: &str,
        project_id: &str,
        grade: Option<&str>,
        feedback: Option<&str>,
        assessed_by: &str,
    ) -> Result<ProjectAssessment> {
        let matches = |a: &ProjectAssessment| a.student_id == student_id && a.project_id == project_id;
        let mut assessment = self
            .mutator
            .store()
            .find(matches)
            .unwrap_or_else(|| ProjectAssessment::new(student_id, project_id));
        assessment.grade = grade.map(ToString::to_string);
        assessment.feedback = feedback.map(ToString::to_string);
        assessment.assessed_by = Some(assessed_by.to_string());
        assessment.updated_at = now_millis();

        self.mutator
            .upsert_by(assessment, matches, ASSESSMENT_CONFLICT_KEYS)
            .await
    }

    fn live_or_new(&self, task_id: &str, student_id: &str) -> Result<Submission> {
        if let Some(live) = self
            .mutator
            .store()
            .find(|s: &Submission| s.is_for(task_id, student_id))
        {
            return Ok(live);
        }
        let task = self
            .mutator
            .store()
            .get::<Task>(task_id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::Task,
                id: task_id.to_string(),
            })?;
        Ok(Submission::new(task_id, &task.project_id, student_id))
    }

    async fn save(&self, submission: Submission) -> Result<Submission> {
        let task_id = submission.task_id.clone();
        let student_id = submission.student_id.clone();
        self.mutator
            .upsert_by(
                submission,
                |s: &Submission| s.is_for(&task_id, &student_id),
                SUBMISSION_CONFLICT_KEYS,
            )
            .await
    }

    /// Badges for a task that now counts as complete, and for its
    /// project when that reached 100.
    ///
    /// The status change is already committed, so award failures are
    /// logged rather than returned.
    async fn after_status_change(&self, submission: &Submission) -> Vec<StudentBadge> {
        if !submission.status.counts_as_complete() {
            return Vec::new();
        }
        let rewards = Rewards::new(self.mutator, self.celebrations);
        let mut badges = rewards
            .award_attached_or_log(
                &submission.student_id,
                BadgeTargetType::Task,
                &submission.task_id,
            )
            .await;

        let project_done = {
            let snapshot = ProgressSnapshot::from_store(self.mutator.store());
            ProgressEngine::new(&snapshot)
                .project_completion(&submission.student_id, &submission.project_id)
                .is_done()
        };
        if project_done {
            badges.extend(
                rewards
                    .award_attached_or_log(
                        &submission.student_id,
                        BadgeTargetType::Project,
                        &submission.project_id,
                    )
                    .await,
            );
        }
        badges
    }

    async fn notify(&self, submission: &Submission, title: &str, message: &str) {
        if let Err(e) = Notifications::new(self.mutator)
            .notify(
                &submission.student_id,
                title,
                message,
                NotificationKind::Grade,
                Some(&format!("/projects/{}", submission.project_id)),
            )
            .await
        {
            warn!(submission_id = %submission.id, error = %e, "Could not write notification");
        }
    }
}
