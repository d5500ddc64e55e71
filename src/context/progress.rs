//! Content completion.
//!
//! Completing a (student, content type, content id) triple is
//! idempotent: the first confirmed completion grants the item's xp and
//! currency and queues a celebration; every later call returns the
//! existing record and does nothing else. A completion whose grant
//! fails is undone, so it is never left recorded but unpaid.

use serde::Serialize;
use tracing::{error, info};

use crate::celebration::{CelebrationEvent, CelebrationKind, Celebrations};
use crate::context::rewards::Rewards;
use crate::context::students::Students;
use crate::error::{Error, Result};
use crate::gateway::{Filter, RemoteGateway};
use crate::model::{
    BadgeTargetType, ContentItem, ContentType, Module, ProgressRecord, Stage, StudentBadge,
};
use crate::progress::{ProgressEngine, ProgressSnapshot, StudentProgressReport};
use crate::store::EntityKind;
use crate::sync::Mutator;

const PROGRESS_CONFLICT_KEYS: &[&str] = &["student_id", "content_type", "content_id"];

/// What a completion call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    pub record: ProgressRecord,
    /// `true` when the item was already complete; nothing was granted.
    pub already_complete: bool,
    pub xp_awarded: u64,
    pub currency_awarded: u64,
    /// Badges unlocked by finishing a module, stage or course.
    pub badges: Vec<StudentBadge>,
}

pub struct Progress<'a, G> {
    mutator: &'a Mutator<G>,
    celebrations: &'a Celebrations,
}

impl<'a, G: RemoteGateway> Progress<'a, G> {
    #[must_use]
    pub fn new(mutator: &'a Mutator<G>, celebrations: &'a Celebrations) -> Self {
        Self {
            mutator,
            celebrations,
        }
    }

    /// `student_id`'s report from the current store contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the student is not loaded.
    pub fn report(&self, student_id: &str) -> Result<StudentProgressReport> {
        let snapshot = ProgressSnapshot::from_store(self.mutator.store());
        let student = snapshot
            .students
            .iter()
            .find(|s| s.id == student_id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::Student,
                id: student_id.to_string(),
            })?;
        Ok(ProgressEngine::new(&snapshot).student_report(student))
    }

    /// Mark a content item complete for a student.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown student or content,
    /// `Error::InvalidArgument` when `content_type` does not match the
    /// item, or the write error. Badge awards run after the completion
    /// is committed; their failures are logged and do not fail the call.
    pub async fn mark_complete(
        &self,
        student_id: &str,
        content_type: ContentType,
        content_id: &str,
    ) -> Result<CompletionOutcome> {
        let students = Students::new(self.mutator);
        students.get(student_id)?;
        let item = self
            .mutator
            .store()
            .get::<ContentItem>(content_id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::ContentItem,
                id: content_id.to_string(),
            })?;
        if item.content_type != content_type {
            return Err(Error::InvalidArgument(format!(
                "{content_id} is a {}, not a {content_type}",
                item.content_type
            )));
        }

        if let Some(record) = self.existing(student_id, content_type, content_id).await? {
            return Ok(CompletionOutcome {
                record,
                already_complete: true,
                xp_awarded: 0,
                currency_awarded: 0,
                badges: Vec::new(),
            });
        }

        let mut record = ProgressRecord::completed(
            student_id,
            content_type,
            content_id,
            item.xp_reward,
            item.currency_reward,
        );
        let matches = |r: &ProgressRecord| r.is_for(student_id, content_type, content_id);
        // An incomplete record keeps its id.
        let open = self.mutator.store().find(matches);
        if let Some(open) = &open {
            record.id.clone_from(&open.id);
        }

        let record = self
            .mutator
            .upsert_by(record, matches, PROGRESS_CONFLICT_KEYS)
            .await?;

        if let Err(e) = students
            .grant_rewards(student_id, item.xp_reward, item.currency_reward)
            .await
        {
            self.undo_completion(&record, open).await;
            return Err(e);
        }
        info!(
            student_id = %student_id,
            content_type = %content_type,
            content_id = %content_id,
            xp = item.xp_reward,
            "Content completed"
        );
        self.celebrations.enqueue(
            CelebrationEvent::new(
                CelebrationKind::Completion,
                &format!("{} complete!", capitalize(content_type.as_str())),
                &item.title,
            )
            .with_xp(item.xp_reward),
        );

        let badges = self.award_rollup_badges(student_id, &item).await;

        Ok(CompletionOutcome {
            record,
            already_complete: false,
            xp_awarded: item.xp_reward,
            currency_awarded: item.currency_reward,
            badges,
        })
    }

    /// A completed record for the triple, from the store or the remote.
    async fn existing(
        &self,
        student_id: &str,
        content_type: ContentType,
        content_id: &str,
    ) -> Result<Option<ProgressRecord>> {
        let matches = |r: &ProgressRecord| r.is_for(student_id, content_type, content_id);
        if let Some(local) = self.mutator.store().find(matches) {
            if local.completed {
                return Ok(Some(local));
            }
        }
        let filter = Filter::new()
            .eq("student_id", student_id)
            .eq("content_type", content_type.as_str())
            .eq("content_id", content_id);
        let remote = self
            .mutator
            .fetch::<ProgressRecord>(&filter)
            .await?
            .into_iter()
            .find(|r| r.completed);
        if let Some(record) = &remote {
            self.mutator.store().upsert_one(record.clone(), matches);
        }
        Ok(remote)
    }

    /// Put the triple back the way it was before an unpaid completion:
    /// the earlier open record if there was one, otherwise nothing.
    async fn undo_completion(&self, record: &ProgressRecord, open: Option<ProgressRecord>) {
        let undone = match open {
            Some(open) => self
                .mutator
                .upsert_by(
                    open,
                    |r: &ProgressRecord| {
                        r.is_for(&record.student_id, record.content_type, &record.content_id)
                    },
                    PROGRESS_CONFLICT_KEYS,
                )
                .await
                .map(drop),
            None => self
                .mutator
                .delete::<ProgressRecord>(&record.id)
                .await
                .map(drop),
        };
        if let Err(e) = undone {
            error!(
                student_id = %record.student_id,
                content_id = %record.content_id,
                error = %e,
                "Could not undo unpaid completion"
            );
        }
    }

    /// Award badges for each enclosing module, stage and course that is
    /// now fully complete.
    async fn award_rollup_badges(&self, student_id: &str, item: &ContentItem) -> Vec<StudentBadge> {
        let store = self.mutator.store();
        let module = store.get::<Module>(&item.module_id);
        let stage = module.as_ref().and_then(|m| store.get::<Stage>(&m.stage_id));

        let done: Vec<(BadgeTargetType, String)> = {
            let snapshot = ProgressSnapshot::from_store(store);
            let engine = ProgressEngine::new(&snapshot);
            let mut done = Vec::new();
            if engine.module_completion(student_id, &item.module_id).is_done() {
                done.push((BadgeTargetType::Module, item.module_id.clone()));
            }
            if let Some(stage) = &stage {
                if engine.stage_completion(student_id, &stage.id).is_done() {
                    done.push((BadgeTargetType::Stage, stage.id.clone()));
                }
                if engine.course_completion(student_id, &stage.course_id).is_done() {
                    done.push((BadgeTargetType::Course, stage.course_id.clone()));
                }
            }
            done
        };

        let rewards = Rewards::new(self.mutator, self.celebrations);
        let mut badges = Vec::new();
        for (target_type, target_id) in done {
            badges.extend(
                rewards
                    .award_attached_or_log(student_id, target_type, &target_id)
                    .await,
            );
        }
        badges
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::{allow, deny, fixture, put};
    use crate::model::{Badge, Student};
    use crate::sync::RemoteRecord;

    async fn remote_records(f: &crate::context::fixtures::Fixture) -> Vec<ProgressRecord> {
        f.mutator
            .fetch::<ProgressRecord>(&Filter::new().eq("student_id", "stu_1"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_completion_grants_nothing() {
        let f = fixture().await;
        let progress = Progress::new(&f.mutator, &f.celebrations);

        let first = progress
            .mark_complete("stu_1", ContentType::Quiz, "q1")
            .await
            .unwrap();
        assert!(!first.already_complete);
        assert_eq!(first.xp_awarded, 25);

        let again = progress
            .mark_complete("stu_1", ContentType::Quiz, "q1")
            .await
            .unwrap();
        assert!(again.already_complete);
        assert_eq!(again.record.id, first.record.id);

        let student = f.mutator.store().get::<Student>("stu_1").unwrap();
        assert_eq!((student.xp, student.balance), (25, 5));
        assert_eq!(f.celebrations.len(), 1);
        assert_eq!(f.celebrations.head().unwrap().title, "Quiz complete!");
    }

    #[tokio::test]
    async fn test_remote_completion_is_respected() {
        let f = fixture().await;
        put(
            &f.gateway,
            &ProgressRecord::completed("stu_1", ContentType::Lesson, "l1", 10, 2),
        )
        .await;
        let progress = Progress::new(&f.mutator, &f.celebrations);

        let outcome = progress
            .mark_complete("stu_1", ContentType::Lesson, "l1")
            .await
            .unwrap();
        assert!(outcome.already_complete);
        assert_eq!(f.mutator.store().get::<Student>("stu_1").unwrap().xp, 0);
        assert!(f.celebrations.is_empty());
        assert_eq!(f.mutator.store().snapshot::<ProgressRecord>().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_type_is_rejected() {
        let f = fixture().await;
        let progress = Progress::new(&f.mutator, &f.celebrations);
        let err = progress
            .mark_complete("stu_1", ContentType::Quiz, "l1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(f.mutator.store().snapshot::<ProgressRecord>().is_empty());
    }

    #[tokio::test]
    async fn test_finishing_module_awards_attached_badge() {
        let f = fixture().await;
        let badge = Badge {
            id: "bdg_ohm".into(),
            name: "Ohm Master".into(),
            description: None,
            icon: None,
            color: None,
        };
        put(&f.gateway, &badge).await;
        f.mutator.store().replace_all(vec![badge]);
        let rewards = Rewards::new(&f.mutator, &f.celebrations);
        rewards
            .attach_badge("bdg_ohm", BadgeTargetType::Module, "m1")
            .await
            .unwrap();

        let progress = Progress::new(&f.mutator, &f.celebrations);
        for (ct, id) in [(ContentType::Lesson, "l1"), (ContentType::Lesson, "l2")] {
            let outcome = progress.mark_complete("stu_1", ct, id).await.unwrap();
            assert!(outcome.badges.is_empty());
        }
        let last = progress
            .mark_complete("stu_1", ContentType::Quiz, "q1")
            .await
            .unwrap();
        assert_eq!(last.badges.len(), 1);
        assert_eq!(progress.report("stu_1").unwrap().courses[0].percent, 100);
    }

    #[tokio::test]
    async fn test_unknown_student_writes_nothing() {
        let f = fixture().await;
        let progress = Progress::new(&f.mutator, &f.celebrations);
        let err = progress
            .mark_complete("ghost", ContentType::Quiz, "q1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Student, .. }));
        assert!(f.mutator.store().snapshot::<ProgressRecord>().is_empty());
        let rows = f
            .gateway
            .select(ProgressRecord::table(), &Filter::new())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_failed_grant_undoes_completion_and_retry_pays() {
        let f = fixture().await;
        let progress = Progress::new(&f.mutator, &f.celebrations);

        deny::<Student>(&f.gateway, "UPDATE");
        let err = progress
            .mark_complete("stu_1", ContentType::Quiz, "q1")
            .await
            .unwrap_err();
        assert!(err.is_blocking());
        assert!(f.mutator.store().snapshot::<ProgressRecord>().is_empty());
        assert!(remote_records(&f).await.is_empty());
        let student = f.mutator.store().get::<Student>("stu_1").unwrap();
        assert_eq!((student.xp, student.balance), (0, 0));
        assert!(f.celebrations.is_empty());

        allow::<Student>(&f.gateway, "UPDATE");
        let retry = progress
            .mark_complete("stu_1", ContentType::Quiz, "q1")
            .await
            .unwrap();
        assert!(!retry.already_complete);
        assert_eq!(retry.xp_awarded, 25);
        let student = f.mutator.store().get::<Student>("stu_1").unwrap();
        assert_eq!((student.xp, student.balance), (25, 5));
        assert_eq!(remote_records(&f).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_grant_restores_open_record() {
        let f = fixture().await;
        let open = ProgressRecord {
            id: "prg_open".into(),
            student_id: "stu_1".into(),
            content_type: ContentType::Lesson,
            content_id: "l1".into(),
            completed: false,
            completed_at: None,
            xp_awarded: 0,
            currency_awarded: 0,
        };
        put(&f.gateway, &open).await;
        f.mutator.store().replace_all(vec![open.clone()]);
        let progress = Progress::new(&f.mutator, &f.celebrations);

        deny::<Student>(&f.gateway, "UPDATE");
        progress
            .mark_complete("stu_1", ContentType::Lesson, "l1")
            .await
            .unwrap_err();

        assert_eq!(*f.mutator.store().snapshot::<ProgressRecord>(), vec![open]);
        let remote = remote_records(&f).await;
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id, "prg_open");
        assert!(!remote[0].completed);
    }

    #[tokio::test]
    async fn test_badge_failure_keeps_committed_completion() {
        let f = fixture().await;
        let badge = Badge {
            id: "bdg_ohm".into(),
            name: "Ohm Master".into(),
            description: None,
            icon: None,
            color: None,
        };
        put(&f.gateway, &badge).await;
        f.mutator.store().replace_all(vec![badge]);
        Rewards::new(&f.mutator, &f.celebrations)
            .attach_badge("bdg_ohm", BadgeTargetType::Module, "m1")
            .await
            .unwrap();
        let progress = Progress::new(&f.mutator, &f.celebrations);
        for (ct, id) in [(ContentType::Lesson, "l1"), (ContentType::Lesson, "l2")] {
            progress.mark_complete("stu_1", ct, id).await.unwrap();
        }

        deny::<StudentBadge>(&f.gateway, "INSERT");
        let last = progress
            .mark_complete("stu_1", ContentType::Quiz, "q1")
            .await
            .unwrap();
        assert!(!last.already_complete);
        assert!(last.badges.is_empty());
        assert_eq!(f.mutator.store().get::<Student>("stu_1").unwrap().xp, 45);
        assert!(f.mutator.store().snapshot::<StudentBadge>().is_empty());
        assert_eq!(remote_records(&f).await.len(), 3);
    }
}
