//! Achievements and badges.
//!
//! Earning is one-way and idempotent: a second award of the same
//! achievement or badge returns the existing record and grants nothing.
//! Detaching a badge from content never takes it back from students.

use tracing::{error, info, warn};

use crate::celebration::{CelebrationEvent, CelebrationKind, Celebrations};
use crate::context::notifications::Notifications;
use crate::context::students::Students;
use crate::error::{Error, Result};
use crate::gateway::{Filter, RemoteErrorKind, RemoteGateway};
use crate::model::{
    Achievement, Badge, BadgeAttachment, BadgeTargetType, NotificationKind, StudentAchievement,
    StudentBadge,
};
use crate::store::EntityKind;
use crate::sync::Mutator;

/// Result of an idempotent award.
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome<T> {
    /// Newly earned by this call.
    Awarded(T),
    /// Earned before; nothing was granted.
    AlreadyAwarded(T),
}

impl<T> AwardOutcome<T> {
    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Awarded(_))
    }

    #[must_use]
    pub fn record(&self) -> &T {
        match self {
            Self::Awarded(t) | Self::AlreadyAwarded(t) => t,
        }
    }

    #[must_use]
    pub fn into_record(self) -> T {
        match self {
            Self::Awarded(t) | Self::AlreadyAwarded(t) => t,
        }
    }
}

pub struct Rewards<'a, G> {
    mutator: &'a Mutator<G>,
    celebrations: &'a Celebrations,
}

impl<'a, G: RemoteGateway> Rewards<'a, G> {
    #[must_use]
    pub fn new(mutator: &'a Mutator<G>, celebrations: &'a Celebrations) -> Self {
        Self {
            mutator,
            celebrations,
        }
    }

    /// Award an achievement and its xp, once.
    ///
    /// After the award is confirmed: xp is granted, the student is
    /// notified, a celebration is queued and badges attached to the
    /// achievement are awarded. If the xp grant fails the award is
    /// deleted again, so a retry starts from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown student or achievement,
    /// or the write error. A failed attached-badge award is logged and
    /// does not fail the call.
    pub async fn award_achievement(
        &self,
        student_id: &str,
        achievement_id: &str,
    ) -> Result<AwardOutcome<StudentAchievement>> {
        let students = Students::new(self.mutator);
        students.get(student_id)?;
        let achievement = self.achievement(achievement_id)?;
        let earned = |e: &StudentAchievement| {
            e.student_id == student_id && e.achievement_id == achievement_id
        };
        let remote = Filter::new()
            .eq("student_id", student_id)
            .eq("achievement_id", achievement_id);

        if let Some(existing) = self.already_earned(earned, &remote).await? {
            return Ok(AwardOutcome::AlreadyAwarded(existing));
        }

        let record = match self
            .mutator
            .create(StudentAchievement::earned(student_id, achievement_id))
            .await
        {
            Ok(record) => record,
            Err(e) if is_conflict(&e) => {
                // Earned concurrently elsewhere.
                if let Some(existing) = self.already_earned(earned, &remote).await? {
                    return Ok(AwardOutcome::AlreadyAwarded(existing));
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = students
            .grant_rewards(student_id, achievement.xp_value, 0)
            .await
        {
            if let Err(undo) = self.mutator.delete::<StudentAchievement>(&record.id).await {
                error!(
                    student_id = %student_id,
                    achievement_id = %achievement_id,
                    error = %undo,
                    "Could not withdraw unpaid achievement"
                );
            }
            return Err(e);
        }
        info!(
            student_id = %student_id,
            achievement_id = %achievement_id,
            xp = achievement.xp_value,
            "Achievement earned"
        );

        self.celebrations.enqueue(
            CelebrationEvent::new(
                CelebrationKind::Achievement,
                "Achievement unlocked!",
                &achievement.title,
            )
            .with_xp(achievement.xp_value),
        );
        self.notify(
            student_id,
            "Achievement unlocked",
            &format!("You earned \"{}\"", achievement.title),
            NotificationKind::Achievement,
        )
        .await;
        self.award_attached_or_log(student_id, BadgeTargetType::Achievement, achievement_id)
            .await;

        Ok(AwardOutcome::Awarded(record))
    }

    /// Award a badge, once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown student or badge, or the
    /// write error.
    pub async fn award_badge(
        &self,
        student_id: &str,
        badge_id: &str,
    ) -> Result<AwardOutcome<StudentBadge>> {
        Students::new(self.mutator).get(student_id)?;
        let badge = self.badge(badge_id)?;
        let held = |b: &StudentBadge| b.student_id == student_id && b.badge_id == badge_id;
        let remote = Filter::new()
            .eq("student_id", student_id)
            .eq("badge_id", badge_id);

        if let Some(existing) = self.already_earned(held, &remote).await? {
            return Ok(AwardOutcome::AlreadyAwarded(existing));
        }

        let record = match self
            .mutator
            .create(StudentBadge::awarded(student_id, badge_id))
            .await
        {
            Ok(record) => record,
            Err(e) if is_conflict(&e) => {
                if let Some(existing) = self.already_earned(held, &remote).await? {
                    return Ok(AwardOutcome::AlreadyAwarded(existing));
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!(student_id = %student_id, badge_id = %badge_id, "Badge awarded");

        self.celebrations.enqueue(
            CelebrationEvent::new(CelebrationKind::Badge, "New badge!", &badge.name)
                .with_badge(&badge),
        );
        self.notify(
            student_id,
            "New badge",
            &format!("You were awarded the \"{}\" badge", badge.name),
            NotificationKind::Badge,
        )
        .await;

        Ok(AwardOutcome::Awarded(record))
    }

    /// Award every badge attached to a target the student just completed.
    ///
    /// Returns only the newly awarded badges.
    ///
    /// # Errors
    ///
    /// Returns the first award error; badges awarded before it stay.
    pub async fn award_attached(
        &self,
        student_id: &str,
        target_type: BadgeTargetType,
        target_id: &str,
    ) -> Result<Vec<StudentBadge>> {
        let attachments = self
            .mutator
            .store()
            .filter(|a: &BadgeAttachment| a.targets(target_type, target_id));
        let mut awarded = Vec::new();
        for attachment in attachments {
            let outcome = self.award_badge(student_id, &attachment.badge_id).await?;
            if outcome.is_new() {
                awarded.push(outcome.into_record());
            }
        }
        Ok(awarded)
    }

    /// [`award_attached`](Self::award_attached) for callers whose own
    /// write is already confirmed.
    ///
    /// Stops at the first failure, logs it and returns the badges
    /// awarded before it.
    pub(crate) async fn award_attached_or_log(
        &self,
        student_id: &str,
        target_type: BadgeTargetType,
        target_id: &str,
    ) -> Vec<StudentBadge> {
        let attachments = self
            .mutator
            .store()
            .filter(|a: &BadgeAttachment| a.targets(target_type, target_id));
        let mut awarded = Vec::new();
        for attachment in attachments {
            match self.award_badge(student_id, &attachment.badge_id).await {
                Ok(outcome) if outcome.is_new() => awarded.push(outcome.into_record()),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        student_id = %student_id,
                        badge_id = %attachment.badge_id,
                        target = %target_type,
                        error = %e,
                        "Attached badge not awarded"
                    );
                    break;
                }
            }
        }
        awarded
    }

    /// Attach a badge to a content entity. Attaching twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown badge, or the write error.
    pub async fn attach_badge(
        &self,
        badge_id: &str,
        target_type: BadgeTargetType,
        target_id: &str,
    ) -> Result<BadgeAttachment> {
        self.badge(badge_id)?;
        if let Some(existing) = self.attachment(badge_id, target_type, target_id) {
            return Ok(existing);
        }
        self.mutator
            .create(BadgeAttachment::new(badge_id, target_type, target_id))
            .await
    }

    /// Remove an attachment. Badges students already hold are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the badge is not attached there.
    pub async fn detach_badge(
        &self,
        badge_id: &str,
        target_type: BadgeTargetType,
        target_id: &str,
    ) -> Result<BadgeAttachment> {
        let attachment =
            self.attachment(badge_id, target_type, target_id)
                .ok_or_else(|| Error::NotFound {
                    kind: EntityKind::BadgeAttachment,
                    id: format!("{badge_id} on {target_type} {target_id}"),
                })?;
        self.mutator.delete::<BadgeAttachment>(&attachment.id).await
    }

    fn attachment(
        &self,
        badge_id: &str,
        target_type: BadgeTargetType,
        target_id: &str,
    ) -> Option<BadgeAttachment> {
        self.mutator.store().find(|a: &BadgeAttachment| {
            a.badge_id == badge_id && a.targets(target_type, target_id)
        })
    }

    fn achievement(&self, id: &str) -> Result<Achievement> {
        self.mutator
            .store()
            .get::<Achievement>(id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::Achievement,
                id: id.to_string(),
            })
    }

    fn badge(&self, id: &str) -> Result<Badge> {
        self.mutator
            .store()
            .get::<Badge>(id)
            .ok_or_else(|| Error::NotFound {
                kind: EntityKind::Badge,
                id: id.to_string(),
            })
    }

    /// Existing earned record, checking the store and then the remote.
    ///
    /// A remote hit is merged into the store.
    async fn already_earned<T, F>(&self, matches: F, remote: &Filter) -> Result<Option<T>>
    where
        T: crate::sync::RemoteRecord,
        F: Fn(&T) -> bool,
    {
        if let Some(existing) = self.mutator.store().find(&matches) {
            return Ok(Some(existing));
        }
        let found = self.mutator.fetch::<T>(remote).await?.into_iter().next();
        if let Some(existing) = &found {
            self.mutator.store().upsert_one(existing.clone(), &matches);
        }
        Ok(found)
    }

    async fn notify(&self, user_id: &str, title: &str, message: &str, kind: NotificationKind) {
        if let Err(e) = Notifications::new(self.mutator)
            .notify(user_id, title, message, kind, None)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Could not write notification");
        }
    }
}

fn is_conflict(err: &Error) -> bool {
    matches!(err.remote_kind(), Some(RemoteErrorKind::Conflict))
}
