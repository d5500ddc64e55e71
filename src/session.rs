//! Sync session lifecycle.
//!
//! A [`SyncSession`] owns everything one signed-in user needs: the
//! entity store, the mutation engine, the realtime bridge, the
//! celebration queue and the alert queue. It is built by
//! [`SyncSession::start`] and torn down by [`SyncSession::end`] or by
//! being dropped. Nothing here is global.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use crate::alerts::Alerts;
use crate::celebration::Celebrations;
use crate::config::Config;
use crate::context::{Notifications, Progress, Rewards, Students, Submissions};
use crate::error::{Error, Result};
use crate::gateway::{Filter, RemoteGateway};
use crate::model::{
    Achievement, Badge, BadgeAttachment, ContentItem, Course, Department, Module, Notification,
    ProgressRecord, Project, ProjectAssessment, Stage, Student, StudentAchievement, StudentBadge,
    Submission, Task,
};
use crate::store::{EntityKind, EntityStore};
use crate::sync::{BridgeHandle, Mutator, RealtimeBridge, SchemaAdaptiveWriter, Scope};

/// What the signed-in user may see and do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    #[default]
    Teacher,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "admin" => Ok(Self::Admin),
            _ => Err(Error::InvalidArgument(format!("Unknown role: {s}"))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated user, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub department: Option<Department>,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: &str, role: Role) -> Self {
        Self {
            user_id: user_id.to_string(),
            role,
            department: None,
        }
    }

    #[must_use]
    pub fn with_department(mut self, department: Department) -> Self {
        self.department = Some(department);
        self
    }

    /// Row filters for everything this user loads and subscribes to.
    ///
    /// Students see only their own rows. Teachers bound to a department
    /// see that department's students. Notifications are always per user.
    #[must_use]
    pub fn scope(&self) -> Scope {
        let user = self.user_id.as_str();
        let mut scope =
            Scope::all().with(EntityKind::Notification, Filter::new().eq("user_id", user));

        match self.role {
            Role::Student => {
                scope = scope.with(EntityKind::Student, Filter::new().eq("id", user));
                for kind in [
                    EntityKind::Submission,
                    EntityKind::ProjectAssessment,
                    EntityKind::ProgressRecord,
                    EntityKind::StudentAchievement,
                    EntityKind::StudentBadge,
                ] {
                    scope = scope.with(kind, Filter::new().eq("student_id", user));
                }
            }
            Role::Teacher => {
                if let Some(department) = self.department {
                    scope = scope.with(
                        EntityKind::Student,
                        Filter::new().eq("department", department.as_str()),
                    );
                }
            }
            Role::Admin => {}
        }
        scope
    }
}

/// A running sync session.
#[derive(Debug)]
pub struct SyncSession<G> {
    identity: Identity,
    mutator: Mutator<G>,
    bridge: BridgeHandle,
    celebrations: Celebrations,
    dismiss_task: Option<JoinHandle<()>>,
}

impl<G: RemoteGateway + 'static> SyncSession<G> {
    /// Subscribe to every table, load everything in the identity's scope,
    /// and start the celebration timer.
    ///
    /// Subscriptions open before the initial load, so no change committed
    /// in between is missed. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the first subscription or load error. Anything already
    /// started is torn down.
    pub async fn start(gateway: Arc<G>, identity: Identity, config: &Config) -> Result<Self> {
        let store = Arc::new(EntityStore::new());
        let scope = identity.scope();

        let bridge = RealtimeBridge::new(Arc::clone(&store), Arc::clone(&gateway), scope.clone())
            .attach_all()?;

        let mutator = Mutator::new(Arc::clone(&store), gateway, Alerts::new())
            .with_writer(SchemaAdaptiveWriter::new(config.write_attempts))
            .with_scope(scope);
        let rows = load_all(&mutator).await?;

        let celebrations = Celebrations::new(config.celebration_dismiss_after());
        let dismiss_task = Some(celebrations.spawn_auto_dismiss());

        info!(
            user = %identity.user_id,
            role = %identity.role,
            rows,
            "Sync session started"
        );

        Ok(Self {
            identity,
            mutator,
            bridge,
            celebrations,
            dismiss_task,
        })
    }

    /// Reload every kind from the remote.
    ///
    /// # Errors
    ///
    /// Returns the first load error; kinds loaded before it keep their
    /// fresh rows.
    pub async fn reload_all(&self) -> Result<usize> {
        load_all(&self.mutator).await
    }

    /// Stop every subscription and timer, then empty the store.
    pub fn end(mut self) {
        self.teardown();
        self.mutator.store().clear();
        info!(user = %self.identity.user_id, "Sync session ended");
    }

    fn teardown(&mut self) {
        self.bridge.shutdown();
        if let Some(task) = self.dismiss_task.take() {
            task.abort();
        }
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        self.mutator.store()
    }

    #[must_use]
    pub fn mutator(&self) -> &Mutator<G> {
        &self.mutator
    }

    #[must_use]
    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    #[must_use]
    pub fn celebrations(&self) -> &Celebrations {
        &self.celebrations
    }

    #[must_use]
    pub fn alerts(&self) -> &Alerts {
        self.mutator.alerts()
    }

    #[must_use]
    pub fn students(&self) -> Students<'_, G> {
        Students::new(&self.mutator)
    }

    #[must_use]
    pub fn submissions(&self) -> Submissions<'_, G> {
        Submissions::new(&self.mutator, &self.celebrations)
    }

    #[must_use]
    pub fn progress(&self) -> Progress<'_, G> {
        Progress::new(&self.mutator, &self.celebrations)
    }

    #[must_use]
    pub fn rewards(&self) -> Rewards<'_, G> {
        Rewards::new(&self.mutator, &self.celebrations)
    }

    #[must_use]
    pub fn notifications(&self) -> Notifications<'_, G> {
        Notifications::new(&self.mutator)
    }
}

impl<G> Drop for SyncSession<G> {
    fn drop(&mut self) {
        self.bridge.shutdown();
        if let Some(task) = self.dismiss_task.take() {
            task.abort();
        }
    }
}

/// Load every kind in dependency order; returns the total row count.
async fn load_all<G: RemoteGateway>(mutator: &Mutator<G>) -> Result<usize> {
    let mut rows = 0;
    rows += mutator.reload::<Course>().await?;
    rows += mutator.reload::<Stage>().await?;
    rows += mutator.reload::<Module>().await?;
    rows += mutator.reload::<ContentItem>().await?;
    rows += mutator.reload::<Project>().await?;
    rows += mutator.reload::<Task>().await?;
    rows += mutator.reload::<Achievement>().await?;
    rows += mutator.reload::<Badge>().await?;
    rows += mutator.reload::<BadgeAttachment>().await?;
    rows += mutator.reload::<Student>().await?;
    rows += mutator.reload::<Submission>().await?;
    rows += mutator.reload::<ProjectAssessment>().await?;
    rows += mutator.reload::<ProgressRecord>().await?;
    rows += mutator.reload::<StudentAchievement>().await?;
    rows += mutator.reload::<StudentBadge>().await?;
    rows += mutator.reload::<Notification>().await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cohort, NotificationKind};
    use crate::storage::SqliteGateway;
    use crate::sync::RemoteRecord;
    use std::time::Duration;

    async fn seeded() -> Arc<SqliteGateway> {
        let gateway = Arc::new(SqliteGateway::open_memory().unwrap());
        for (user, title) in [("t1", "For teacher"), ("stu_1", "For student")] {
            let n = Notification::new(user, title, "m", NotificationKind::Info);
            gateway.insert("notifications", &n.to_row()).await.unwrap();
        }
        for (id, department) in [("stu_1", Department::Engineering), ("stu_2", Department::Creative)] {
            let mut row = Student::invite(id, Cohort::Foundation, department).insert_payload();
            row.insert("id".into(), serde_json::json!(id));
            gateway.insert("students", &row).await.unwrap();
        }
        gateway
    }

    #[tokio::test]
    async fn test_student_scope_loads_own_rows() {
        let gateway = seeded().await;
        let identity = Identity::new("stu_1", Role::Student);
        let session = SyncSession::start(gateway, identity, &Config::default())
            .await
            .unwrap();

        let notifications = session.store().snapshot::<Notification>();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "For student");
        assert_eq!(session.store().snapshot::<Student>().len(), 1);
        assert!(session.bridge().is_running());
        session.end();
    }

    #[tokio::test]
    async fn test_teacher_department_scope() {
        let gateway = seeded().await;
        let identity = Identity::new("t1", Role::Teacher).with_department(Department::Creative);
        let session = SyncSession::start(gateway, identity, &Config::default())
            .await
            .unwrap();

        let students = session.store().snapshot::<Student>();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].id, "stu_2");
    }

    #[tokio::test]
    async fn test_end_clears_store_and_stops_merging() {
        let gateway = seeded().await;
        let session = SyncSession::start(
            Arc::clone(&gateway),
            Identity::new("t1", Role::Admin),
            &Config::default(),
        )
        .await
        .unwrap();
        let store = Arc::clone(session.store());
        assert_eq!(store.snapshot::<Student>().len(), 2);

        session.end();
        assert!(store.snapshot::<Student>().is_empty());

        let n = Notification::new("t1", "late", "m", NotificationKind::Info);
        gateway.insert("notifications", &n.to_row()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.snapshot::<Notification>().is_empty());
        assert_eq!(gateway.feed().subscriber_count(), 0);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("janitor".parse::<Role>().is_err());
    }
}
