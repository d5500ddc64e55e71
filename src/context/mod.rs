//! Domain contexts.
//!
//! Each context is a thin, borrowed view over a session's [`Mutator`]
//! that turns domain actions into optimistic mutations. Rewards,
//! celebrations and notifications are handed out only after the write
//! they depend on is confirmed.
//!
//! [`Mutator`]: crate::sync::Mutator

pub mod notifications;
pub mod progress;
pub mod rewards;
pub mod students;
pub mod submissions;

pub use notifications::Notifications;
pub use progress::{CompletionOutcome, Progress};
pub use rewards::{AwardOutcome, Rewards};
pub use students::{StudentPatch, Students};
pub use submissions::{Grade, Submissions};

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared seed data for context tests.

    use std::sync::Arc;

    use crate::alerts::Alerts;
    use crate::celebration::Celebrations;
    use crate::model::{
        Cohort, ContentItem, ContentType, Course, Department, Module, Project, Stage, Student,
        StudentStatus, Task,
    };
    use crate::storage::SqliteGateway;
    use crate::store::EntityStore;
    use crate::sync::{Mutator, RemoteRecord};

    pub struct Fixture {
        pub gateway: Arc<SqliteGateway>,
        pub mutator: Mutator<SqliteGateway>,
        pub celebrations: Celebrations,
    }

    /// One active student `stu_1`, a course with two lessons and a quiz
    /// in one module, and a project with two tasks.
    pub async fn fixture() -> Fixture {
        let gateway = Arc::new(SqliteGateway::open_memory().unwrap());
        let store = Arc::new(EntityStore::new());

        let mut student = Student::invite("Ada", Cohort::Foundation, Department::Engineering);
        student.id = "stu_1".into();
        student.status = StudentStatus::Active;
        put(&gateway, &student).await;
        store.replace_all(vec![student]);

        let course = Course {
            id: "c1".into(),
            title: "Circuits".into(),
            department: None,
            position: 0,
        };
        let stage = Stage {
            id: "st1".into(),
            course_id: "c1".into(),
            title: "Basics".into(),
            position: 0,
        };
        let module = Module {
            id: "m1".into(),
            stage_id: "st1".into(),
            title: "Ohm".into(),
            position: 0,
        };
        put(&gateway, &course).await;
        put(&gateway, &stage).await;
        put(&gateway, &module).await;
        store.replace_all(vec![course]);
        store.replace_all(vec![stage]);
        store.replace_all(vec![module]);

        let items: Vec<ContentItem> = [
            ("l1", ContentType::Lesson, 10, 2),
            ("l2", ContentType::Lesson, 10, 2),
            ("q1", ContentType::Quiz, 25, 5),
        ]
        .into_iter()
        .map(|(id, content_type, xp, currency)| ContentItem {
            id: id.into(),
            module_id: "m1".into(),
            content_type,
            title: id.to_uppercase(),
            xp_reward: xp,
            currency_reward: currency,
            position: 0,
        })
        .collect();
        for item in &items {
            put(&gateway, item).await;
        }
        store.replace_all(items);

        let project = Project {
            id: "p1".into(),
            title: "Robot".into(),
            department: None,
            position: 0,
        };
        put(&gateway, &project).await;
        store.replace_all(vec![project]);
        let tasks: Vec<Task> = ["t1", "t2"]
            .into_iter()
            .map(|id| Task {
                id: id.into(),
                project_id: "p1".into(),
                title: id.to_uppercase(),
                position: 0,
            })
            .collect();
        for task in &tasks {
            put(&gateway, task).await;
        }
        store.replace_all(tasks);

        let mutator = Mutator::new(store, Arc::clone(&gateway), Alerts::new());
        Fixture {
            gateway,
            mutator,
            celebrations: Celebrations::default(),
        }
    }

    pub async fn put<T: RemoteRecord>(gateway: &SqliteGateway, item: &T) {
        use crate::gateway::RemoteGateway;
        gateway.insert(T::table(), &item.to_row()).await.unwrap();
    }

    /// Make every `op` (INSERT, UPDATE, DELETE) on `T`'s table fail with
    /// a permission error until [`allow`] is called.
    pub fn deny<T: RemoteRecord>(gateway: &SqliteGateway, op: &str) {
        let table = T::table();
        gateway
            .execute_batch(&format!(
                "CREATE TRIGGER deny_{op}_{table} BEFORE {op} ON {table} \
                 BEGIN SELECT RAISE(ABORT, 'permission denied for table {table}'); END;"
            ))
            .unwrap();
    }

    pub fn allow<T: RemoteRecord>(gateway: &SqliteGateway, op: &str) {
        gateway
            .execute_batch(&format!("DROP TRIGGER deny_{op}_{};", T::table()))
            .unwrap();
    }
}
