//! Reactive recomputation of a student's progress.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ProgressEngine, ProgressSnapshot, StudentProgressReport};
use crate::store::EntityStore;

fn compute(store: &EntityStore, student_id: &str) -> Option<StudentProgressReport> {
    let snapshot = ProgressSnapshot::from_store(store);
    let student = snapshot.students.iter().find(|s| s.id == student_id)?;
    Some(ProgressEngine::new(&snapshot).student_report(student))
}

/// Recompute `student_id`'s report whenever the store changes.
///
/// The receiver holds `None` while the student is not in the store. A
/// new value is published only when the report actually changes. The
/// task ends when every receiver is dropped; abort the handle to stop it
/// earlier.
pub fn watch_student(
    store: Arc<EntityStore>,
    student_id: &str,
) -> (watch::Receiver<Option<StudentProgressReport>>, JoinHandle<()>) {
    let student_id = student_id.to_string();
    let mut revisions = store.subscribe();
    let (tx, rx) = watch::channel(compute(&store, &student_id));

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tx.closed() => break,
            }
            let report = compute(&store, &student_id);
            tx.send_if_modified(|current| {
                if *current == report {
                    false
                } else {
                    debug!(student_id = %student_id, "Progress changed");
                    *current = report;
                    true
                }
            });
        }
    });

    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Cohort, ContentItem, ContentType, Course, Department, Module, ProgressRecord, Stage,
        Student,
    };
    use std::time::Duration;

    fn seed(store: &EntityStore) {
        let mut student = Student::invite("Ada", Cohort::Foundation, Department::Engineering);
        student.id = "s1".into();
        store.replace_all(vec![student]);
        store.replace_all(vec![Course {
            id: "c1".into(),
            title: "C".into(),
            department: None,
            position: 0,
        }]);
        store.replace_all(vec![Stage {
            id: "st1".into(),
            course_id: "c1".into(),
            title: "S".into(),
            position: 0,
        }]);
        store.replace_all(vec![Module {
            id: "m1".into(),
            stage_id: "st1".into(),
            title: "M".into(),
            position: 0,
        }]);
        store.replace_all(
            ["a", "b"]
                .iter()
                .map(|id| ContentItem {
                    id: (*id).into(),
                    module_id: "m1".into(),
                    content_type: ContentType::Lesson,
                    title: (*id).into(),
                    xp_reward: 0,
                    currency_reward: 0,
                    position: 0,
                })
                .collect(),
        );
    }

    #[tokio::test]
    async fn test_report_follows_store() {
        let store = Arc::new(EntityStore::new());
        seed(&store);
        let (mut rx, task) = watch_student(Arc::clone(&store), "s1");
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().overall, 0);

        store.upsert_by_id(ProgressRecord::completed("s1", ContentType::Lesson, "a", 0, 0));
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().courses[0].percent, 50);

        task.abort();
    }

    #[tokio::test]
    async fn test_unknown_student_is_none() {
        let store = Arc::new(EntityStore::new());
        let (rx, task) = watch_student(store, "ghost");
        assert!(rx.borrow().is_none());
        task.abort();
    }
}
