//! Progress aggregation.
//!
//! Pure functions over store snapshots. Nothing is cached between calls:
//! a [`ProgressEngine`] indexes one [`ProgressSnapshot`] and every
//! rollup is computed from that.
//!
//! Rollups:
//!
//! - item: complete iff a completed [`ProgressRecord`] exists for
//!   `(student, content type, content id)`
//! - module / stage / course: completed items over all items beneath
//! - project: tasks whose latest submission is Verified or Graded
//! - student overall: mean of the course mean and the project mean
//! - cohort: mean of overall over Active students in the cohort
//!
//! Percentages are integers in `0..=100`, rounded half up, and only at
//! the final output. An empty set is 0%.

mod watch;

pub use watch::watch_student;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::model::{
    Cohort, ContentItem, ContentType, Course, Department, Module, ProgressRecord, Project, Stage,
    Student, Submission, Task, content::visible_to,
};
use crate::store::EntityStore;

/// `round_half_up(100 * completed / total)`, or 0 for an empty set.
#[must_use]
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    let rounded = (200 * completed + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// `round_half_up(100 * fraction)`, clamped to `0..=100`.
#[must_use]
pub fn percent_of(fraction: f64) -> u8 {
    if !fraction.is_finite() || fraction <= 0.0 {
        return 0;
    }
    // The epsilon absorbs float error on exact halves (e.g. 62.4999...).
    let scaled = (fraction.min(1.0) * 100.0 + 0.5 + 1e-9).floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = scaled as u8;
    value.min(100)
}

/// Completed-of-total counts for one rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub completed: usize,
    pub total: usize,
}

impl Completion {
    /// Unrounded fraction; 0 for an empty set.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed.min(self.total) as f64 / self.total as f64
        }
    }

    #[must_use]
    pub fn percent(&self) -> u8 {
        percent(self.completed, self.total)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

/// Progress through one course or project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityProgress {
    pub id: String,
    pub title: String,
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

/// Everything the dashboard shows for one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentProgressReport {
    pub student_id: String,
    pub courses: Vec<EntityProgress>,
    pub projects: Vec<EntityProgress>,
    pub course_average: u8,
    pub project_average: u8,
    pub overall: u8,
}

/// The collections rollups read, captured at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub courses: Arc<Vec<Course>>,
    pub stages: Arc<Vec<Stage>>,
    pub modules: Arc<Vec<Module>>,
    pub items: Arc<Vec<ContentItem>>,
    pub projects: Arc<Vec<Project>>,
    pub tasks: Arc<Vec<Task>>,
    pub records: Arc<Vec<ProgressRecord>>,
    pub submissions: Arc<Vec<Submission>>,
    pub students: Arc<Vec<Student>>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn from_store(store: &EntityStore) -> Self {
        Self {
            courses: store.snapshot(),
            stages: store.snapshot(),
            modules: store.snapshot(),
            items: store.snapshot(),
            projects: store.snapshot(),
            tasks: store.snapshot(),
            records: store.snapshot(),
            submissions: store.snapshot(),
            students: store.snapshot(),
        }
    }
}

/// Indexed view over a snapshot.
#[derive(Debug)]
pub struct ProgressEngine<'a> {
    snapshot: &'a ProgressSnapshot,
    completed: HashSet<(&'a str, ContentType, &'a str)>,
    items_by_module: HashMap<&'a str, Vec<&'a ContentItem>>,
    modules_by_stage: HashMap<&'a str, Vec<&'a str>>,
    stages_by_course: HashMap<&'a str, Vec<&'a str>>,
    tasks_by_project: HashMap<&'a str, Vec<&'a str>>,
    latest: HashMap<(&'a str, &'a str), &'a Submission>,
}

impl<'a> ProgressEngine<'a> {
    #[must_use]
    pub fn new(snapshot: &'a ProgressSnapshot) -> Self {
        let completed = snapshot
            .records
            .iter()
            .filter(|r| r.completed)
            .map(|r| (r.student_id.as_str(), r.content_type, r.content_id.as_str()))
            .collect();

        let mut items_by_module: HashMap<&str, Vec<&ContentItem>> = HashMap::new();
        for item in snapshot.items.iter() {
            items_by_module.entry(&item.module_id).or_default().push(item);
        }
        let mut modules_by_stage: HashMap<&str, Vec<&str>> = HashMap::new();
        for module in snapshot.modules.iter() {
            modules_by_stage.entry(&module.stage_id).or_default().push(&module.id);
        }
        let mut stages_by_course: HashMap<&str, Vec<&str>> = HashMap::new();
        for stage in snapshot.stages.iter() {
            stages_by_course.entry(&stage.course_id).or_default().push(&stage.id);
        }
        let mut tasks_by_project: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in snapshot.tasks.iter() {
            tasks_by_project.entry(&task.project_id).or_default().push(&task.id);
        }

        let mut latest: HashMap<(&str, &str), &Submission> = HashMap::new();
        for submission in snapshot.submissions.iter() {
            let key = (submission.student_id.as_str(), submission.task_id.as_str());
            match latest.get(&key) {
                Some(current) if !is_newer(submission, current) => {}
                _ => {
                    latest.insert(key, submission);
                }
            }
        }

        Self {
            snapshot,
            completed,
            items_by_module,
            modules_by_stage,
            stages_by_course,
            tasks_by_project,
            latest,
        }
    }

    /// Whether `student_id` has completed the item.
    #[must_use]
    pub fn is_item_complete(
        &self,
        student_id: &str,
        content_type: ContentType,
        content_id: &str,
    ) -> bool {
        self.completed.contains(&(student_id, content_type, content_id))
    }

    fn count_items<'i>(
        &self,
        student_id: &str,
        items: impl Iterator<Item = &'i ContentItem>,
    ) -> Completion {
        let mut completion = Completion::default();
        for item in items {
            completion.total += 1;
            if self.is_item_complete(student_id, item.content_type, &item.id) {
                completion.completed += 1;
            }
        }
        completion
    }

    fn module_items(&self, module_id: &str) -> impl Iterator<Item = &'a ContentItem> + '_ {
        self.items_by_module
            .get(module_id)
            .into_iter()
            .flatten()
            .copied()
    }

    fn stage_items(&self, stage_id: &str) -> impl Iterator<Item = &'a ContentItem> + '_ {
        self.modules_by_stage
            .get(stage_id)
            .into_iter()
            .flatten()
            .flat_map(|module_id| self.module_items(module_id))
    }

    fn course_items(&self, course_id: &str) -> impl Iterator<Item = &'a ContentItem> + '_ {
        self.stages_by_course
            .get(course_id)
            .into_iter()
            .flatten()
            .flat_map(|stage_id| self.stage_items(stage_id))
    }

    #[must_use]
    pub fn module_completion(&self, student_id: &str, module_id: &str) -> Completion {
        self.count_items(student_id, self.module_items(module_id))
    }

    #[must_use]
    pub fn stage_completion(&self, student_id: &str, stage_id: &str) -> Completion {
        self.count_items(student_id, self.stage_items(stage_id))
    }

    #[must_use]
    pub fn course_completion(&self, student_id: &str, course_id: &str) -> Completion {
        self.count_items(student_id, self.course_items(course_id))
    }

    /// Latest submission of `student_id` for `task_id`.
    #[must_use]
    pub fn latest_submission(&self, student_id: &str, task_id: &str) -> Option<&'a Submission> {
        self.latest.get(&(student_id, task_id)).copied()
    }

    #[must_use]
    pub fn is_task_complete(&self, student_id: &str, task_id: &str) -> bool {
        self.latest_submission(student_id, task_id)
            .is_some_and(|s| s.status.counts_as_complete())
    }

    #[must_use]
    pub fn project_completion(&self, student_id: &str, project_id: &str) -> Completion {
        let mut completion = Completion::default();
        for task_id in self.tasks_by_project.get(project_id).into_iter().flatten() {
            completion.total += 1;
            if self.is_task_complete(student_id, task_id) {
                completion.completed += 1;
            }
        }
        completion
    }

    /// Courses visible to `department`, ordered by position.
    #[must_use]
    pub fn courses_for(&self, department: Department) -> Vec<&'a Course> {
        let mut courses: Vec<&Course> = self
            .snapshot
            .courses
            .iter()
            .filter(|c| visible_to(c.department, department))
            .collect();
        courses.sort_by_key(|c| c.position);
        courses
    }

    /// Projects visible to `department`, ordered by position.
    #[must_use]
    pub fn projects_for(&self, department: Department) -> Vec<&'a Project> {
        let mut projects: Vec<&Project> = self
            .snapshot
            .projects
            .iter()
            .filter(|p| visible_to(p.department, department))
            .collect();
        projects.sort_by_key(|p| p.position);
        projects
    }

    /// Unrounded overall fraction for a student.
    fn overall_fraction(&self, student: &Student) -> (Option<f64>, Option<f64>, f64) {
        let course_mean = mean(
            self.courses_for(student.department)
                .iter()
                .map(|c| self.course_completion(&student.id, &c.id).fraction()),
        );
        let project_mean = mean(
            self.projects_for(student.department)
                .iter()
                .map(|p| self.project_completion(&student.id, &p.id).fraction()),
        );
        let overall = match (course_mean, project_mean) {
            (Some(c), Some(p)) => (c + p) / 2.0,
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => 0.0,
        };
        (course_mean, project_mean, overall)
    }

    /// Overall percentage for one student.
    #[must_use]
    pub fn student_overall(&self, student: &Student) -> u8 {
        percent_of(self.overall_fraction(student).2)
    }

    /// Full report for one student.
    #[must_use]
    pub fn student_report(&self, student: &Student) -> StudentProgressReport {
        let courses = self
            .courses_for(student.department)
            .into_iter()
            .map(|c| {
                entity_progress(&c.id, &c.title, self.course_completion(&student.id, &c.id))
            })
            .collect();
        let projects = self
            .projects_for(student.department)
            .into_iter()
            .map(|p| {
                entity_progress(&p.id, &p.title, self.project_completion(&student.id, &p.id))
            })
            .collect();
        let (course_mean, project_mean, overall) = self.overall_fraction(student);
        StudentProgressReport {
            student_id: student.id.clone(),
            courses,
            projects,
            course_average: percent_of(course_mean.unwrap_or(0.0)),
            project_average: percent_of(project_mean.unwrap_or(0.0)),
            overall: percent_of(overall),
        }
    }

    /// Mean overall percentage across Active students in `cohort`.
    #[must_use]
    pub fn cohort_progress(&self, cohort: Cohort) -> u8 {
        let overalls = self
            .snapshot
            .students
            .iter()
            .filter(|s| s.cohort == cohort && s.is_active())
            .map(|s| self.overall_fraction(s).2);
        percent_of(mean(overalls).unwrap_or(0.0))
    }
}

fn entity_progress(id: &str, title: &str, completion: Completion) -> EntityProgress {
    EntityProgress {
        id: id.to_string(),
        title: title.to_string(),
        completed: completion.completed,
        total: completion.total,
        percent: completion.percent(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

fn is_newer(candidate: &Submission, current: &Submission) -> bool {
    (candidate.updated_at, candidate.submitted_at, &candidate.id)
        > (current.updated_at, current.submitted_at, &current.id)
}
