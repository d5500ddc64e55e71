//! In-memory entity store.
//!
//! One ordered collection per entity kind, exposed as immutable
//! snapshots. The only ways to change a collection are
//! [`EntityStore::replace_all`], [`EntityStore::upsert_one`] and
//! [`EntityStore::remove_one`]; each is atomic and bumps both the
//! collection revision and the store-wide revision broadcast on a
//! `watch` channel.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::{
    Achievement, Badge, BadgeAttachment, ContentItem, Course, Module, Notification, ProgressRecord,
    Project, ProjectAssessment, Stage, Student, StudentAchievement, StudentBadge, Submission, Task,
};

/// Every kind of entity the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Student,
    Submission,
    ProjectAssessment,
    ProgressRecord,
    Achievement,
    StudentAchievement,
    Badge,
    BadgeAttachment,
    StudentBadge,
    Notification,
    Course,
    Stage,
    Module,
    ContentItem,
    Project,
    Task,
}

impl EntityKind {
    /// All kinds, in load order.
    pub const ALL: [Self; 16] = [
        Self::Course,
        Self::Stage,
        Self::Module,
        Self::ContentItem,
        Self::Project,
        Self::Task,
        Self::Achievement,
        Self::Badge,
        Self::BadgeAttachment,
        Self::Student,
        Self::Submission,
        Self::ProjectAssessment,
        Self::ProgressRecord,
        Self::StudentAchievement,
        Self::StudentBadge,
        Self::Notification,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Submission => "submission",
            Self::ProjectAssessment => "project assessment",
            Self::ProgressRecord => "progress record",
            Self::Achievement => "achievement",
            Self::StudentAchievement => "student achievement",
            Self::Badge => "badge",
            Self::BadgeAttachment => "badge attachment",
            Self::StudentBadge => "student badge",
            Self::Notification => "notification",
            Self::Course => "course",
            Self::Stage => "stage",
            Self::Module => "module",
            Self::ContentItem => "content item",
            Self::Project => "project",
            Self::Task => "task",
        }
    }

    /// Remote table backing this kind.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        match self {
            Self::Student => "students",
            Self::Submission => "submissions",
            Self::ProjectAssessment => "project_assessments",
            Self::ProgressRecord => "student_progress",
            Self::Achievement => "achievements",
            Self::StudentAchievement => "student_achievements",
            Self::Badge => "badges",
            Self::BadgeAttachment => "badge_attachments",
            Self::StudentBadge => "student_badges",
            Self::Notification => "notifications",
            Self::Course => "courses",
            Self::Stage => "stages",
            Self::Module => "modules",
            Self::ContentItem => "content_items",
            Self::Project => "projects",
            Self::Task => "tasks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity held by the store.
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;
}

/// Gives the store access to the collection for `Self`.
pub trait Stored: Entity {
    #[doc(hidden)]
    fn slot(store: &EntityStore) -> &RwLock<Collection<Self>>;
}

/// One collection plus its revision.
#[derive(Debug)]
pub struct Collection<T> {
    items: Arc<Vec<T>>,
    revision: u64,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            revision: 0,
        }
    }
}

macro_rules! stored {
    ($($ty:ty => $field:ident, $kind:ident;)*) => {
        /// Constructed per session and shared by reference.
        #[derive(Debug)]
        pub struct EntityStore {
            $($field: RwLock<Collection<$ty>>,)*
            revision: watch::Sender<u64>,
        }

        impl EntityStore {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    $($field: RwLock::default(),)*
                    revision: watch::Sender::new(0),
                }
            }

            /// Empty every collection.
            pub fn clear(&self) {
                $(self.replace_all::<$ty>(Vec::new());)*
            }
        }

        $(
            impl Entity for $ty {
                const KIND: EntityKind = EntityKind::$kind;

                fn id(&self) -> &str {
                    &self.id
                }
            }

            impl Stored for $ty {
                fn slot(store: &EntityStore) -> &RwLock<Collection<Self>> {
                    &store.$field
                }
            }
        )*
    };
}

stored! {
    Student => students, Student;
    Submission => submissions, Submission;
    ProjectAssessment => project_assessments, ProjectAssessment;
    ProgressRecord => progress, ProgressRecord;
    Achievement => achievements, Achievement;
    StudentAchievement => student_achievements, StudentAchievement;
    Badge => badges, Badge;
    BadgeAttachment => badge_attachments, BadgeAttachment;
    StudentBadge => student_badges, StudentBadge;
    Notification => notifications, Notification;
    Course => courses, Course;
    Stage => stages, Stage;
    Module => modules, Module;
    ContentItem => content_items, ContentItem;
    Project => projects, Project;
    Task => tasks, Task;
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    /// Immutable view of the whole collection.
    #[must_use]
    pub fn snapshot<T: Stored>(&self) -> Arc<Vec<T>> {
        let guard = T::slot(self).read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard.items)
    }

    /// Snapshot together with the revision it was taken at.
    #[must_use]
    pub fn snapshot_with_revision<T: Stored>(&self) -> (Arc<Vec<T>>, u64) {
        let guard = T::slot(self).read().unwrap_or_else(PoisonError::into_inner);
        (Arc::clone(&guard.items), guard.revision)
    }

    #[must_use]
    pub fn get<T: Stored>(&self, id: &str) -> Option<T> {
        self.find(|item: &T| item.id() == id)
    }

    /// First item matching `pred`.
    pub fn find<T: Stored>(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.snapshot::<T>().iter().find(|item| pred(item)).cloned()
    }

    /// Every item matching `pred`, in collection order.
    pub fn filter<T: Stored>(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.snapshot::<T>()
            .iter()
            .filter(|item| pred(item))
            .cloned()
            .collect()
    }

    /// Replace the whole collection.
    pub fn replace_all<T: Stored>(&self, items: Vec<T>) {
        self.restore(Arc::new(items));
    }

    /// Put back a snapshot taken earlier.
    pub fn restore<T: Stored>(&self, items: Arc<Vec<T>>) {
        {
            let mut guard = T::slot(self).write().unwrap_or_else(PoisonError::into_inner);
            guard.items = items;
            guard.revision += 1;
        }
        self.bump();
    }

    /// Insert `item`, or replace the first element matching `matches`.
    ///
    /// Any further matches are removed so a business key never appears
    /// twice. Returns the item that was replaced.
    pub fn upsert_one<T: Stored>(&self, item: T, matches: impl Fn(&T) -> bool) -> Option<T> {
        let replaced = {
            let mut guard = T::slot(self).write().unwrap_or_else(PoisonError::into_inner);
            let mut next = Vec::with_capacity(guard.items.len() + 1);
            let mut replaced = None;
            let mut pending = Some(item);
            for existing in guard.items.iter() {
                if matches(existing) {
                    if let Some(new) = pending.take() {
                        replaced = Some(existing.clone());
                        next.push(new);
                    }
                } else {
                    next.push(existing.clone());
                }
            }
            if let Some(new) = pending {
                next.push(new);
            }
            guard.items = Arc::new(next);
            guard.revision += 1;
            replaced
        };
        self.bump();
        replaced
    }

    /// Upsert matched by primary id.
    pub fn upsert_by_id<T: Stored>(&self, item: T) -> Option<T> {
        let id = item.id().to_string();
        self.upsert_one(item, |existing: &T| existing.id() == id)
    }

    /// Remove the entity with `id`, returning it.
    pub fn remove_one<T: Stored>(&self, id: &str) -> Option<T> {
        let removed = {
            let mut guard = T::slot(self).write().unwrap_or_else(PoisonError::into_inner);
            let position = guard.items.iter().position(|item| item.id() == id)?;
            let mut next = guard.items.as_ref().clone();
            let removed = next.remove(position);
            guard.items = Arc::new(next);
            guard.revision += 1;
            removed
        };
        self.bump();
        Some(removed)
    }

    /// Revision of one collection.
    #[must_use]
    pub fn revision_of<T: Stored>(&self) -> u64 {
        T::slot(self)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .revision
    }

    /// Store-wide revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that wakes on every store mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}
