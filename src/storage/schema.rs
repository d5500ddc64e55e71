//! Database schema definitions.
//!
//! This is the base DDL for the authoritative store. Columns added later
//! in the product's life live in [`super::migrations`], so a database
//! can be opened at an older version to reproduce schema drift.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The base SQL schema.
///
/// Timestamps are INTEGER Unix milliseconds. Booleans are INTEGER 0/1.
/// List and object columns (evidence, criteria) hold JSON text.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- People
-- ====================

-- Students: the store assigns the id on insert
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
    display_name TEXT NOT NULL,
    username TEXT UNIQUE,
    cohort TEXT NOT NULL,
    department TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'invite_pending',
    xp INTEGER NOT NULL DEFAULT 0 CHECK (xp >= 0),
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_students_cohort ON students(cohort, status);

-- ====================
-- Content hierarchy (course > stage > module > item)
-- ====================

CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    department TEXT,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS stages (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL,
    title TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS modules (
    id TEXT PRIMARY KEY,
    stage_id TEXT NOT NULL,
    title TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS content_items (
    id TEXT PRIMARY KEY,
    module_id TEXT NOT NULL,
    content_type TEXT NOT NULL CHECK (content_type IN ('quiz', 'lesson', 'walkthrough')),
    title TEXT NOT NULL,
    xp_reward INTEGER NOT NULL DEFAULT 0,
    currency_reward INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_stages_course ON stages(course_id);
CREATE INDEX IF NOT EXISTS idx_modules_stage ON modules(stage_id);
CREATE INDEX IF NOT EXISTS idx_items_module ON content_items(module_id);

-- ====================
-- Projects (project > task)
-- ====================

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    department TEXT,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);

-- Submissions: one live row per (task, student)
CREATE TABLE IF NOT EXISTS submissions (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    student_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending_mark',
    evidence TEXT NOT NULL DEFAULT '[]',
    feedback TEXT,
    submitted_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (task_id, student_id)
);

CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id);

CREATE TABLE IF NOT EXISTS project_assessments (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    grade TEXT,
    feedback TEXT,
    assessed_by TEXT,
    updated_at INTEGER NOT NULL,
    UNIQUE (student_id, project_id)
);

-- ====================
-- Progress
-- ====================

CREATE TABLE IF NOT EXISTS student_progress (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    content_id TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    completed_at INTEGER,
    xp_awarded INTEGER NOT NULL DEFAULT 0,
    currency_awarded INTEGER NOT NULL DEFAULT 0,
    UNIQUE (student_id, content_type, content_id)
);

CREATE INDEX IF NOT EXISTS idx_progress_student ON student_progress(student_id);

-- ====================
-- Rewards
-- ====================

CREATE TABLE IF NOT EXISTS achievements (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    category TEXT NOT NULL DEFAULT 'general',
    xp_value INTEGER NOT NULL DEFAULT 0,
    criteria TEXT
);

CREATE TABLE IF NOT EXISTS student_achievements (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    achievement_id TEXT NOT NULL,
    earned_at INTEGER NOT NULL,
    UNIQUE (student_id, achievement_id)
);

CREATE TABLE IF NOT EXISTS badges (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    icon TEXT,
    color TEXT
);

CREATE TABLE IF NOT EXISTS badge_attachments (
    id TEXT PRIMARY KEY,
    badge_id TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (badge_id, target_type, target_id)
);

CREATE TABLE IF NOT EXISTS student_badges (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    badge_id TEXT NOT NULL,
    awarded_at INTEGER NOT NULL,
    UNIQUE (student_id, badge_id)
);

-- ====================
-- Notifications
-- ====================

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'info',
    link TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at DESC);
";

/// Apply the base schema and every migration.
///
/// Idempotent: all statements use `IF NOT EXISTS` and migrations are
/// tracked.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    apply_schema_through(conn, None)
}

/// Apply the base schema and migrations up to `limit` (all when `None`).
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema_through(conn: &Connection, limit: Option<usize>) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    super::migrations::run_migrations(conn, limit)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

/// Check if a column exists in a table.
///
/// # Errors
///
/// Returns an error if the pragma query fails.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?
        .exists([table, column])
}
