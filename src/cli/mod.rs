//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// psync - optimistic sync and progress rollups for a learning dashboard
#[derive(Parser, Debug)]
#[command(name = "psync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.psync/data/psync.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Acting user id (default: PSYNC_USER, then config)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Output as JSON (also the default when stdout is not a terminal)
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the local database
    Init {
        /// Overwrite an existing database
        #[arg(long)]
        force: bool,

        /// JSON catalog of courses, projects, achievements and badges to load
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Student roster
    Student {
        #[command(subcommand)]
        command: StudentCommands,
    },

    /// Task submissions and marking
    Submission {
        #[command(subcommand)]
        command: SubmissionCommands,
    },

    /// Mark a content item complete for a student
    Complete {
        /// Student id
        student: String,

        /// Content type (quiz, lesson, walkthrough)
        content_type: String,

        /// Content item id
        content_id: String,
    },

    /// Achievements
    Achievement {
        #[command(subcommand)]
        command: AchievementCommands,
    },

    /// Badges and their attachments
    Badge {
        #[command(subcommand)]
        command: BadgeCommands,
    },

    /// Progress rollups
    Progress {
        #[command(subcommand)]
        command: ProgressCommands,
    },

    /// Notifications for the acting user
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },

    /// Print a student's progress whenever it changes
    Watch {
        /// Student id
        student: String,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long = "for")]
        duration: Option<u64>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Student Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum StudentCommands {
    /// Invite a student
    Invite {
        /// Display name
        name: String,

        /// Cohort (foundation, intermediate, advanced)
        #[arg(long, default_value = "foundation")]
        cohort: String,

        /// Department (engineering, creative)
        #[arg(long, default_value = "engineering")]
        department: String,

        /// Unique login handle
        #[arg(long)]
        username: Option<String>,
    },

    /// List students
    List {
        /// Filter by cohort
        #[arg(long)]
        cohort: Option<String>,

        /// Filter by status (active, at_risk, inactive, invite_pending)
        #[arg(long)]
        status: Option<String>,
    },

    /// Update a student's profile
    Update {
        /// Student id
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        cohort: Option<String>,

        #[arg(long)]
        department: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        predicted_grade: Option<String>,
    },

    /// Mark a student inactive
    Deactivate {
        /// Student id
        id: String,
    },

    /// Grant xp and currency, or spend currency
    Reward {
        /// Student id
        id: String,

        #[arg(long, default_value_t = 0)]
        xp: u64,

        #[arg(long, default_value_t = 0)]
        currency: u64,

        /// Spend this much currency instead of granting
        #[arg(long, conflicts_with_all = ["xp", "currency"])]
        spend: Option<u64>,
    },
}

// ============================================================================
// Submission Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SubmissionCommands {
    /// Submit work for a task
    Submit {
        /// Task id
        task: String,

        /// Student id
        student: String,

        /// Evidence: URLs become links, anything else text (repeatable)
        #[arg(long, short)]
        evidence: Vec<String>,
    },

    /// Mark a submission (graded or resubmission_required)
    Grade {
        /// Submission id
        id: String,

        /// Outcome: graded / marked, or resubmission_required / resubmit
        status: String,

        #[arg(long)]
        feedback: Option<String>,
    },

    /// Sign a submission off as verified
    Verify {
        /// Submission id
        id: String,
    },

    /// Ask for a task to be verified
    RequestVerification {
        /// Task id
        task: String,

        /// Student id
        student: String,
    },

    /// Record an internal-verification review
    Iv {
        /// Submission id
        id: String,

        /// IV status (pending, approved, action_required)
        status: String,

        #[arg(long)]
        feedback: Option<String>,
    },

    /// List submissions
    List {
        /// Filter by student id
        #[arg(long)]
        student: Option<String>,

        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },

    /// Delete a submission
    Delete {
        /// Submission id
        id: String,
    },
}

// ============================================================================
// Reward Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum AchievementCommands {
    /// Award an achievement (idempotent)
    Award {
        /// Student id
        student: String,

        /// Achievement id
        achievement: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BadgeCommands {
    /// Award a badge (idempotent)
    Award {
        /// Student id
        student: String,

        /// Badge id
        badge: String,
    },

    /// Attach a badge to a content entity
    Attach {
        /// Badge id
        badge: String,

        /// Target type (course, module, stage, project, task, achievement)
        target_type: String,

        /// Target id
        target_id: String,
    },

    /// Detach a badge; students keep badges already earned
    Detach {
        /// Badge id
        badge: String,

        /// Target type
        target_type: String,

        /// Target id
        target_id: String,
    },
}

// ============================================================================
// Progress Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ProgressCommands {
    /// One student's course, project and overall percentages
    Student {
        /// Student id
        id: String,
    },

    /// Mean overall progress of a cohort's active students
    Cohort {
        /// Cohort (foundation, intermediate, advanced)
        cohort: String,
    },
}

// ============================================================================
// Notification Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum NotificationCommands {
    /// List notifications, newest first
    List {
        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },

    /// Mark one notification read
    Read {
        /// Notification id
        id: String,
    },

    /// Mark every notification read
    ReadAll,
}
