//! Progress rollup and watch commands.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use serde::Serialize;
use tracing::{debug, warn};

use super::{Globals, print_json, truncate, with_session};
use crate::cli::ProgressCommands;
use crate::config::load_config;
use crate::error::{Error, Result};
use crate::model::Cohort;
use crate::progress::{
    EntityProgress, ProgressEngine, ProgressSnapshot, StudentProgressReport, watch_student,
};
use crate::store::EntityKind;
use crate::validate::parse_cohort;

#[derive(Serialize)]
struct CohortOutput {
    cohort: Cohort,
    active_students: usize,
    percent: u8,
}

/// Execute progress commands.
///
/// # Errors
///
/// Returns an error if the student is unknown or loading fails.
pub fn execute(command: &ProgressCommands, globals: &Globals<'_>) -> Result<()> {
    match command {
        ProgressCommands::Student { id } => {
            let report = with_session(globals, async |session| session.progress().report(id))?;
            if globals.json {
                print_json(&report)
            } else {
                print_report(&report);
                Ok(())
            }
        }
        ProgressCommands::Cohort { cohort } => {
            let cohort = parse_cohort(cohort)?;
            let output = with_session(globals, async |session| {
                let snapshot = ProgressSnapshot::from_store(session.store());
                let active_students = snapshot
                    .students
                    .iter()
                    .filter(|s| s.cohort == cohort && s.is_active())
                    .count();
                Ok(CohortOutput {
                    cohort,
                    active_students,
                    percent: ProgressEngine::new(&snapshot).cohort_progress(cohort),
                })
            })?;
            if globals.json {
                print_json(&output)
            } else {
                println!(
                    "{} cohort: {} across {} active students",
                    output.cohort,
                    format!("{}%", output.percent).bold(),
                    output.active_students
                );
                Ok(())
            }
        }
    }
}

/// Print `student`'s report now and after every change until Ctrl-C
/// or `duration` seconds pass.
///
/// Pushed changes arrive through the session's realtime bridge. The
/// store is also reloaded every poll interval so writes from other
/// processes sharing the database show up.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the student is not visible.
pub fn watch(globals: &Globals<'_>, student: &str, duration: Option<u64>) -> Result<()> {
    let poll = load_config()?.poll_interval();
    with_session(globals, async |session| {
        let (mut reports, task) = watch_student(Arc::clone(session.store()), student);
        let Some(initial) = reports.borrow_and_update().clone() else {
            task.abort();
            return Err(Error::NotFound {
                kind: EntityKind::Student,
                id: student.to_string(),
            });
        };
        emit(globals.json, &initial)?;

        let deadline = async {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let mut reload = tokio::time::interval(poll);
        reload.tick().await;

        loop {
            tokio::select! {
                changed = reports.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = reports.borrow_and_update().clone();
                    match current {
                        Some(report) => emit(globals.json, &report)?,
                        None => {
                            warn!(student_id = %student, "Student left the store");
                            break;
                        }
                    }
                }
                _ = reload.tick() => {
                    if let Err(e) = session.reload_all().await {
                        warn!(error = %e, "Reload failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupted");
                    break;
                }
                () = &mut deadline => break,
            }
        }
        task.abort();
        Ok(())
    })
}

fn emit(json: bool, report: &StudentProgressReport) -> Result<()> {
    if json {
        print_json(report)
    } else {
        println!(
            "{} {} overall (courses {}%, projects {}%)",
            report.student_id.cyan(),
            format!("{}%", report.overall).bold(),
            report.course_average,
            report.project_average
        );
        Ok(())
    }
}

fn print_rows(heading: &str, rows: &[EntityProgress]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("{}", heading.cyan().bold());
    for row in rows {
        let percent = format!("{:>3}%", row.percent);
        let percent = if row.percent == 100 {
            percent.green()
        } else {
            percent.normal()
        };
        println!(
            "  {percent} {} {}",
            truncate(&row.title, 48),
            format!("({}/{})", row.completed, row.total).dimmed()
        );
    }
}

fn print_report(report: &StudentProgressReport) {
    println!(
        "Progress for {}: {}",
        report.student_id.cyan(),
        format!("{}%", report.overall).bold()
    );
    println!(
        "  Courses {}%  Projects {}%",
        report.course_average, report.project_average
    );
    print_rows("Courses", &report.courses);
    print_rows("Projects", &report.projects);
}
