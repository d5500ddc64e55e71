//! Student roster commands.

use colored::Colorize;
use serde::Serialize;

use super::{Globals, print_json, truncate, with_session};
use crate::cli::StudentCommands;
use crate::context::StudentPatch;
use crate::error::Result;
use crate::model::{Student, StudentStatus};
use crate::validate::{parse_cohort, parse_department};

#[derive(Serialize)]
struct StudentListOutput<'a> {
    students: &'a [Student],
    count: usize,
}

/// Execute student commands.
///
/// # Errors
///
/// Returns an error if parsing or the write fails.
pub fn execute(command: &StudentCommands, globals: &Globals<'_>) -> Result<()> {
    match command {
        StudentCommands::Invite {
            name,
            cohort,
            department,
            username,
        } => {
            let cohort = parse_cohort(cohort)?;
            let department = parse_department(department)?;
            let student = with_session(globals, async |session| {
                session
                    .students()
                    .invite(name, cohort, department, username.as_deref())
                    .await
            })?;
            if globals.json {
                print_json(&student)
            } else {
                println!("Invited {} [{}]", student.display_name, student.id.cyan());
                println!("  Cohort:     {}", student.cohort);
                println!("  Department: {}", student.department);
                Ok(())
            }
        }
        StudentCommands::List { cohort, status } => {
            let cohort = cohort.as_deref().map(parse_cohort).transpose()?;
            let status = status
                .as_deref()
                .map(str::parse::<StudentStatus>)
                .transpose()?;
            let students =
                with_session(globals, async |session| Ok(session.students().list(cohort, status)))?;
            if globals.json {
                print_json(&StudentListOutput {
                    students: &students,
                    count: students.len(),
                })
            } else {
                print_student_list(&students);
                Ok(())
            }
        }
        StudentCommands::Update {
            id,
            name,
            username,
            cohort,
            department,
            status,
            predicted_grade,
        } => {
            let patch = StudentPatch {
                display_name: name.clone(),
                username: username.clone(),
                cohort: cohort.as_deref().map(parse_cohort).transpose()?,
                department: department.as_deref().map(parse_department).transpose()?,
                status: status.as_deref().map(str::parse::<StudentStatus>).transpose()?,
                predicted_grade: predicted_grade.clone(),
            };
            let student =
                with_session(globals, async |session| session.students().update(id, patch).await)?;
            print_student(globals, &student, "Updated")
        }
        StudentCommands::Deactivate { id } => {
            let student =
                with_session(globals, async |session| session.students().deactivate(id).await)?;
            print_student(globals, &student, "Deactivated")
        }
        StudentCommands::Reward {
            id,
            xp,
            currency,
            spend,
        } => {
            let student = with_session(globals, async |session| match spend {
                Some(amount) => session.students().spend_balance(id, *amount).await,
                None => session.students().grant_rewards(id, *xp, *currency).await,
            })?;
            if globals.json {
                print_json(&student)
            } else {
                println!(
                    "{} now has {} xp and {} coins",
                    student.display_name,
                    student.xp.to_string().green(),
                    student.balance.to_string().yellow()
                );
                Ok(())
            }
        }
    }
}

fn print_student(globals: &Globals<'_>, student: &Student, verb: &str) -> Result<()> {
    if globals.json {
        return print_json(student);
    }
    println!("{verb} {} [{}]", student.display_name, student.id.cyan());
    println!("  Status: {}", student.status);
    Ok(())
}

fn status_icon(status: StudentStatus) -> &'static str {
    match status {
        StudentStatus::Active => "●",
        StudentStatus::AtRisk => "!",
        StudentStatus::Inactive => "○",
        StudentStatus::InvitePending => "◌",
    }
}

fn print_student_list(students: &[Student]) {
    if students.is_empty() {
        println!("No students found.");
        return;
    }
    println!("Students ({} found):", students.len());
    println!();
    for student in students {
        println!(
            "{} [{}] {} {} {}",
            status_icon(student.status),
            student.id.cyan(),
            truncate(&student.display_name, 40),
            format!("({}, {})", student.cohort, student.department).dimmed(),
            format!("{} xp", student.xp).dimmed()
        );
    }
}
