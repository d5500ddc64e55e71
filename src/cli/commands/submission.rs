//! Submission and marking commands.

use colored::Colorize;
use serde::Serialize;

use super::{Globals, print_json, truncate, with_session};
use crate::cli::SubmissionCommands;
use crate::context::Grade;
use crate::error::{Error, Result};
use crate::model::{EvidenceItem, StudentBadge, Submission, SubmissionStatus};
use crate::validate::{parse_iv_status, parse_submission_status};

#[derive(Serialize)]
struct MarkedOutput<'a> {
    submission: &'a Submission,
    badges: &'a [StudentBadge],
}

#[derive(Serialize)]
struct SubmissionListOutput<'a> {
    submissions: &'a [Submission],
    count: usize,
}

/// Map a status argument onto a marking decision.
fn parse_grade(input: &str) -> Result<Grade> {
    match parse_submission_status(input)? {
        SubmissionStatus::Graded => Ok(Grade::Pass),
        SubmissionStatus::ResubmissionRequired => Ok(Grade::Resubmit),
        other => Err(Error::InvalidArgument(format!(
            "Cannot grade a submission as {other}; use graded or resubmission_required"
        ))),
    }
}

/// Execute submission commands.
///
/// # Errors
///
/// Returns an error if parsing or the write fails.
pub fn execute(command: &SubmissionCommands, globals: &Globals<'_>) -> Result<()> {
    match command {
        SubmissionCommands::Submit {
            task,
            student,
            evidence,
        } => {
            let evidence: Vec<EvidenceItem> =
                evidence.iter().map(|e| EvidenceItem::from_input(e)).collect();
            let submission = with_session(globals, async |session| {
                session.submissions().submit(task, student, evidence).await
            })?;
            print_submission(globals, &submission, "Submitted")
        }
        SubmissionCommands::Grade {
            id,
            status,
            feedback,
        } => {
            let grade = parse_grade(status)?;
            let (submission, badges) = with_session(globals, async |session| {
                session
                    .submissions()
                    .grade(id, grade, feedback.as_deref())
                    .await
            })?;
            print_marked(globals, &submission, &badges)
        }
        SubmissionCommands::Verify { id } => {
            let (submission, badges) =
                with_session(globals, async |session| session.submissions().verify(id).await)?;
            print_marked(globals, &submission, &badges)
        }
        SubmissionCommands::RequestVerification { task, student } => {
            let submission = with_session(globals, async |session| {
                session.submissions().request_verification(task, student).await
            })?;
            print_submission(globals, &submission, "Verification requested for")
        }
        SubmissionCommands::Iv {
            id,
            status,
            feedback,
        } => {
            let status = parse_iv_status(status)?;
            let submission = with_session(globals, async |session| {
                session
                    .submissions()
                    .review_iv(id, status, feedback.as_deref())
                    .await
            })?;
            if globals.json {
                print_json(&submission)
            } else {
                println!("IV {} for [{}]", status.as_str(), submission.id.cyan());
                Ok(())
            }
        }
        SubmissionCommands::List { student, status } => {
            let status = status
                .as_deref()
                .map(parse_submission_status)
                .transpose()?;
            let submissions = with_session(globals, async |session| {
                Ok(session.submissions().list(student.as_deref(), status))
            })?;
            if globals.json {
                print_json(&SubmissionListOutput {
                    submissions: &submissions,
                    count: submissions.len(),
                })
            } else {
                print_submission_list(&submissions);
                Ok(())
            }
        }
        SubmissionCommands::Delete { id } => {
            let submission =
                with_session(globals, async |session| session.submissions().delete(id).await)?;
            print_submission(globals, &submission, "Deleted")
        }
    }
}

fn print_submission(globals: &Globals<'_>, submission: &Submission, verb: &str) -> Result<()> {
    if globals.json {
        return print_json(submission);
    }
    println!(
        "{verb} [{}] task {} for {}",
        submission.id.cyan(),
        submission.task_id,
        submission.student_id
    );
    println!("  Status: {}", submission.status);
    Ok(())
}

fn print_marked(globals: &Globals<'_>, submission: &Submission, badges: &[StudentBadge]) -> Result<()> {
    if globals.json {
        return print_json(&MarkedOutput { submission, badges });
    }
    println!("Marked [{}] as {}", submission.id.cyan(), submission.status);
    if let Some(feedback) = &submission.feedback {
        println!("  Feedback: {}", truncate(feedback, 60));
    }
    for badge in badges {
        println!("  {} {}", "Badge earned:".green().bold(), badge.badge_id);
    }
    Ok(())
}

fn print_submission_list(submissions: &[Submission]) {
    if submissions.is_empty() {
        println!("No submissions found.");
        return;
    }
    println!("Submissions ({} found):", submissions.len());
    println!();
    for submission in submissions {
        let status = submission.status.as_str();
        let status = if submission.status.counts_as_complete() {
            status.green()
        } else if submission.status == SubmissionStatus::ResubmissionRequired {
            status.yellow()
        } else {
            status.normal()
        };
        println!(
            "[{}] {} {} {}",
            submission.id.cyan(),
            submission.task_id,
            submission.student_id.dimmed(),
            status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grade_accepts_synonyms() {
        assert_eq!(parse_grade("marked").unwrap(), Grade::Pass);
        assert_eq!(parse_grade("Resubmit").unwrap(), Grade::Resubmit);
    }

    #[test]
    fn test_parse_grade_rejects_other_statuses() {
        assert!(matches!(parse_grade("verified"), Err(Error::InvalidArgument(_))));
        assert!(matches!(parse_grade("bogus"), Err(Error::InvalidStatus(_))));
    }
}
