//! Completion, achievement and badge commands.

use colored::Colorize;
use serde::Serialize;

use super::{Globals, print_json, with_session};
use crate::cli::{AchievementCommands, BadgeCommands};
use crate::context::{AwardOutcome, CompletionOutcome};
use crate::error::Result;
use crate::model::{BadgeAttachment, BadgeTargetType};
use crate::validate::parse_content_type;

#[derive(Serialize)]
struct AwardOutput<'a, T> {
    awarded: bool,
    record: &'a T,
}

impl<'a, T> From<&'a AwardOutcome<T>> for AwardOutput<'a, T> {
    fn from(outcome: &'a AwardOutcome<T>) -> Self {
        Self {
            awarded: outcome.is_new(),
            record: outcome.record(),
        }
    }
}

/// Execute `psync complete`.
///
/// # Errors
///
/// Returns an error if parsing or the write fails.
pub fn complete(
    globals: &Globals<'_>,
    student: &str,
    content_type: &str,
    content_id: &str,
) -> Result<()> {
    let content_type = parse_content_type(content_type)?;
    let outcome = with_session(globals, async |session| {
        session
            .progress()
            .mark_complete(student, content_type, content_id)
            .await
    })?;
    if globals.json {
        return print_json(&outcome);
    }
    print_completion(&outcome);
    Ok(())
}

fn print_completion(outcome: &CompletionOutcome) {
    let record = &outcome.record;
    if outcome.already_complete {
        println!(
            "{} {} was already complete for {}",
            record.content_type, record.content_id, record.student_id
        );
        return;
    }
    println!(
        "{} {} {} for {}",
        "Completed".green().bold(),
        record.content_type,
        record.content_id,
        record.student_id
    );
    println!(
        "  +{} xp, +{} coins",
        outcome.xp_awarded, outcome.currency_awarded
    );
    for badge in &outcome.badges {
        println!("  {} {}", "Badge earned:".green().bold(), badge.badge_id);
    }
}

/// Execute achievement commands.
///
/// # Errors
///
/// Returns an error if the achievement is unknown or the write fails.
pub fn achievement(command: &AchievementCommands, globals: &Globals<'_>) -> Result<()> {
    match command {
        AchievementCommands::Award {
            student,
            achievement,
        } => {
            let outcome = with_session(globals, async |session| {
                session.rewards().award_achievement(student, achievement).await
            })?;
            if globals.json {
                return print_json(&AwardOutput::from(&outcome));
            }
            print_award(outcome.is_new(), "Achievement", achievement, student);
            Ok(())
        }
    }
}

/// Execute badge commands.
///
/// # Errors
///
/// Returns an error if parsing fails, the badge is unknown or the write
/// fails.
pub fn badge(command: &BadgeCommands, globals: &Globals<'_>) -> Result<()> {
    match command {
        BadgeCommands::Award { student, badge } => {
            let outcome = with_session(globals, async |session| {
                session.rewards().award_badge(student, badge).await
            })?;
            if globals.json {
                return print_json(&AwardOutput::from(&outcome));
            }
            print_award(outcome.is_new(), "Badge", badge, student);
            Ok(())
        }
        BadgeCommands::Attach {
            badge,
            target_type,
            target_id,
        } => {
            let target_type: BadgeTargetType = target_type.parse()?;
            let attachment = with_session(globals, async |session| {
                session
                    .rewards()
                    .attach_badge(badge, target_type, target_id)
                    .await
            })?;
            print_attachment(globals, &attachment, "Attached")
        }
        BadgeCommands::Detach {
            badge,
            target_type,
            target_id,
        } => {
            let target_type: BadgeTargetType = target_type.parse()?;
            let attachment = with_session(globals, async |session| {
                session
                    .rewards()
                    .detach_badge(badge, target_type, target_id)
                    .await
            })?;
            print_attachment(globals, &attachment, "Detached")
        }
    }
}

fn print_award(is_new: bool, what: &str, id: &str, student: &str) {
    if is_new {
        println!("{} {what} {id} to {student}", "Awarded".green().bold());
    } else {
        println!("{student} already holds {what} {id}");
    }
}

fn print_attachment(globals: &Globals<'_>, attachment: &BadgeAttachment, verb: &str) -> Result<()> {
    if globals.json {
        return print_json(attachment);
    }
    println!(
        "{verb} badge {} {} {} {}",
        attachment.badge_id.cyan(),
        if verb == "Attached" { "to" } else { "from" },
        attachment.target_type,
        attachment.target_id
    );
    Ok(())
}
