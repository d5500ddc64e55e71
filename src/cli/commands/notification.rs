//! Notification commands for the acting user.

use colored::Colorize;
use serde::Serialize;

use super::{Globals, print_json, truncate, with_session};
use crate::cli::NotificationCommands;
use crate::error::Result;
use crate::model::Notification;

#[derive(Serialize)]
struct NotificationListOutput<'a> {
    notifications: &'a [Notification],
    unread: usize,
}

#[derive(Serialize)]
struct ReadAllOutput {
    marked: usize,
}

/// Execute notification commands.
///
/// # Errors
///
/// Returns an error if the notification is unknown or the write fails.
pub fn execute(command: &NotificationCommands, globals: &Globals<'_>) -> Result<()> {
    match command {
        NotificationCommands::List { unread } => {
            let (notifications, unread_count) = with_session(globals, async |session| {
                let user = &session.identity().user_id;
                let notifications = session.notifications();
                Ok((notifications.list(user, *unread), notifications.unread_count(user)))
            })?;
            if globals.json {
                return print_json(&NotificationListOutput {
                    notifications: &notifications,
                    unread: unread_count,
                });
            }
            if notifications.is_empty() {
                println!("No notifications.");
                return Ok(());
            }
            println!("Notifications ({unread_count} unread):");
            println!();
            for n in &notifications {
                let marker = if n.is_read { " " } else { "●" };
                println!("{marker} [{}] {}", n.id.cyan(), n.title.bold());
                println!("    {}", truncate(&n.message, 70).dimmed());
            }
            Ok(())
        }
        NotificationCommands::Read { id } => {
            let notification =
                with_session(globals, async |session| session.notifications().mark_read(id).await)?;
            if globals.json {
                print_json(&notification)
            } else {
                println!("Marked [{}] read", notification.id.cyan());
                Ok(())
            }
        }
        NotificationCommands::ReadAll => {
            let marked = with_session(globals, async |session| {
                session
                    .notifications()
                    .mark_all_read(&session.identity().user_id)
                    .await
            })?;
            if globals.json {
                print_json(&ReadAllOutput { marked })
            } else {
                println!("Marked {marked} notifications read");
                Ok(())
            }
        }
    }
}
