//! Persisted per-user notifications.
//!
//! Not to be confused with celebration events, which are transient.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Grade,
    Achievement,
    Badge,
}

impl NotificationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Grade => "grade",
            Self::Achievement => "achievement",
            Self::Badge => "badge",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "grade" => Ok(Self::Grade),
            "achievement" => Ok(Self::Achievement),
            "badge" => Ok(Self::Badge),
            _ => Err(Error::InvalidArgument(format!("Unknown notification kind: {s}"))),
        }
    }
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: i64,
}

impl Notification {
    #[must_use]
    pub fn new(user_id: &str, title: &str, message: &str, kind: NotificationKind) -> Self {
        Self {
            id: super::new_id("ntf"),
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            kind,
            link: None,
            is_read: false,
            created_at: super::now_millis(),
        }
    }

    #[must_use]
    pub fn with_link(mut self, link: &str) -> Self {
        self.link = Some(link.to_string());
        self
    }
}
