//! User-facing alerts raised by failed writes.
//!
//! Alerts are what the presentation layer shows when a write could not
//! be saved: permission denials block until acknowledged, conflicts
//! carry a field-specific message. They are kept apart from
//! celebrations, which only ever report good news.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::error::Error;
use crate::gateway::RemoteErrorKind;

/// How an alert must be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Must be acknowledged before the user continues.
    Blocking,
    /// Shown inline next to the offending field or action.
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Alert {
    /// The alert for `err`, if it is one the user must see.
    #[must_use]
    pub fn from_error(err: &Error) -> Option<Self> {
        let (severity, field) = match err {
            Error::Remote(e) => match &e.kind {
                RemoteErrorKind::PermissionDenied => (Severity::Blocking, None),
                RemoteErrorKind::Conflict => (Severity::Warning, e.column.clone()),
                _ => return None,
            },
            _ => return None,
        };
        Some(Self {
            severity,
            code: err.error_code().as_str().to_string(),
            message: err.user_message(),
            field,
            hint: err.hint(),
        })
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Shared FIFO of pending alerts.
#[derive(Debug, Clone, Default)]
pub struct Alerts {
    inner: Arc<Mutex<VecDeque<Alert>>>,
}

impl Alerts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, alert: Alert) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(alert);
    }

    /// Raise the alert for `err`, if any. Returns whether one was raised.
    pub fn raise(&self, err: &Error) -> bool {
        match Alert::from_error(err) {
            Some(alert) => {
                self.push(alert);
                true
            }
            None => false,
        }
    }

    /// Oldest pending alert.
    #[must_use]
    pub fn head(&self) -> Option<Alert> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Acknowledge the oldest alert.
    pub fn dismiss_head(&self) -> Option<Alert> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Remove and return every pending alert.
    pub fn drain(&self) -> Vec<Alert> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(Alert::is_blocking)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
