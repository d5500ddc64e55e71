//! Student model.
//!
//! Students are created on invite with a temporary id that the store
//! replaces with its own. They are never hard-deleted; deactivation
//! flips the status to [`StudentStatus::Inactive`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of ids minted locally before the store assigns one.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Cohort tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Foundation,
    Intermediate,
    Advanced,
}

impl Cohort {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

impl std::str::FromStr for Cohort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "foundation" => Ok(Self::Foundation),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            _ => Err(Error::InvalidArgument(format!("Unknown cohort: {s}"))),
        }
    }
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Departments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Engineering,
    Creative,
}

impl Department {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Engineering => "engineering",
            Self::Creative => "creative",
        }
    }
}

impl std::str::FromStr for Department {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "engineering" => Ok(Self::Engineering),
            "creative" => Ok(Self::Creative),
            _ => Err(Error::InvalidArgument(format!("Unknown department: {s}"))),
        }
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Student lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    AtRisk,
    Inactive,
    InvitePending,
}

impl StudentStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AtRisk => "at_risk",
            Self::Inactive => "inactive",
            Self::InvitePending => "invite_pending",
        }
    }
}

impl std::str::FromStr for StudentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "at_risk" => Ok(Self::AtRisk),
            "inactive" => Ok(Self::Inactive),
            "invite_pending" => Ok(Self::InvitePending),
            _ => Err(Error::InvalidStatus(format!("Unknown student status: {s}"))),
        }
    }
}

impl std::fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A student profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Store-assigned id, or a `temp_` id while an invite is in flight
    pub id: String,

    pub display_name: String,

    /// Unique login handle, when the school uses them
    pub username: Option<String>,

    pub cohort: Cohort,

    pub department: Department,

    pub status: StudentStatus,

    /// Experience points
    pub xp: u64,

    /// Spendable currency
    pub balance: u64,

    pub predicted_grade: Option<String>,

    pub created_at: i64,

    pub updated_at: i64,
}

impl Student {
    /// A freshly invited student with a temporary id.
    #[must_use]
    pub fn invite(display_name: &str, cohort: Cohort, department: Department) -> Self {
        let now = super::now_millis();
        Self {
            id: format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()),
            display_name: display_name.to_string(),
            username: None,
            cohort,
            department,
            status: StudentStatus::InvitePending,
            xp: 0,
            balance: 0,
            predicted_grade: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    /// Whether the id is still the local placeholder.
    #[must_use]
    pub fn has_temp_id(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == StudentStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_defaults() {
        let s = Student::invite("Ada", Cohort::Foundation, Department::Engineering);
        assert!(s.has_temp_id());
        assert_eq!(s.status, StudentStatus::InvitePending);
        assert_eq!(s.xp, 0);
        assert!(!s.is_active());
    }

    #[test]
    fn test_status_codec() {
        for status in [
            StudentStatus::Active,
            StudentStatus::AtRisk,
            StudentStatus::Inactive,
            StudentStatus::InvitePending,
        ] {
            assert_eq!(status.as_str().parse::<StudentStatus>().unwrap(), status);
        }
        assert!("gone".parse::<StudentStatus>().is_err());
    }
}
