//! Lenient input parsing for the CLI.
//!
//! Provides O(1) validation sets and synonym maps so teachers can type
//! the words they use day to day ("marked", "resubmit", "video").
//! Three-tier resolution: exact match → synonym lookup → error with
//! suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::{Cohort, ContentType, Department, IvStatus, SubmissionStatus};

// ── Valid value sets (O(1) lookups) ──────────────────────────

pub static VALID_SUBMISSION_STATUSES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    [
        "pending_mark",
        "graded",
        "resubmission_required",
        "verified",
        "in_progress",
        "late",
    ]
    .into_iter()
    .collect()
});

pub static VALID_COHORTS: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["foundation", "intermediate", "advanced"].into_iter().collect());

pub static VALID_CONTENT_TYPES: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["quiz", "lesson", "walkthrough"].into_iter().collect());

pub static VALID_DEPARTMENTS: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["engineering", "creative"].into_iter().collect());

pub static VALID_IV_STATUSES: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["pending", "approved", "action_required"].into_iter().collect());

// ── Synonym maps ─────────────────────────────────────────────

pub static SUBMISSION_STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("marked", "graded"),
        ("pass", "graded"),
        ("passed", "graded"),
        ("resubmit", "resubmission_required"),
        ("redo", "resubmission_required"),
        ("refer", "resubmission_required"),
        ("done", "verified"),
        ("signed_off", "verified"),
        ("pending", "pending_mark"),
        ("submitted", "pending_mark"),
        ("to_mark", "pending_mark"),
        ("wip", "in_progress"),
        ("draft", "in_progress"),
        ("overdue", "late"),
    ]
    .into_iter()
    .collect()
});

pub static COHORT_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("beginner", "foundation"),
        ("level1", "foundation"),
        ("intermediary", "intermediate"),
        ("level2", "intermediate"),
        ("expert", "advanced"),
        ("level3", "advanced"),
    ]
    .into_iter()
    .collect()
});

pub static CONTENT_TYPE_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("test", "quiz"),
        ("assessment", "quiz"),
        ("video", "lesson"),
        ("reading", "lesson"),
        ("tutorial", "walkthrough"),
        ("guide", "walkthrough"),
    ]
    .into_iter()
    .collect()
});

pub static DEPARTMENT_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("eng", "engineering"),
        ("tech", "engineering"),
        ("art", "creative"),
        ("design", "creative"),
        ("media", "creative"),
    ]
    .into_iter()
    .collect()
});

pub static IV_STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("approve", "approved"),
        ("ok", "approved"),
        ("action", "action_required"),
        ("reject", "action_required"),
        ("rejected", "action_required"),
    ]
    .into_iter()
    .collect()
});

/// Normalize against a value set and its synonyms.
///
/// Input is lowercased and `-`/space become `_`. Returns the canonical
/// value, or the original input with an optional suggestion.
pub fn normalize(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> std::result::Result<String, (String, Option<String>)> {
    let key = input.trim().to_lowercase().replace(['-', ' '], "_");

    // Tier 1: exact match
    if valid.contains(key.as_str()) {
        return Ok(key);
    }

    // Tier 2: synonym lookup
    if let Some(&canonical) = synonyms.get(key.as_str()) {
        return Ok(canonical.to_string());
    }

    // Tier 3: find closest suggestion
    let suggestion = find_closest_match(&key, valid, synonyms);
    Err((input.to_string(), suggestion))
}

fn with_suggestion(message: String, suggestion: Option<String>) -> String {
    match suggestion {
        Some(s) => format!("{message} (did you mean '{s}'?)"),
        None => message,
    }
}

/// Parse a submission status, accepting synonyms.
///
/// # Errors
///
/// Returns `Error::InvalidStatus` for unknown input.
pub fn parse_submission_status(input: &str) -> Result<SubmissionStatus> {
    normalize(input, &VALID_SUBMISSION_STATUSES, &SUBMISSION_STATUS_SYNONYMS)
        .map_err(|(raw, s)| {
            Error::InvalidStatus(with_suggestion(format!("Unknown submission status: {raw}"), s))
        })?
        .parse()
}

/// # Errors
///
/// Returns `Error::InvalidArgument` for unknown input.
pub fn parse_cohort(input: &str) -> Result<Cohort> {
    normalize(input, &VALID_COHORTS, &COHORT_SYNONYMS)
        .map_err(|(raw, s)| {
            Error::InvalidArgument(with_suggestion(format!("Unknown cohort: {raw}"), s))
        })?
        .parse()
}

/// # Errors
///
/// Returns `Error::InvalidArgument` for unknown input.
pub fn parse_content_type(input: &str) -> Result<ContentType> {
    normalize(input, &VALID_CONTENT_TYPES, &CONTENT_TYPE_SYNONYMS)
        .map_err(|(raw, s)| {
            Error::InvalidArgument(with_suggestion(format!("Unknown content type: {raw}"), s))
        })?
        .parse()
}

/// # Errors
///
/// Returns `Error::InvalidArgument` for unknown input.
pub fn parse_department(input: &str) -> Result<Department> {
    normalize(input, &VALID_DEPARTMENTS, &DEPARTMENT_SYNONYMS)
        .map_err(|(raw, s)| {
            Error::InvalidArgument(with_suggestion(format!("Unknown department: {raw}"), s))
        })?
        .parse()
}

/// # Errors
///
/// Returns `Error::InvalidStatus` for unknown input.
pub fn parse_iv_status(input: &str) -> Result<IvStatus> {
    normalize(input, &VALID_IV_STATUSES, &IV_STATUS_SYNONYMS)
        .map_err(|(raw, s)| {
            Error::InvalidStatus(with_suggestion(format!("Unknown IV status: {raw}"), s))
        })?
        .parse()
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // For synonyms, show what it maps to
            let shown = synonyms.get(v).copied().unwrap_or(v);
            best = Some((shown, dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Find existing ids similar to the searched one.
///
/// Returns up to `max` suggestions with edit distance ≤ 3, sorted by
/// distance then alphabetically.
#[must_use]
pub fn find_similar_ids<'a>(
    searched: &str,
    existing: impl IntoIterator<Item = &'a str>,
    max: usize,
) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = existing
        .into_iter()
        .map(|id| (levenshtein_distance(searched, id), id))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    candidates
        .into_iter()
        .take(max)
        .map(|(_, id)| id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_status_synonyms() {
        assert_eq!(parse_submission_status("graded").unwrap(), SubmissionStatus::Graded);
        assert_eq!(parse_submission_status("Marked").unwrap(), SubmissionStatus::Graded);
        assert_eq!(
            parse_submission_status("resubmit").unwrap(),
            SubmissionStatus::ResubmissionRequired
        );
        assert_eq!(
            parse_submission_status("pending-mark").unwrap(),
            SubmissionStatus::PendingMark
        );
        assert_eq!(parse_submission_status("done").unwrap(), SubmissionStatus::Verified);
    }

    #[test]
    fn test_unknown_status_suggests() {
        let err = parse_submission_status("verifed").unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(_)));
        assert!(err.to_string().contains("did you mean 'verified'"));
    }

    #[test]
    fn test_other_enums() {
        assert_eq!(parse_cohort("beginner").unwrap(), Cohort::Foundation);
        assert_eq!(parse_content_type("video").unwrap(), ContentType::Lesson);
        assert_eq!(parse_department("ENG").unwrap(), Department::Engineering);
        assert_eq!(parse_iv_status("reject").unwrap(), IvStatus::ActionRequired);
        assert!(parse_cohort("galaxy-brain").is_err());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_find_similar_ids() {
        let ids = ["stu_a1b2", "stu_a1b3", "stu_xxxx"];
        let result = find_similar_ids("stu_a1b1", ids, 3);
        assert_eq!(result, vec!["stu_a1b2".to_string(), "stu_a1b3".to_string()]);
    }
}
