//! Row predicates shared by every backend and by push subscriptions.

use serde_json::Value;

use super::Row;

/// Conjunction of column equality tests, with an optional ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
    order: Option<(String, bool)>,
}

impl Filter {
    /// A filter with no conditions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches every row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `column = value`.
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Order results by `column`.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    #[must_use]
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    #[must_use]
    pub fn order(&self) -> Option<(&str, bool)> {
        self.order.as_ref().map(|(c, asc)| (c.as_str(), *asc))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the conditions against a row held in memory.
    ///
    /// A missing column never matches.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, expected)| row.get(column).is_some_and(|v| values_match(v, expected)))
    }
}

/// Equality that tolerates the storage encodings of booleans and numbers.
///
/// SQLite hands booleans back as 0/1 and may return integral reals.
#[must_use]
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Bool(a), Value::Number(n)) | (Value::Number(n), Value::Bool(a)) => {
            n.as_i64() == Some(i64::from(*a))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_everything() {
        let row = json!({"id": "a"}).as_object().cloned().unwrap();
        assert!(Filter::all().matches(&row));
    }

    #[test]
    fn test_conditions_are_anded() {
        let row = json!({"student_id": "s1", "task_id": "t1"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(Filter::new().eq("student_id", "s1").eq("task_id", "t1").matches(&row));
        assert!(!Filter::new().eq("student_id", "s1").eq("task_id", "t2").matches(&row));
        assert!(!Filter::new().eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_bool_matches_sqlite_integer() {
        assert!(values_match(&json!(1), &json!(true)));
        assert!(values_match(&json!(false), &json!(0)));
        assert!(!values_match(&json!(1), &json!(false)));
        assert!(values_match(&json!(3.0), &json!(3)));
    }
}
