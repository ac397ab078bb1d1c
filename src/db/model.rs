//! Items, write conditions and errors of the key-value tables.
//!
//! Conditions are compiled into SQL so that the check and the write happen in
//! one statement. Racing writers on the same key are therefore serialized by
//! SQLite itself.

use serde_json::{Map, Value};
use thiserror::Error;

/// A whole record as stored in a table.
pub type Item = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conditional check failed for {table}/{key}")]
    ConditionalCheckFailed { table: String, key: String },
    #[error("item has no string key attribute {0:?}")]
    MissingKey(String),
    #[error("record did not serialize to an object: {0}")]
    NotAnObject(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("item encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, StoreError::ConditionalCheckFailed { .. })
    }
}

/// Predicate over the currently stored item, evaluated atomically with a put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    AttributeNotExists(String),
    AttributeLessThan(String, i64),
    Or(Box<Condition>, Box<Condition>),
}

/// A value bound into a compiled condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SqlParam {
    Text(String),
    Int(i64),
}

impl Condition {
    pub fn not_exists(attr: &str) -> Self {
        Condition::AttributeNotExists(attr.to_string())
    }

    pub fn less_than(attr: &str, value: i64) -> Self {
        Condition::AttributeLessThan(attr.to_string(), value)
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Whether the condition is satisfied when no item is stored under the key.
    /// Comparisons against a missing attribute are false.
    pub fn holds_for_absent(&self) -> bool {
        match self {
            Condition::AttributeNotExists(_) => true,
            Condition::AttributeLessThan(_, _) => false,
            Condition::Or(a, b) => a.holds_for_absent() || b.holds_for_absent(),
        }
    }

    /// Render as a SQL boolean expression over `column` (a JSON text column).
    pub(crate) fn to_sql(&self, column: &str, params: &mut Vec<SqlParam>) -> String {
        match self {
            Condition::AttributeNotExists(attr) => {
                params.push(SqlParam::Text(json_path(attr)));
                format!("json_extract({column}, ?) IS NULL")
            }
            Condition::AttributeLessThan(attr, value) => {
                params.push(SqlParam::Text(json_path(attr)));
                params.push(SqlParam::Int(*value));
                format!("json_extract({column}, ?) < ?")
            }
            Condition::Or(a, b) => {
                let left = a.to_sql(column, params);
                let right = b.to_sql(column, params);
                format!("(({left}) OR ({right}))")
            }
        }
    }
}

fn json_path(attr: &str) -> String {
    format!("$.\"{}\"", attr.replace('"', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_item_semantics() {
        assert!(Condition::not_exists("url").holds_for_absent());
        assert!(!Condition::less_than("updated_at", 5).holds_for_absent());
        assert!(Condition::not_exists("url")
            .or(Condition::less_than("updated_at", 5))
            .holds_for_absent());
    }

    #[test]
    fn compiles_or_with_params_in_order() {
        let cond = Condition::not_exists("url").or(Condition::less_than("updated_at", 42));
        let mut params = Vec::new();
        let sql = cond.to_sql("kv_items.item", &mut params);
        assert_eq!(
            sql,
            "((json_extract(kv_items.item, ?) IS NULL) OR (json_extract(kv_items.item, ?) < ?))"
        );
        assert_eq!(
            params,
            vec![
                SqlParam::Text("$.\"url\"".into()),
                SqlParam::Text("$.\"updated_at\"".into()),
                SqlParam::Int(42),
            ]
        );
    }
}
