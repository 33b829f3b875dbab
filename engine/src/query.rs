//! Query descriptors attached to bindings.
//!
//! A query narrows and orders the children of a remote location. Descriptors
//! are plain data: they are rebuilt on every resolver pass and compared
//! structurally, so two descriptors with the same clauses in the same order
//! always describe the same remote listener.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single ordering, filtering or limiting clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause", content = "arg", rename_all = "camelCase")]
pub enum QueryClause {
    /// Order children by the value of a nested child field
    OrderByChild(String),
    /// Order children by key (the remote default)
    OrderByKey,
    /// Order children by their own value
    OrderByValue,
    /// Order children by priority
    OrderByPriority,
    /// Keep children whose ordering value is >= the argument
    StartAt(Value),
    /// Keep children whose ordering value is <= the argument
    EndAt(Value),
    /// Keep children whose ordering value equals the argument
    EqualTo(Value),
    /// Keep the first N children after ordering
    LimitToFirst(u32),
    /// Keep the last N children after ordering
    LimitToLast(u32),
}

/// How children are ordered once all clauses are folded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    Key,
    Child(String),
    Value,
    Priority,
}

/// An ordered list of query clauses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryDescriptor {
    clauses: Vec<QueryClause>,
}

impl QueryDescriptor {
    /// Create an empty descriptor (no ordering, no filters).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause, builder style.
    pub fn with(mut self, clause: QueryClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn order_by_child(self, child: impl Into<String>) -> Self {
        self.with(QueryClause::OrderByChild(child.into()))
    }

    pub fn order_by_key(self) -> Self {
        self.with(QueryClause::OrderByKey)
    }

    pub fn order_by_value(self) -> Self {
        self.with(QueryClause::OrderByValue)
    }

    pub fn start_at(self, value: impl Into<Value>) -> Self {
        self.with(QueryClause::StartAt(value.into()))
    }

    pub fn end_at(self, value: impl Into<Value>) -> Self {
        self.with(QueryClause::EndAt(value.into()))
    }

    pub fn equal_to(self, value: impl Into<Value>) -> Self {
        self.with(QueryClause::EqualTo(value.into()))
    }

    pub fn limit_to_first(self, limit: u32) -> Self {
        self.with(QueryClause::LimitToFirst(limit))
    }

    pub fn limit_to_last(self, limit: u32) -> Self {
        self.with(QueryClause::LimitToLast(limit))
    }

    /// All clauses in declaration order.
    pub fn clauses(&self) -> &[QueryClause] {
        &self.clauses
    }

    /// Check if the descriptor has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The effective ordering. The last ordering clause wins.
    pub fn order_by(&self) -> OrderBy {
        self.clauses
            .iter()
            .rev()
            .find_map(|clause| match clause {
                QueryClause::OrderByChild(child) => Some(OrderBy::Child(child.clone())),
                QueryClause::OrderByKey => Some(OrderBy::Key),
                QueryClause::OrderByValue => Some(OrderBy::Value),
                QueryClause::OrderByPriority => Some(OrderBy::Priority),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Lower bound, if any. `EqualTo` acts as both bounds.
    pub fn start(&self) -> Option<&Value> {
        self.clauses.iter().rev().find_map(|clause| match clause {
            QueryClause::StartAt(v) | QueryClause::EqualTo(v) => Some(v),
            _ => None,
        })
    }

    /// Upper bound, if any. `EqualTo` acts as both bounds.
    pub fn end(&self) -> Option<&Value> {
        self.clauses.iter().rev().find_map(|clause| match clause {
            QueryClause::EndAt(v) | QueryClause::EqualTo(v) => Some(v),
            _ => None,
        })
    }

    /// The effective limit as `(count, from_end)`.
    pub fn limit(&self) -> Option<(usize, bool)> {
        self.clauses.iter().rev().find_map(|clause| match clause {
            QueryClause::LimitToFirst(n) => Some((*n as usize, false)),
            QueryClause::LimitToLast(n) => Some((*n as usize, true)),
            _ => None,
        })
    }
}

impl From<Vec<QueryClause>> for QueryDescriptor {
    fn from(clauses: Vec<QueryClause>) -> Self {
        Self { clauses }
    }
}
