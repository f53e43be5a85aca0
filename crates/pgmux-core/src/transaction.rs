//! Transaction abstraction consumed by the scheduler.
//!
//! This module defines the unit of work the worker schedules:
//!
//! - [`Transaction`] - capability trait (size, status, clone, merge, split)
//! - [`Statement`] - a single statement inside a transaction
//! - [`QueryTransaction`] - a statement-list implementation
//! - [`TransactionId`] - scheduler-assigned identity
//!
//! The wire encoding of statements belongs to the connection driver; the
//! scheduler only looks at kinds, sizes and statuses.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity assigned to every transaction handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Monotonic [`TransactionId`] source owned by a worker.
#[derive(Debug, Default)]
pub struct TransactionIds {
    next: u64,
}

impl TransactionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next_id(&mut self) -> TransactionId {
        self.next += 1;
        TransactionId(self.next)
    }
}

/// How the statements of a transaction relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Independent autocommit statements
    Plain,
    /// Executions of server-side prepared statements
    Prepared,
    /// Statements chained inside one database transaction block
    Chained,
}

/// Execution status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Idle,
    Running,
    /// Cancel requested, waiting for the server to acknowledge
    Canceling,
    Done,
    Failed,
}

/// A single statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    /// Plain SQL text with positional parameters
    Simple { sql: String, params: Vec<Value> },
    /// Create a named server-side prepared statement
    Prepare {
        name: String,
        sql: String,
        param_types: Vec<String>,
    },
    /// Execute a named prepared statement
    Execute { name: String, params: Vec<Value> },
}

impl Statement {
    /// A parameterless SQL statement.
    pub fn sql(sql: impl Into<String>) -> Self {
        Statement::Simple {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A SQL statement with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Statement::Simple {
            sql: sql.into(),
            params,
        }
    }

    /// Short text for logs.
    pub fn text(&self) -> &str {
        match self {
            Statement::Simple { sql, .. } | Statement::Prepare { sql, .. } => sql,
            Statement::Execute { name, .. } => name,
        }
    }
}

/// A unit of work the scheduler can dispatch, batch and retry.
///
/// The driver advances [`cursor`](Transaction::cursor) as statements
/// complete and updates [`status`](Transaction::status); the scheduler
/// reads both when it has to time out or split a failed transaction.
pub trait Transaction: Send + fmt::Debug {
    fn kind(&self) -> TransactionKind;

    /// Number of statements.
    fn size(&self) -> usize;

    fn status(&self) -> TransactionStatus;

    fn set_status(&mut self, status: TransactionStatus);

    fn statements(&self) -> &[Statement];

    /// Index of the statement currently executing.
    fn cursor(&self) -> usize;

    /// Move to the next statement. Returns `false` once past the last one.
    fn advance(&mut self) -> bool;

    /// Statement at the cursor, if any.
    fn current_statement(&self) -> Option<&Statement> {
        self.statements().get(self.cursor())
    }

    /// Cooperative cancel: a running transaction becomes `Canceling`.
    fn cancel(&mut self) {
        if self.status() == TransactionStatus::Running {
            self.set_status(TransactionStatus::Canceling);
        }
    }

    /// Independent deep copy, rewound to `Idle` at the first statement.
    fn clone_box(&self) -> Box<dyn Transaction>;

    /// Append `other` if compatible. Returns `false` and leaves `self`
    /// untouched otherwise.
    fn merge(&mut self, other: &dyn Transaction) -> bool;

    /// Split a failed transaction at its cursor into the attempted piece
    /// and the untouched remainder (if any). Both pieces are fresh copies.
    fn split_at_current(&self) -> (Box<dyn Transaction>, Option<Box<dyn Transaction>>);

    /// Short text for logs.
    fn describe(&self) -> String {
        let statements = self.statements();
        match statements.first() {
            None => "<empty>".to_string(),
            Some(first) if statements.len() == 1 => first.text().to_string(),
            Some(first) => format!("{} (+{} more)", first.text(), statements.len() - 1),
        }
    }
}

impl Clone for Box<dyn Transaction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Statement-list transaction.
///
/// ```rust,ignore
/// let tx = QueryTransaction::chained()
///     .exec(Statement::sql("UPDATE accounts SET balance = balance - 10 WHERE id = 1"))
///     .exec(Statement::sql("UPDATE accounts SET balance = balance + 10 WHERE id = 2"));
/// worker.submit(Box::new(tx), "billing", "req-42");
/// ```
#[derive(Debug, Clone)]
pub struct QueryTransaction {
    kind: TransactionKind,
    statements: Vec<Statement>,
    cursor: usize,
    status: TransactionStatus,
}

impl QueryTransaction {
    pub fn new(kind: TransactionKind) -> Self {
        Self {
            kind,
            statements: Vec::new(),
            cursor: 0,
            status: TransactionStatus::Idle,
        }
    }

    /// Independent autocommit statements.
    pub fn plain() -> Self {
        Self::new(TransactionKind::Plain)
    }

    /// Statements inside one transaction block.
    pub fn chained() -> Self {
        Self::new(TransactionKind::Chained)
    }

    /// Prepared statement executions.
    pub fn prepared() -> Self {
        Self::new(TransactionKind::Prepared)
    }

    /// Append a statement.
    pub fn exec(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Append a statement in place.
    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    fn fresh(kind: TransactionKind, statements: Vec<Statement>) -> Box<dyn Transaction> {
        Box::new(Self {
            kind,
            statements,
            cursor: 0,
            status: TransactionStatus::Idle,
        })
    }
}

impl Transaction for QueryTransaction {
    fn kind(&self) -> TransactionKind {
        self.kind
    }

    fn size(&self) -> usize {
        self.statements.len()
    }

    fn status(&self) -> TransactionStatus {
        self.status
    }

    fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }

    fn statements(&self) -> &[Statement] {
        &self.statements
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn advance(&mut self) -> bool {
        if self.cursor < self.statements.len() {
            self.cursor += 1;
        }
        self.cursor < self.statements.len()
    }

    fn clone_box(&self) -> Box<dyn Transaction> {
        Self::fresh(self.kind, self.statements.clone())
    }

    fn merge(&mut self, other: &dyn Transaction) -> bool {
        // A transaction block cannot absorb another producer's statements.
        if self.kind == TransactionKind::Chained || other.kind() != self.kind {
            return false;
        }
        if self.status != TransactionStatus::Idle || other.status() != TransactionStatus::Idle {
            return false;
        }
        self.statements.extend_from_slice(other.statements());
        true
    }

    fn split_at_current(&self) -> (Box<dyn Transaction>, Option<Box<dyn Transaction>>) {
        if self.statements.is_empty() || self.kind == TransactionKind::Prepared {
            return (self.clone_box(), None);
        }
        let at = self.cursor.min(self.statements.len() - 1);
        // A failed block rolls back everything before the cursor as well.
        let start = match self.kind {
            TransactionKind::Chained => 0,
            _ => at,
        };
        let attempted = Self::fresh(self.kind, self.statements[start..=at].to_vec());
        let rest = &self.statements[at + 1..];
        if rest.is_empty() {
            (attempted, None)
        } else {
            (attempted, Some(Self::fresh(self.kind, rest.to_vec())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(n: usize) -> QueryTransaction {
        (0..n).fold(QueryTransaction::plain(), |tx, i| {
            tx.exec(Statement::sql(format!("INSERT INTO t VALUES ({i})")))
        })
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut ids = TransactionIds::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
        assert_eq!(a.to_string(), "tx#1");
    }

    #[test]
    fn test_clone_is_rewound() {
        let mut tx = plain(3);
        tx.set_status(TransactionStatus::Running);
        tx.advance();
        let copy = tx.clone_box();
        assert_eq!(copy.status(), TransactionStatus::Idle);
        assert_eq!(copy.cursor(), 0);
        assert_eq!(copy.size(), 3);
    }

    #[test]
    fn test_merge_compatible() {
        let mut acc = plain(1);
        assert!(acc.merge(&plain(2)));
        assert_eq!(acc.size(), 3);
    }

    #[test]
    fn test_merge_rejects_other_kind_and_chains() {
        let mut acc = plain(1);
        let chained = QueryTransaction::chained().exec(Statement::sql("SELECT 1"));
        assert!(!acc.merge(&chained));
        assert_eq!(acc.size(), 1);

        let mut block = QueryTransaction::chained().exec(Statement::sql("SELECT 1"));
        assert!(!block.merge(&chained));
    }

    #[test]
    fn test_merge_rejects_running() {
        let mut acc = plain(1);
        acc.set_status(TransactionStatus::Running);
        assert!(!acc.merge(&plain(1)));
    }

    #[test]
    fn test_cancel_only_marks_running() {
        let mut tx = plain(1);
        tx.cancel();
        assert_eq!(tx.status(), TransactionStatus::Idle);
        tx.set_status(TransactionStatus::Running);
        tx.cancel();
        assert_eq!(tx.status(), TransactionStatus::Canceling);
    }

    #[test]
    fn test_split_plain_at_cursor() {
        let mut tx = plain(4);
        tx.advance();
        let (attempted, rest) = tx.split_at_current();
        assert_eq!(attempted.size(), 1);
        assert_eq!(attempted.statements()[0].text(), "INSERT INTO t VALUES (1)");
        let rest = rest.expect("remaining statements");
        assert_eq!(rest.size(), 2);
        assert_eq!(rest.statements()[0].text(), "INSERT INTO t VALUES (2)");
    }

    #[test]
    fn test_split_chained_keeps_rolled_back_prefix() {
        let mut tx = QueryTransaction::chained()
            .exec(Statement::sql("A"))
            .exec(Statement::sql("B"))
            .exec(Statement::sql("C"));
        tx.advance();
        let (attempted, rest) = tx.split_at_current();
        assert_eq!(attempted.size(), 2);
        assert_eq!(attempted.kind(), TransactionKind::Chained);
        assert_eq!(rest.map(|r| r.size()), Some(1));
    }

    #[test]
    fn test_split_last_statement_has_no_rest() {
        let mut tx = plain(2);
        tx.advance();
        tx.advance();
        let (attempted, rest) = tx.split_at_current();
        assert_eq!(attempted.size(), 1);
        assert!(rest.is_none());
    }

    #[test]
    fn test_describe() {
        assert_eq!(plain(0).describe(), "<empty>");
        assert_eq!(plain(1).describe(), "INSERT INTO t VALUES (0)");
        assert_eq!(plain(3).describe(), "INSERT INTO t VALUES (0) (+2 more)");
    }
}
