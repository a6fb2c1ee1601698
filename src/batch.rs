use crate::statement::Statement;

/// The two kinds of statement batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Schema statements, submitted as one admin request. Not atomic.
    Ddl,
    /// DML statements, submitted as one combined update request. Atomic
    /// when run outside a transaction.
    Dml,
}

/// An ordered, append-only buffer of statements pending a single combined
/// submission. Used both at the connection level and nested inside a
/// read-write transaction (DML only).
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub kind: BatchKind,
    pub statements: Vec<Statement>,
}

impl Batch {
    #[must_use]
    pub fn ddl() -> Self {
        Self {
            kind: BatchKind::Ddl,
            statements: Vec::new(),
        }
    }

    #[must_use]
    pub fn dml() -> Self {
        Self {
            kind: BatchKind::Dml,
            statements: Vec::new(),
        }
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }
}
