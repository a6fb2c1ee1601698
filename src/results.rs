use std::sync::Arc;

use crate::values::Value;

/// A single row from a query result, with access to both the column names
/// and the values.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<Value>,
}

impl DbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    /// Get the index of a column by name, or None if not found.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name, or None if the column
    /// wasn't found.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index, or None if the index is
    /// out of bounds.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// A result set from a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<DbRow>,
}

impl ResultSet {
    /// Create a result set with preallocated row capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
        }
    }

    /// Build a result set from one set of column names and per-row values.
    #[must_use]
    pub fn from_rows(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> ResultSet {
        let names = Arc::new(column_names);
        ResultSet {
            results: rows
                .into_iter()
                .map(|values| DbRow::new(Arc::clone(&names), values))
                .collect(),
        }
    }

    pub fn add_row(&mut self, row: DbRow) {
        self.results.push(row);
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.results.len()
    }
}
