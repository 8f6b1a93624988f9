//! In-memory [`Database`] for tests
//!
//! Only built for tests or with the `test-utils` feature.

use super::{Database, DatabaseError, Row, SqlValue};

/// In-memory database answering `SELECT <columns> FROM <table>;`
///
/// Executed statements are recorded, not interpreted.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Vec<MemoryTable>,
    executed: Vec<String>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryDatabase {
    /// Empty database
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its rows
    #[must_use]
    pub fn with_table(mut self, name: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        self.tables.push(MemoryTable {
            name: name.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
            rows,
        });
        self
    }

    /// Statements executed so far
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl Database for MemoryDatabase {
    fn execute(&mut self, statement: &str) -> Result<u64, DatabaseError> {
        self.executed.push(statement.to_string());
        Ok(1)
    }

    fn query(&mut self, statement: &str) -> Result<Vec<Row>, DatabaseError> {
        let failed = |message: &str| DatabaseError::Statement {
            statement: statement.to_string(),
            message: message.to_string(),
        };
        let body = statement
            .trim()
            .trim_end_matches(';')
            .strip_prefix("SELECT ")
            .ok_or_else(|| failed("only SELECT is supported"))?;
        let (columns, table) = body.split_once(" FROM ").ok_or_else(|| failed("missing FROM"))?;
        let table = self
            .tables
            .iter()
            .find(|t| t.name == table.trim())
            .ok_or_else(|| failed("no such table"))?;

        let indices = columns
            .split(',')
            .map(|c| {
                table
                    .columns
                    .iter()
                    .position(|name| name == c.trim())
                    .ok_or_else(|| failed("no such column"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(table
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_named_columns() {
        let mut db = MemoryDatabase::new().with_table(
            "t",
            &["id", "a", "b"],
            vec![vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Text("x".into())]],
        );
        assert_eq!(
            db.query("SELECT b, id FROM t;").unwrap(),
            vec![vec![SqlValue::Text("x".into()), SqlValue::Int(1)]]
        );
        assert!(db.query("SELECT c FROM t;").is_err());
        assert!(db.query("DELETE FROM t;").is_err());
    }
}
