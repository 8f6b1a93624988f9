//! Relational updater
//!
//! Rewrites identifiers stored in database tables. A [`SchemaMapping`] names
//! the columns to widen and the tables holding identifiers; [`RelationalUpdater::plan`]
//! reads the rows and produces SQL statements, which [`RelationalUpdater::apply`]
//! prints and, unless in dry-run, executes.

use std::io::Write;

use renum_ident::{Identifier, IdentifierMapper, IdentifierTable, MapCache, MapError};
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Single column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Text
    Text(String),
}

impl SqlValue {
    /// Value as an unsigned integer, if it is one
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::UInt(v) => Some(*v),
            Self::Text(s) => s.parse().ok(),
            Self::Null => None,
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Ordered column values of one result row
pub type Row = Vec<SqlValue>;

/// Errors from a database adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// Connecting failed
    #[error("cannot connect: {0}")]
    Connect(String),

    /// Statement failed
    #[error("statement failed: {statement}: {message}")]
    Statement {
        /// SQL text
        statement: String,
        /// Driver message
        message: String,
    },

    /// Result row has an unexpected shape
    #[error("cannot decode row of {table}: {message}")]
    Decode {
        /// Table being read
        table: String,
        /// What was wrong
        message: String,
    },

    /// Schema mapping name not known
    #[error("unknown schema mapping '{0}'")]
    UnknownSchema(String),
}

/// Adapter to a relational database
pub trait Database {
    /// Run a statement, returning the number of affected rows
    ///
    /// # Errors
    /// Returns error if the statement fails.
    fn execute(&mut self, statement: &str) -> Result<u64, DatabaseError>;

    /// Run a query, returning its rows
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn query(&mut self, statement: &str) -> Result<Vec<Row>, DatabaseError>;
}

/// Column type change applied before any update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeWidening {
    /// Table name
    pub table: String,
    /// Column name
    pub column: String,
    /// New SQL type
    pub sql_type: String,
}

/// Table holding full identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierColumns {
    /// Table name
    pub table: String,
    /// Primary key column
    pub key: String,
    /// Realm column
    pub realm: String,
    /// Member column
    pub member: String,
}

/// Table holding realm numbers only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmColumns {
    /// Table name
    pub table: String,
    /// Primary key column
    pub key: String,
    /// Realm column
    pub realm: String,
}

/// Which tables and columns of a target database carry identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    /// Column type changes
    #[serde(default)]
    pub widenings: Vec<TypeWidening>,
    /// Tables holding realm and member
    #[serde(default)]
    pub identifier_tables: Vec<IdentifierColumns>,
    /// Tables holding only a realm
    #[serde(default)]
    pub realm_tables: Vec<RealmColumns>,
}

impl SchemaMapping {
    /// Coordinator schema: `scion_lab_as` and `isd_location`
    #[must_use]
    pub fn coordinator() -> Self {
        let widen = |table: &str, column: &str, sql_type: &str| TypeWidening {
            table: table.into(),
            column: column.into(),
            sql_type: sql_type.into(),
        };
        Self {
            widenings: vec![
                widen("scion_lab_as", "isd", "SMALLINT UNSIGNED"),
                widen("scion_lab_as", "as_id", "BIGINT UNSIGNED"),
                widen("isd_location", "isd", "SMALLINT UNSIGNED"),
            ],
            identifier_tables: vec![IdentifierColumns {
                table: "scion_lab_as".into(),
                key: "id".into(),
                realm: "isd".into(),
                member: "as_id".into(),
            }],
            realm_tables: vec![RealmColumns {
                table: "isd_location".into(),
                key: "id".into(),
                realm: "isd".into(),
            }],
        }
    }

    /// Built-in mapping by name
    ///
    /// # Errors
    /// [`DatabaseError::UnknownSchema`] for names without a preset.
    pub fn preset(name: &str) -> Result<Self, DatabaseError> {
        match name {
            "coordinator" => Ok(Self::coordinator()),
            other => Err(DatabaseError::UnknownSchema(other.to_string())),
        }
    }
}

/// Plans and applies identifier updates for one schema mapping
#[derive(Debug)]
pub struct RelationalUpdater<'a> {
    mapper: &'a IdentifierMapper,
    mapping: SchemaMapping,
    cache: MapCache,
}

impl<'a> RelationalUpdater<'a> {
    /// Create updater
    #[must_use]
    pub fn new(mapper: &'a IdentifierMapper, mapping: SchemaMapping) -> Self {
        Self {
            mapper,
            mapping,
            cache: MapCache::new(),
        }
    }

    /// Read the rows and compute every statement
    ///
    /// Widenings come first, then one update per row. Rows whose
    /// identifier is not a valid legacy encoding are skipped and logged.
    /// Nothing is planned if two rows of a table would end up with the same
    /// new identifier.
    ///
    /// # Errors
    /// Database errors, undecodable rows and fatal mapping errors, including
    /// identifier collisions.
    pub fn plan(&mut self, db: &mut dyn Database) -> Result<Vec<String>, MigrationError> {
        let mut statements: Vec<String> = self
            .mapping
            .widenings
            .iter()
            .map(|w| format!("ALTER TABLE {} MODIFY {} {};", w.table, w.column, w.sql_type))
            .collect();

        for cols in &self.mapping.identifier_tables {
            let rows = db.query(&format!(
                "SELECT {}, {}, {} FROM {};",
                cols.key, cols.realm, cols.member, cols.table
            ))?;
            let mut mapped = IdentifierTable::new();
            for row in rows {
                let [key, realm, member] = row.as_slice() else {
                    return Err(decode_error(&cols.table, "expected 3 columns").into());
                };
                let old = Identifier::new(realm_of(&cols.table, realm)?, member_of(&cols.table, member)?);
                match self.cache.get_or_map(self.mapper, old) {
                    Ok(new) => {
                        mapped.insert(old, new)?;
                        tracing::info!(old = %old, new = %new.standard(), "identifier row");
                        statements.push(format!(
                            "UPDATE {} SET {} = {}, {} = {} WHERE {} = {};",
                            cols.table,
                            cols.realm,
                            new.realm(),
                            cols.member,
                            new.member(),
                            cols.key,
                            key
                        ));
                    }
                    Err(MapError::Fatal(fatal)) => return Err(fatal.into()),
                    Err(e) => tracing::error!(table = %cols.table, row = %key, "skipping row: {e}"),
                }
            }
        }

        for cols in &self.mapping.realm_tables {
            let rows = db.query(&format!("SELECT {}, {} FROM {};", cols.key, cols.realm, cols.table))?;
            for row in rows {
                let [key, realm] = row.as_slice() else {
                    return Err(decode_error(&cols.table, "expected 2 columns").into());
                };
                let new = self.mapper.map_realm(realm_of(&cols.table, realm)?)?;
                statements.push(format!(
                    "UPDATE {} SET {} = {} WHERE {} = {};",
                    cols.table, cols.realm, new, cols.key, key
                ));
            }
        }

        Ok(statements)
    }

    /// Print every statement and execute it unless `dry_run`
    ///
    /// Returns the number of statements executed.
    ///
    /// # Errors
    /// The first failing statement or output error.
    pub fn apply(
        db: &mut dyn Database,
        statements: &[String],
        dry_run: bool,
        out: &mut dyn Write,
    ) -> Result<usize, MigrationError> {
        let mut executed = 0;
        for statement in statements {
            writeln!(out, "{statement}")?;
            if !dry_run {
                db.execute(statement)?;
                executed += 1;
            }
        }
        Ok(executed)
    }

    /// Mapper cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> renum_ident::CacheStats {
        self.cache.stats()
    }
}

fn decode_error(table: &str, message: impl Into<String>) -> DatabaseError {
    DatabaseError::Decode {
        table: table.to_string(),
        message: message.into(),
    }
}

fn realm_of(table: &str, value: &SqlValue) -> Result<u16, DatabaseError> {
    value
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| decode_error(table, format!("realm {value} is not a 16-bit number")))
}

fn member_of(table: &str, value: &SqlValue) -> Result<u64, DatabaseError> {
    value
        .as_u64()
        .ok_or_else(|| decode_error(table, format!("member {value} is not a number")))
}

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

/// MySQL adapter
#[cfg(feature = "mysql")]
pub mod mysql {
    use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
    use sqlx::Row as _;
    use tokio::runtime::Runtime;

    use super::{Database, DatabaseError, Row, SqlValue};

    /// Blocking MySQL connection with a private current-thread runtime
    #[derive(Debug)]
    pub struct MySqlDatabase {
        runtime: Runtime,
        pool: MySqlPool,
    }

    impl MySqlDatabase {
        /// Connect to `url`
        ///
        /// # Errors
        /// [`DatabaseError::Connect`] if the runtime or connection fails.
        pub fn connect(url: &str) -> Result<Self, DatabaseError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| DatabaseError::Connect(e.to_string()))?;
            let pool = runtime
                .block_on(MySqlPoolOptions::new().max_connections(1).connect(url))
                .map_err(|e| DatabaseError::Connect(e.to_string()))?;
            Ok(Self { runtime, pool })
        }

        fn failed(statement: &str, error: &sqlx::Error) -> DatabaseError {
            DatabaseError::Statement {
                statement: statement.to_string(),
                message: error.to_string(),
            }
        }
    }

    fn decode(row: &MySqlRow, index: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v.map_or(SqlValue::Null, SqlValue::Int);
        }
        if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
            return v.map_or(SqlValue::Null, SqlValue::UInt);
        }
        match row.try_get::<Option<String>, _>(index) {
            Ok(Some(s)) => SqlValue::Text(s),
            _ => SqlValue::Null,
        }
    }

    impl Database for MySqlDatabase {
        fn execute(&mut self, statement: &str) -> Result<u64, DatabaseError> {
            self.runtime
                .block_on(sqlx::query(statement).execute(&self.pool))
                .map(|done| done.rows_affected())
                .map_err(|e| Self::failed(statement, &e))
        }

        fn query(&mut self, statement: &str) -> Result<Vec<Row>, DatabaseError> {
            let rows = self
                .runtime
                .block_on(sqlx::query(statement).fetch_all(&self.pool))
                .map_err(|e| Self::failed(statement, &e))?;
            Ok(rows
                .iter()
                .map(|row| (0..row.len()).map(|i| decode(row, i)).collect())
                .collect())
        }
    }
}
