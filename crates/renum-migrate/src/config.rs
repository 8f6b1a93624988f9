//! Run configuration
//!
//! Loaded from TOML; every section is optional.
//!
//! ```toml
//! dry_run = true
//!
//! [plan]
//! default_realm_offset = 16
//!
//! [database]
//! schema = "coordinator"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use renum_ident::NumberingPlan;
use serde::{Deserialize, Serialize};

use crate::relational::{DatabaseError, SchemaMapping};

/// Errors while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database section names an unknown preset
    #[error(transparent)]
    Schema(#[from] DatabaseError),
}

/// Database section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Preset mapping name
    pub schema: String,
    /// Explicit mapping, overrides `schema`
    pub mapping: Option<SchemaMapping>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            schema: "coordinator".into(),
            mapping: None,
        }
    }
}

/// Migration run configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Numbering plan constants
    pub plan: NumberingPlan,
    /// Compute and print without writing
    pub dry_run: bool,
    /// Relational target
    pub database: DatabaseConfig,
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// IO or TOML errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns error on invalid TOML or unknown fields.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// With numbering plan
    #[inline]
    #[must_use]
    pub fn with_plan(mut self, plan: NumberingPlan) -> Self {
        self.plan = plan;
        self
    }

    /// With dry-run default
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// With database preset
    #[inline]
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.database.schema = schema.into();
        self.database.mapping = None;
        self
    }

    /// Schema mapping for the database target
    ///
    /// # Errors
    /// Returns error if the preset name is unknown.
    pub fn schema_mapping(&self) -> Result<SchemaMapping, ConfigError> {
        match &self.database.mapping {
            Some(mapping) => Ok(mapping.clone()),
            None => Ok(SchemaMapping::preset(&self.database.schema)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config = MigrationConfig::from_toml("").unwrap();
        assert_eq!(config, MigrationConfig::default());
        assert_eq!(config.schema_mapping().unwrap(), SchemaMapping::coordinator());
    }

    #[test]
    fn partial_plan_override() {
        let config = MigrationConfig::from_toml("dry_run = true\n[plan]\ndefault_realm_offset = 32\n").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.plan.default_realm_offset, 32);
        assert_eq!(config.plan.special_realm, NumberingPlan::default().special_realm);
    }

    #[test]
    fn explicit_mapping() {
        let text = r#"
            [[database.mapping.realm_tables]]
            table = "site"
            key = "id"
            realm = "isd"
        "#;
        let config = MigrationConfig::from_toml(text).unwrap();
        let mapping = config.schema_mapping().unwrap();
        assert!(mapping.widenings.is_empty());
        assert_eq!(mapping.realm_tables[0].table, "site");
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(matches!(
            MigrationConfig::from_toml("dryrun = true"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn builder() {
        let config = MigrationConfig::new().with_dry_run(true).with_schema("web");
        assert!(config.dry_run);
        assert!(matches!(config.schema_mapping(), Err(ConfigError::Schema(_))));
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MigrationConfig::load(&dir.path().join("renum.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
