//! SQL execution harness
//!
//! Runs ordered batches of literal SQL against one of several dialect
//! backends. Every backend follows the same contract:
//!
//! - one connection and one transaction per batch
//! - statements run strictly in order
//! - the first failing statement aborts the batch and nothing is committed
//! - a single commit after the last statement
//! - the result set of the last statement is returned only when
//!   `return_result` is set
//!
//! Backends are compiled in by cargo feature (`mysql`, `mssql`, `sqlite`).

mod fixture;
#[cfg(feature = "mssql")]
mod mssql;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use fixture::{DatabaseFixture, FixtureState};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::DatabaseSection;
use crate::{Error, Result};

/// Table that needs explicit identity values when an mssql dump is replayed
pub const DEFAULT_IDENTITY_TABLE: &str = "audit_log";

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// MySQL protocol (`mysql`, `local`, `hosted`)
    MySql,
    /// SQL Server over ODBC (`mssql`, `sqlserver`)
    MsSql,
    /// Embedded SQLite file
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::MsSql => "mssql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Cargo feature that links this dialect's backend
    pub fn feature(&self) -> &'static str {
        self.as_str()
    }

    /// Port used when the configuration does not name one
    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::MySql => 3306,
            Dialect::MsSql => 1433,
            Dialect::Sqlite => 0,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "local" | "hosted" => Ok(Dialect::MySql),
            "mssql" | "sqlserver" => Ok(Dialect::MsSql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(Error::UnsupportedDialect(other.to_string())),
        }
    }
}

/// Connection settings for one database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name, or the file path for sqlite
    pub database_name: String,
    /// Table receiving explicit identity values during mssql dump replay
    pub identity_table: Option<String>,
}

impl DatabaseConfig {
    /// Resolve the dialect and defaults of a configuration section
    pub fn from_section(section: &DatabaseSection) -> Result<Self> {
        let dialect: Dialect = section.dbtype.parse()?;
        if section.name.trim().is_empty() {
            return Err(Error::Config("database.name must not be empty".to_string()));
        }
        Ok(Self {
            dialect,
            host: section.host.clone(),
            port: section.port.unwrap_or_else(|| dialect.default_port()),
            user: section.user.clone(),
            password: section.password.clone(),
            database_name: section.name.clone(),
            identity_table: section.identity_table.clone(),
        })
    }

    /// Configuration for a sqlite database file
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            dialect: Dialect::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database_name: path.as_ref().to_string_lossy().into_owned(),
            identity_table: None,
        }
    }
}

/// An ordered batch of literal SQL statements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlScript {
    statements: Vec<String>,
}

impl SqlScript {
    pub fn new<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    /// One statement per non-blank line
    pub fn from_lines(content: &str) -> Self {
        Self::new(
            content
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty()),
        )
    }

    /// Read a script file, one statement per line
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_lines(&content))
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Splice a statement in at `index`
    pub fn insert(&mut self, index: usize, statement: impl Into<String>) {
        let index = index.min(self.statements.len());
        self.statements.insert(index, statement.into());
    }
}

/// Rows returned by a statement, rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if it is not NULL
    pub fn first_value(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

/// A dialect backend
#[async_trait]
pub trait SqlBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run the whole script in one transaction
    async fn execute(
        &self,
        script: &SqlScript,
        config: &DatabaseConfig,
        return_result: bool,
    ) -> Result<Option<ResultSet>>;
}

/// Select the backend for a dialect
pub fn backend_for(dialect: Dialect) -> Result<Box<dyn SqlBackend>> {
    match dialect {
        #[cfg(feature = "mysql")]
        Dialect::MySql => Ok(Box::new(mysql::MySqlBackend)),
        #[cfg(feature = "mssql")]
        Dialect::MsSql => Ok(Box::new(mssql::MsSqlBackend)),
        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => Ok(Box::new(sqlite::SqliteBackend)),
        #[allow(unreachable_patterns)]
        other => Err(Error::DialectUnavailable {
            dialect: other,
            feature: other.feature(),
        }),
    }
}

/// Execute `script` against the database described by `config`
pub async fn execute(
    script: &SqlScript,
    config: &DatabaseConfig,
    return_result: bool,
) -> Result<Option<ResultSet>> {
    if script.is_empty() {
        debug!("Empty SQL script, nothing to execute");
        return Ok(return_result.then(ResultSet::default));
    }

    let backend = backend_for(config.dialect)?;
    info!(
        "Executing {} SQL statement(s) on {} database {}",
        script.len(),
        config.dialect,
        config.database_name
    );
    backend.execute(script, config, return_result).await
}

/// Dialect-specific rewriting of a dump before replay.
///
/// SQL Server refuses explicit values for identity columns unless
/// `IDENTITY_INSERT` is on, so the directive becomes the second statement.
pub fn prepare_dump(dialect: Dialect, mut script: SqlScript, identity_table: Option<&str>) -> SqlScript {
    if dialect == Dialect::MsSql && !script.is_empty() {
        let table = identity_table.unwrap_or(DEFAULT_IDENTITY_TABLE);
        script.insert(1, format!("SET IDENTITY_INSERT {} ON", table));
    }
    script
}

/// Replay a dump file, one statement per line
pub async fn replay_dump(path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<()> {
    let path = path.as_ref();
    let script = SqlScript::read(path)?;
    let script = prepare_dump(config.dialect, script, config.identity_table.as_deref());
    info!("Replaying dump {} ({} statements)", path.display(), script.len());
    execute(&script, config, false).await?;
    Ok(())
}

/// Quote a string as a SQL literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Value of a row in the `settings` table
pub async fn get_setting_value(config: &DatabaseConfig, name: &str) -> Result<Option<String>> {
    let script = SqlScript::new([format!(
        "SELECT value FROM settings WHERE name = {}",
        quote_literal(name)
    )]);
    let result = execute(&script, config, true).await?;
    Ok(result.and_then(|rows| rows.first_value().map(String::from)))
}

/// Insert or replace a row in the `settings` table
pub async fn set_setting_value(config: &DatabaseConfig, name: &str, value: &str) -> Result<()> {
    let script = SqlScript::new([
        format!("DELETE FROM settings WHERE name = {}", quote_literal(name)),
        format!(
            "INSERT INTO settings (name, value) VALUES ({}, {})",
            quote_literal(name),
            quote_literal(value)
        ),
    ]);
    execute(&script, config, false).await?;
    Ok(())
}

/// Delete a row from the `settings` table
pub async fn remove_setting(config: &DatabaseConfig, name: &str) -> Result<()> {
    let script = SqlScript::new([format!(
        "DELETE FROM settings WHERE name = {}",
        quote_literal(name)
    )]);
    execute(&script, config, false).await?;
    Ok(())
}
