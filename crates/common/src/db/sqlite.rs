//! SQLite backend
//!
//! The database name is the path of the database file. Each batch opens its
//! own connection, so an in-memory database would not survive between
//! batches.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::debug;

use super::{DatabaseConfig, Dialect, ResultSet, SqlBackend, SqlScript};
use crate::{Error, Result};

pub(crate) struct SqliteBackend;

#[async_trait]
impl SqlBackend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(
        &self,
        script: &SqlScript,
        config: &DatabaseConfig,
        return_result: bool,
    ) -> Result<Option<ResultSet>> {
        let statements = script.statements().to_vec();
        let path = config.database_name.clone();

        tokio::task::spawn_blocking(move || run_batch(&path, &statements, return_result))
            .await
            .map_err(|e| Error::Internal(format!("sqlite worker failed: {}", e)))?
    }
}

fn run_batch(path: &str, statements: &[String], return_result: bool) -> Result<Option<ResultSet>> {
    let mut conn = Connection::open(path).map_err(|e| Error::connection(Dialect::Sqlite, e))?;
    let tx = conn
        .transaction()
        .map_err(|e| Error::connection(Dialect::Sqlite, e))?;

    let mut last = None;
    for (index, statement) in statements.iter().enumerate() {
        debug!("sqlite [{}]: {}", index, statement);
        let rows = run_statement(&tx, statement)
            .map_err(|e| Error::sql(Dialect::Sqlite, index, statement, e))?;
        if return_result {
            last = Some(rows);
        }
    }

    tx.commit()
        .map_err(|e| Error::sql(Dialect::Sqlite, statements.len(), "COMMIT", e))?;
    Ok(last)
}

fn run_statement(conn: &Connection, statement: &str) -> rusqlite::Result<ResultSet> {
    let mut stmt = conn.prepare(statement)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    if columns.is_empty() {
        stmt.execute([])?;
        return Ok(ResultSet::default());
    }

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut cells = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            cells.push(render(row.get_ref(index)?));
        }
        rows.push(cells);
    }

    Ok(ResultSet { columns, rows })
}

fn render(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}
