//! SQL Server backend over ODBC
//!
//! Statements are sent as UTF-8 and text columns are decoded as UTF-8,
//! whichever character channel the driver manager uses.

use async_trait::async_trait;
use odbc_api::{ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tracing::debug;

use super::{DatabaseConfig, Dialect, ResultSet, SqlBackend, SqlScript};
use crate::{Error, Result};

/// ODBC driver name registered by the platform's driver manager
pub(crate) fn driver_name() -> &'static str {
    if cfg!(unix) {
        "ODBC Driver 17 for SQL Server"
    } else {
        "SQL Server"
    }
}

pub(crate) fn connection_string(config: &DatabaseConfig) -> String {
    format!(
        "DRIVER={{{}}};SERVER={},{};DATABASE={};UID={};PWD={};ClientCharset=UTF-8",
        driver_name(),
        config.host,
        config.port,
        config.database_name,
        config.user,
        config.password
    )
}

pub(crate) struct MsSqlBackend;

#[async_trait]
impl SqlBackend for MsSqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    async fn execute(
        &self,
        script: &SqlScript,
        config: &DatabaseConfig,
        return_result: bool,
    ) -> Result<Option<ResultSet>> {
        let statements = script.statements().to_vec();
        let connection_string = connection_string(config);

        tokio::task::spawn_blocking(move || run_batch(&connection_string, &statements, return_result))
            .await
            .map_err(|e| Error::Internal(format!("mssql worker failed: {}", e)))?
    }
}

fn run_batch(
    connection_string: &str,
    statements: &[String],
    return_result: bool,
) -> Result<Option<ResultSet>> {
    let env = Environment::new().map_err(|e| Error::connection(Dialect::MsSql, e))?;
    let conn = env
        .connect_with_connection_string(connection_string, ConnectionOptions::default())
        .map_err(|e| Error::connection(Dialect::MsSql, e))?;
    conn.set_autocommit(false)
        .map_err(|e| Error::connection(Dialect::MsSql, e))?;

    let mut last = None;
    for (index, statement) in statements.iter().enumerate() {
        debug!("mssql [{}]: {}", index, statement);
        let cursor = conn
            .execute(statement, ())
            .map_err(|e| Error::sql(Dialect::MsSql, index, statement, e))?;

        if return_result {
            let rows = match cursor {
                Some(mut cursor) => collect_rows(&mut cursor)
                    .map_err(|e| Error::sql(Dialect::MsSql, index, statement, e))?,
                None => ResultSet::default(),
            };
            last = Some(rows);
        }
    }

    conn.commit()
        .map_err(|e| Error::sql(Dialect::MsSql, statements.len(), "COMMIT", e))?;
    Ok(last)
}

fn collect_rows(cursor: &mut impl Cursor) -> std::result::Result<ResultSet, odbc_api::Error> {
    let columns = cursor
        .column_names()?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    let mut rows = Vec::new();
    let mut buf = Vec::new();
    while let Some(mut row) = cursor.next_row()? {
        let mut cells = Vec::with_capacity(columns.len());
        for index in 1..=columns.len() as u16 {
            buf.clear();
            let present = row.get_text(index, &mut buf)?;
            cells.push(present.then(|| String::from_utf8_lossy(&buf).into_owned()));
        }
        rows.push(cells);
    }

    Ok(ResultSet { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string() {
        let config = DatabaseConfig {
            dialect: Dialect::MsSql,
            host: "db".to_string(),
            port: 1433,
            user: "sa".to_string(),
            password: "pw".to_string(),
            database_name: "app".to_string(),
            identity_table: None,
        };
        let s = connection_string(&config);
        assert!(s.starts_with(&format!("DRIVER={{{}}};", driver_name())));
        assert!(s.contains("SERVER=db,1433;DATABASE=app;UID=sa;PWD=pw"));
    }
}
