//! MySQL backend (also serves the `local` and `hosted` aliases)

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row};
use tracing::debug;

use super::{DatabaseConfig, Dialect, ResultSet, SqlBackend, SqlScript};
use crate::{Error, Result};

pub(crate) struct MySqlBackend;

#[async_trait]
impl SqlBackend for MySqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn execute(
        &self,
        script: &SqlScript,
        config: &DatabaseConfig,
        return_result: bool,
    ) -> Result<Option<ResultSet>> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database_name)
            .charset("utf8mb4");

        let mut conn = options
            .connect()
            .await
            .map_err(|e| Error::connection(Dialect::MySql, e))?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| Error::connection(Dialect::MySql, e))?;

        let mut last = None;
        for (index, statement) in script.statements().iter().enumerate() {
            debug!("mysql [{}]: {}", index, statement);
            // Text protocol, so every cell arrives as its textual form.
            let rows = (&mut *tx)
                .fetch_all(statement.as_str())
                .await
                .map_err(|e| Error::sql(Dialect::MySql, index, statement, e))?;
            if return_result {
                last = Some(to_result_set(&rows));
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::sql(Dialect::MySql, script.len(), "COMMIT", e))?;
        if let Err(e) = conn.close().await {
            debug!("mysql connection close failed: {}", e);
        }

        Ok(last)
    }
}

fn to_result_set(rows: &[MySqlRow]) -> ResultSet {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|index| cell(row, index)).collect())
        .collect();

    ResultSet { columns, rows }
}

fn cell(row: &MySqlRow, index: usize) -> Option<String> {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(value) => value,
        Err(_) => row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    }
}
