use crate::frame::{Column, HistoryFrame};
use crate::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

const INDEX_COLUMN: &str = "index";

/// SQLite-backed point history table.
///
/// The `history` table has a TEXT primary key `index` holding RFC 3339 UTC
/// timestamps (fixed microsecond precision, so text order is time order) and
/// one column per point.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    path: PathBuf,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::BadTimestamp(text.to_string()))
}

impl HistoryStore {
    /// Opens (creating if needed) the database at `path` and ensures the
    /// `history` table exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS history ({} TEXT PRIMARY KEY)",
            quote(INDEX_COLUMN)
        ))
        .execute(&pool)
        .await?;

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point columns with their declared SQL type.
    pub async fn columns(&self) -> Result<Vec<(String, String)>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info('history')")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter(|(name, _)| name != INDEX_COLUMN)
            .collect())
    }

    pub async fn last_index(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let last: Option<String> = sqlx::query_scalar(&format!(
            "SELECT MAX({}) FROM history",
            quote(INDEX_COLUMN)
        ))
        .fetch_one(&self.pool)
        .await?;
        last.as_deref().map(parse_ts).transpose()
    }

    /// Appends the rows of `frame` newer than the last stored row.
    ///
    /// Columns missing from the table are added; stored columns absent from
    /// the frame are reported and left in place. Returns the number of rows
    /// written. An empty frame writes nothing.
    pub async fn append(&self, frame: &HistoryFrame) -> Result<usize, StoreError> {
        if frame.is_empty() {
            log::debug!("{}: nothing to append", self.path.display());
            return Ok(0);
        }

        let existing = self.columns().await?;
        let known: HashSet<&str> = existing.iter().map(|(n, _)| n.as_str()).collect();
        for (name, _) in &existing {
            if frame.column(name).is_none() {
                log::warn!("{}: stored column {name} has no live point", self.path.display());
            }
        }

        let frame = match self.last_index().await? {
            Some(last) => frame.after(last),
            None => frame.clone(),
        };
        if frame.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for (name, column) in frame.columns() {
            if known.contains(name.as_str()) {
                continue;
            }
            let sql_type = if column.is_numeric() { "REAL" } else { "TEXT" };
            sqlx::query(&format!(
                "ALTER TABLE history ADD COLUMN {} {sql_type}",
                quote(name)
            ))
            .execute(&mut *tx)
            .await?;
        }

        let names: Vec<&String> = frame.columns().keys().collect();
        let placeholders = vec!["?"; names.len() + 1].join(", ");
        let column_list = std::iter::once(quote(INDEX_COLUMN))
            .chain(names.iter().map(|n| quote(n)))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!("INSERT OR REPLACE INTO history ({column_list}) VALUES ({placeholders})");

        for (row, ts) in frame.index().iter().enumerate() {
            let mut query = sqlx::query(&insert).bind(format_ts(ts));
            for column in frame.columns().values() {
                query = match column {
                    Column::Numeric(cells) => query.bind(cells[row]),
                    Column::Text(cells) => query.bind(cells[row].clone()),
                };
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        log::debug!("{}: appended {} rows", self.path.display(), frame.len());
        Ok(frame.len())
    }

    /// Reads the whole table back as a frame.
    pub async fn load(&self) -> Result<HistoryFrame, StoreError> {
        let columns = self.columns().await?;
        let rows = sqlx::query(&format!(
            "SELECT * FROM history ORDER BY {}",
            quote(INDEX_COLUMN)
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut index = Vec::with_capacity(rows.len());
        let mut data: BTreeMap<String, Column> = columns
            .iter()
            .map(|(name, sql_type)| {
                let column = if sql_type.eq_ignore_ascii_case("TEXT") {
                    Column::Text(Vec::with_capacity(rows.len()))
                } else {
                    Column::Numeric(Vec::with_capacity(rows.len()))
                };
                (name.clone(), column)
            })
            .collect();

        for row in &rows {
            let ts: String = row.try_get(INDEX_COLUMN)?;
            index.push(parse_ts(&ts)?);
            for (name, column) in data.iter_mut() {
                match column {
                    Column::Numeric(cells) => cells.push(row.try_get::<Option<f64>, _>(name.as_str())?),
                    Column::Text(cells) => cells.push(row.try_get::<Option<String>, _>(name.as_str())?),
                }
            }
        }

        Ok(HistoryFrame::new(index, data))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
