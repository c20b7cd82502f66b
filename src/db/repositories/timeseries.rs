use chrono::{DateTime, Utc};
use rusqlite::{
    params, params_from_iter,
    types::{Null, ToSql, ToSqlOutput, ValueRef},
    Connection,
};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_timestamp, quote_ident, validate_ident},
    models::{Column, ColumnData, TIME_COLUMN},
};
use crate::error::{StationError, StationResult};
use crate::sensors::{DType, Reading, Value, MISSING};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Integer(v) => ToSqlOutput::from(*v),
            Value::Float(v) => ToSqlOutput::from(*v),
            Value::Timestamp(ts) => ToSqlOutput::from(format_timestamp(ts)),
            Value::Null => ToSqlOutput::from(Null),
        })
    }
}

fn table_columns(conn: &Connection, table: &str) -> StationResult<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        let (name, decl) = row?;
        let dtype = DType::from_sql_type(&decl).ok_or_else(|| {
            StationError::storage(format!(
                "column '{name}' of '{table}' has unsupported type '{decl}'"
            ))
        })?;
        columns.push(Column::new(name, dtype));
    }
    Ok(columns)
}

fn read_value(raw: ValueRef<'_>, column: &Column) -> StationResult<Value> {
    match (raw, column.dtype) {
        (ValueRef::Null, DType::Float) => Ok(Value::Float(MISSING)),
        (ValueRef::Null, _) => Ok(Value::Null),
        (ValueRef::Integer(v), DType::Float) => Ok(Value::Float(v as f64)),
        (ValueRef::Integer(v), _) => Ok(Value::Integer(v)),
        (ValueRef::Real(v), _) => Ok(Value::Float(v)),
        (ValueRef::Text(bytes), DType::Timestamp) => {
            let text = std::str::from_utf8(bytes).map_err(|err| {
                StationError::storage(format!("column '{}' is not UTF-8: {err}", column.name))
            })?;
            parse_timestamp(text, &column.name).map(Value::Timestamp)
        }
        (ValueRef::Text(_) | ValueRef::Blob(_), _) => Err(StationError::storage(format!(
            "column '{}' holds a value that is not {}",
            column.name, column.dtype
        ))),
    }
}

/// Schema with `time` first, rejecting names that cannot be spliced into SQL.
fn keyed_schema(table: &str, columns: &[Column]) -> StationResult<Vec<Column>> {
    validate_ident(table)?;

    let mut schema = vec![Column::time()];
    for column in columns {
        validate_ident(&column.name)?;
        if column.name == TIME_COLUMN {
            if column.dtype != DType::Timestamp {
                return Err(StationError::config(format!(
                    "'{TIME_COLUMN}' column of '{table}' must be a timestamp"
                )));
            }
            continue;
        }
        if schema.iter().any(|c| c.name == column.name) {
            return Err(StationError::config(format!(
                "column '{}' declared twice for '{table}'",
                column.name
            )));
        }
        schema.push(column.clone());
    }
    Ok(schema)
}

impl Database {
    /// Creates `table` unless it exists. An existing table must have exactly
    /// the requested schema.
    pub async fn ensure_table(&self, table: &str, columns: &[Column]) -> StationResult<()> {
        let schema = keyed_schema(table, columns)?;
        let table = table.to_string();

        self.execute(move |conn| {
            let existing = table_columns(conn, &table)?;
            if !existing.is_empty() {
                if existing != schema {
                    return Err(StationError::config(format!(
                        "table '{table}' exists with a different schema"
                    )));
                }
                return Ok(());
            }

            let definition = schema
                .iter()
                .map(|c| {
                    let not_null = if c.name == TIME_COLUMN { " NOT NULL" } else { "" };
                    format!("{} {}{not_null}", quote_ident(&c.name), c.dtype.sql_type())
                })
                .collect::<Vec<_>>()
                .join(", ");

            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_q} ({definition});
                 CREATE INDEX IF NOT EXISTS {index_q} ON {table_q} ({time_q});",
                table_q = quote_ident(&table),
                index_q = quote_ident(&format!("idx_{table}_time")),
                time_q = quote_ident(TIME_COLUMN),
            ))?;
            Ok(())
        })
        .await
    }

    pub async fn has_table(&self, table: &str) -> StationResult<bool> {
        let table = table.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn table_columns(&self, table: &str) -> StationResult<Vec<Column>> {
        validate_ident(table)?;
        let table = table.to_string();
        self.execute(move |conn| table_columns(conn, &table)).await
    }

    pub async fn insert_row(&self, table: &str, row: &Reading) -> StationResult<()> {
        if row.is_empty() {
            return Err(StationError::storage(format!("empty row for '{table}'")));
        }
        validate_ident(table).map_err(|_| StationError::storage(format!("no such table '{table}'")))?;
        for name in row.keys() {
            validate_ident(name)
                .map_err(|_| StationError::storage(format!("unknown column '{name}'")))?;
        }

        let table = table.to_string();
        let record = row.clone();
        self.execute(move |conn| {
            let names = record
                .keys()
                .map(|name| quote_ident(name))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=record.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");

            conn.execute(
                &format!(
                    "INSERT INTO {} ({names}) VALUES ({placeholders})",
                    quote_ident(&table)
                ),
                params_from_iter(record.values()),
            )?;
            Ok(())
        })
        .await
    }

    /// Rows of `table` with `time >= since`, oldest first, as one series per
    /// column. `time` is always part of the result; every selected column is
    /// present even when no rows match.
    pub async fn query_columns(
        &self,
        table: &str,
        columns: Option<Vec<String>>,
        since: Option<DateTime<Utc>>,
    ) -> StationResult<ColumnData> {
        validate_ident(table).map_err(|_| StationError::storage(format!("no such table '{table}'")))?;
        let table = table.to_string();

        self.execute(move |conn| {
            let schema = table_columns(conn, &table)?;
            if schema.is_empty() {
                return Err(StationError::storage(format!("no such table '{table}'")));
            }

            let selected = match columns {
                None => schema,
                Some(names) => {
                    let mut selected: Vec<Column> = Vec::new();
                    let wanted = std::iter::once(TIME_COLUMN.to_string()).chain(names);
                    for name in wanted {
                        if selected.iter().any(|c| c.name == name) {
                            continue;
                        }
                        let column = schema
                            .iter()
                            .find(|c| c.name == name)
                            .ok_or_else(|| {
                                StationError::storage(format!(
                                    "unknown column '{name}' in '{table}'"
                                ))
                            })?;
                        selected.push(column.clone());
                    }
                    selected
                }
            };

            let names = selected
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            let time_q = quote_ident(TIME_COLUMN);
            let filter = if since.is_some() {
                format!(" WHERE {time_q} >= ?1")
            } else {
                String::new()
            };
            let sql = format!(
                "SELECT {names} FROM {}{filter} ORDER BY {time_q} ASC",
                quote_ident(&table)
            );

            let since_param = since.map(|ts| format_timestamp(&ts));
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(since_param.iter()))?;

            let mut series: Vec<Vec<Value>> = vec![Vec::new(); selected.len()];
            while let Some(row) = rows.next()? {
                for (idx, column) in selected.iter().enumerate() {
                    series[idx].push(read_value(row.get_ref(idx)?, column)?);
                }
            }

            Ok(selected
                .into_iter()
                .map(|c| c.name)
                .zip(series)
                .collect::<ColumnData>())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::connection::DbLocation;
    use crate::error::ErrorKind;

    fn db() -> Database {
        Database::open(DbLocation::Memory).unwrap()
    }

    fn random_schema() -> Vec<Column> {
        vec![Column::new("random", DType::Float)]
    }

    fn row(time: DateTime<Utc>, random: f64) -> Reading {
        Reading::from([
            (TIME_COLUMN.to_string(), Value::Timestamp(time)),
            ("random".to_string(), Value::Float(random)),
        ])
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent() {
        let db = db();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        assert!(db.has_table("readings").await.unwrap());
        assert_eq!(
            db.table_columns("readings").await.unwrap(),
            vec![Column::time(), Column::new("random", DType::Float)]
        );
    }

    #[tokio::test]
    async fn conflicting_schema_is_configuration_error() {
        let db = db();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        let err = db
            .ensure_table("readings", &[Column::new("other", DType::Integer)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn bad_identifiers_never_reach_sql() {
        let db = db();
        let err = db
            .ensure_table("x; DROP TABLE y", &random_schema())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn insert_into_missing_table_fails() {
        let db = db();
        let err = db.insert_row("absent", &row(Utc::now(), 1.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn insert_unknown_column_fails() {
        let db = db();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        let mut bad = row(Utc::now(), 1.0);
        bad.insert("humidity".into(), Value::Float(50.0));
        let err = db.insert_row("readings", &bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn empty_table_returns_empty_series() {
        let db = db();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        let data = db.query_columns("readings", None, None).await.unwrap();
        assert_eq!(data.len(), 2);
        assert!(data[TIME_COLUMN].is_empty());
        assert!(data["random"].is_empty());
    }

    #[tokio::test]
    async fn since_filter_is_inclusive() {
        let db = db();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        db.insert_row("readings", &row(t0, 1.0)).await.unwrap();
        db.insert_row("readings", &row(t1, 2.0)).await.unwrap();

        let data = db.query_columns("readings", None, Some(t1)).await.unwrap();
        assert_eq!(data["random"], vec![Value::Float(2.0)]);
        assert_eq!(data[TIME_COLUMN], vec![Value::Timestamp(
            parse_timestamp(&format_timestamp(&t1), "time").unwrap()
        )]);

        let all = db.query_columns("readings", None, None).await.unwrap();
        assert_eq!(all["random"], vec![Value::Float(1.0), Value::Float(2.0)]);
    }

    #[tokio::test]
    async fn column_selection_always_includes_time() {
        let db = db();
        db.ensure_table("readings", &random_schema()).await.unwrap();
        db.insert_row("readings", &row(Utc::now(), 0.25)).await.unwrap();

        let data = db
            .query_columns("readings", Some(vec!["random".into()]), None)
            .await
            .unwrap();
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["random", TIME_COLUMN]);

        let err = db
            .query_columns("readings", Some(vec!["pressure".into()]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn missing_markers_survive_storage() {
        let db = db();
        db.ensure_table(
            "readings",
            &[
                Column::new("random", DType::Float),
                Column::new("count", DType::Integer),
            ],
        )
        .await
        .unwrap();

        let mut degraded = row(Utc::now(), MISSING);
        degraded.insert("count".into(), Value::Null);
        db.insert_row("readings", &degraded).await.unwrap();

        let data = db.query_columns("readings", None, None).await.unwrap();
        assert!(data["random"][0].is_missing());
        assert_eq!(data["count"][0], Value::Null);
    }

    #[tokio::test]
    async fn query_missing_table_fails() {
        let db = db();
        let err = db.query_columns("absent", None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
