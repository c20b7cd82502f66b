//! Time-series store: one engine connection per process, opened on first use.

mod connection;
pub mod helpers;
pub mod models;
mod repositories;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use tokio::sync::OnceCell;

pub use connection::{Database, DbLocation};
pub use models::{Column, ColumnData, TIME_COLUMN};

use crate::error::{StationError, StationResult};
use crate::sensors::Reading;

/// Cloneable handle to the shared engine.
///
/// The connection string is parsed up front; the connection itself is opened
/// by whichever call needs it first and reused for the rest of the process.
#[derive(Clone)]
pub struct Store {
    location: DbLocation,
    db: Arc<OnceCell<Database>>,
}

impl Store {
    pub fn new(url: &str) -> StationResult<Self> {
        Ok(Self {
            location: DbLocation::parse(url)?,
            db: Arc::new(OnceCell::new()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            db: Arc::new(OnceCell::new()),
        }
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    pub fn is_connected(&self) -> bool {
        self.db.initialized()
    }

    async fn database(&self) -> StationResult<&Database> {
        self.db
            .get_or_try_init(|| async {
                let location = self.location.clone();
                info!("Opening time-series store at {:?}", location);
                tokio::task::spawn_blocking(move || Database::open(location))
                    .await
                    .map_err(|err| {
                        StationError::storage(format!("database open task failed: {err}"))
                    })?
            })
            .await
    }

    pub async fn ensure_table(&self, table: &str, columns: &[Column]) -> StationResult<()> {
        self.database().await?.ensure_table(table, columns).await
    }

    pub async fn has_table(&self, table: &str) -> StationResult<bool> {
        self.database().await?.has_table(table).await
    }

    pub async fn table_columns(&self, table: &str) -> StationResult<Vec<Column>> {
        self.database().await?.table_columns(table).await
    }

    pub async fn insert(&self, table: &str, row: &Reading) -> StationResult<()> {
        self.database().await?.insert_row(table, row).await
    }

    /// See [`Database::query_columns`]. `columns: None` selects every column.
    pub async fn query(
        &self,
        table: &str,
        columns: Option<&[&str]>,
        since: Option<DateTime<Utc>>,
    ) -> StationResult<ColumnData> {
        let columns = columns.map(|names| names.iter().map(|n| n.to_string()).collect());
        self.database()
            .await?
            .query_columns(table, columns, since)
            .await
    }
}
