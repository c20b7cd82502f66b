use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::error::{StationError, StationResult};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// Where the engine keeps its data, parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    Memory,
    File(PathBuf),
}

impl DbLocation {
    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://` URLs
    /// (`sqlite:////abs/path`, `sqlite:///relative/path`) and bare file paths.
    pub fn parse(url: &str) -> StationResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StationError::config("empty database connection string"));
        }

        let rest = if let Some(rest) = url.strip_prefix("sqlite:///") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if url.contains("://") {
            return Err(StationError::config(format!(
                "unsupported database engine in '{url}'"
            )));
        } else {
            url
        };

        match rest {
            "" | ":memory:" | ":memory" => Ok(DbLocation::Memory),
            path => Ok(DbLocation::File(PathBuf::from(path))),
        }
    }
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Commands queued before the last handle drops still run; the drop blocks
/// until the worker has drained them and closed the connection, so a final
/// insert reaches the file before the daemon exits.
impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// The single engine connection, owned by a dedicated thread.
///
/// Every statement runs on that thread in submission order, so callers on any
/// runtime thread share it without further locking.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn open(location: DbLocation) -> StationResult<Self> {
        if let DbLocation::File(path) = &location {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StationError::storage(format!(
                        "failed to create database directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<StationResult<()>>();
        let location_for_thread = location.clone();

        let worker = thread::Builder::new()
            .name("skylog-db".into())
            .spawn(move || {
                let opened = match &location_for_thread {
                    DbLocation::Memory => Connection::open_in_memory(),
                    DbLocation::File(path) => Connection::open(path),
                };
                let mut conn = match opened {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(StationError::storage(format!(
                            "failed to open SQLite database: {err}"
                        ))));
                        return;
                    }
                };

                if matches!(location_for_thread, DbLocation::File(_)) {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                if ready_tx.send(Ok(())).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .map_err(|err| {
                StationError::storage(format!("failed to spawn database worker thread: {err}"))
            })?;

        ready_rx.recv().map_err(|_| {
            StationError::storage("database worker exited before signaling readiness")
        })??;

        info!("Database opened at {:?}", location);

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> StationResult<T>
    where
        F: FnOnce(&mut Connection) -> StationResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender.send(command).map_err(|err| {
            StationError::storage(format!("failed to send command to DB thread: {err}"))
        })?;

        reply_rx
            .await
            .map_err(|_| StationError::storage("database thread terminated unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_connection_strings() {
        assert_eq!(DbLocation::parse("sqlite::memory:").unwrap(), DbLocation::Memory);
        assert_eq!(DbLocation::parse(":memory:").unwrap(), DbLocation::Memory);
        assert_eq!(DbLocation::parse("sqlite://").unwrap(), DbLocation::Memory);
        assert_eq!(
            DbLocation::parse("sqlite:////tmp/station.db").unwrap(),
            DbLocation::File(PathBuf::from("/tmp/station.db"))
        );
        assert_eq!(
            DbLocation::parse("sqlite:///station.db").unwrap(),
            DbLocation::File(PathBuf::from("station.db"))
        );
        assert_eq!(
            DbLocation::parse("/var/lib/station.db").unwrap(),
            DbLocation::File(PathBuf::from("/var/lib/station.db"))
        );
    }

    #[test]
    fn rejects_foreign_engines() {
        let err = DbLocation::parse("postgres://localhost/db").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(DbLocation::parse("  ").is_err());
    }

    #[tokio::test]
    async fn executes_on_worker_thread() {
        let db = Database::open(DbLocation::Memory).unwrap();
        let answer = db
            .execute(|conn| Ok(conn.query_row("SELECT 40 + 2", [], |row| row.get::<_, i64>(0))?))
            .await
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn sql_failures_surface_as_storage_errors() {
        let db = Database::open(DbLocation::Memory).unwrap();
        let err = db
            .execute(|conn| Ok(conn.execute("INSERT INTO nowhere VALUES (1)", [])?))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn file_databases_create_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("station.db");
        let db = Database::open(DbLocation::File(path.clone())).unwrap();
        db.execute(|conn| Ok(conn.execute_batch("CREATE TABLE t (x INTEGER)")?))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn dropping_last_handle_closes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.db");
        let db = Database::open(DbLocation::File(path.clone())).unwrap();
        let clone = db.clone();
        db.execute(|conn| {
            Ok(conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")?)
        })
        .await
        .unwrap();
        assert!(dir.path().join("station.db-wal").exists());

        drop(db);
        drop(clone);

        assert!(!dir.path().join("station.db-wal").exists());
        let conn = Connection::open(&path).unwrap();
        let x: i64 = conn.query_row("SELECT x FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(x, 7);
    }
}
