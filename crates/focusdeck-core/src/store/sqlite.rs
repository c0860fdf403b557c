//! SQLite-backed document store.
//!
//! rusqlite is synchronous, so all statements run on a dedicated worker
//! thread; async callers hand it a closure and await the reply over a
//! oneshot channel. One connection, one thread -- read-merge-write on a
//! key is therefore atomic without explicit transactions.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;
use tracing::{error, info};

use super::{merge_fields, Document, StateStore, StoreError};

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            let _ = self.sender.send(StoreCommand::Shutdown);
            if let Err(join_err) = handle.join() {
                error!("failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// Durable [`StateStore`] over a single-file SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and start the worker.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path: PathBuf = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focusdeck-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(StoreError::Unavailable(err.to_string())));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }

                let init = migrate(&conn)
                    .map_err(|err| StoreError::Unavailable(err.to_string()));
                if ready_tx.send(init).is_err() {
                    error!("store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }
            })
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| StoreError::Unavailable("store worker exited during startup".into()))??;

        info!("document store opened at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("store caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|_| StoreError::Unavailable("store worker is gone".into()))?;

        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store worker terminated unexpectedly".into()))?
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

fn read_document(conn: &Connection, key: &str) -> Result<Option<Document>, StoreError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM documents WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;

    match raw {
        Some(json) => {
            let doc = serde_json::from_str(&json)
                .map_err(|err| StoreError::Unavailable(format!("corrupt document: {err}")))?;
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

fn write_document(conn: &Connection, key: &str, doc: &Document) -> Result<(), StoreError> {
    let json = serde_json::to_string(doc)
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
    conn.execute(
        "INSERT INTO documents (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, json],
    )
    .map_err(|err| StoreError::Unavailable(err.to_string()))?;
    Ok(())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError> {
        let key = key.to_string();
        self.execute(move |conn| read_document(conn, &key)).await
    }

    async fn set(&self, key: &str, fields: Document, merge: bool) -> Result<(), StoreError> {
        let key = key.to_string();
        self.execute(move |conn| {
            let doc = match read_document(conn, &key)? {
                Some(mut existing) if merge => {
                    merge_fields(&mut existing, fields);
                    existing
                }
                _ => fields,
            };
            write_document(conn, &key, &doc)
        })
        .await
    }

    async fn update(&self, key: &str, partial: Document) -> Result<(), StoreError> {
        let key = key.to_string();
        self.execute(move |conn| match read_document(conn, &key)? {
            Some(mut existing) => {
                merge_fields(&mut existing, partial);
                write_document(conn, &key, &existing)
            }
            None => Err(StoreError::NotFound(key.clone())),
        })
        .await
    }
}
