use crate::errors::{AppError, AppResult};
use crate::models::StoreKey;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tokio::sync::{broadcast, mpsc, oneshot};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const COMMAND_QUEUE_DEPTH: usize = 64;
const CHANGE_QUEUE_DEPTH: usize = 128;

// "Something changed" is the whole payload; subscribers re-read everything
// they display. The revision only exists for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotice {
    pub revision: u64,
}

#[derive(Debug)]
struct Database {
    conn: Connection,
}

impl Database {
    fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    fn read(&self, key: StoreKey) -> AppResult<Option<Value>> {
        let raw = self
            .conn
            .query_row(
                "SELECT value_json FROM collections WHERE key = ?1",
                [key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // One statement per key: replacing a single collection is atomic, a
    // multi-entry set is not atomic across keys.
    fn write_many(&self, entries: &[(StoreKey, Value)]) -> AppResult<()> {
        let now = Utc::now().to_rfc3339();
        for (key, value) in entries {
            self.conn.execute(
                "INSERT INTO collections (key, value_json, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
                params![key.as_str(), serde_json::to_string(value)?, now],
            )?;
        }
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        self.conn.execute("DELETE FROM collections", [])?;
        Ok(())
    }
}

enum StoreCommand {
    Get {
        keys: Vec<StoreKey>,
        reply: oneshot::Sender<AppResult<HashMap<StoreKey, Value>>>,
    },
    Set {
        entries: Vec<(StoreKey, Value)>,
        reply: oneshot::Sender<AppResult<()>>,
    },
    Clear {
        reply: oneshot::Sender<AppResult<()>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::Sender<StoreCommand>,
    changes: broadcast::Sender<ChangeNotice>,
}

impl StoreHandle {
    // Spawns the actor task that owns the connection; must run inside a
    // tokio runtime.
    pub fn open(path: &Path) -> AppResult<Self> {
        let database = Database::open(path)?;
        Ok(Self::spawn(database))
    }

    fn spawn(database: Database) -> Self {
        let (commands, mut receiver) = mpsc::channel::<StoreCommand>(COMMAND_QUEUE_DEPTH);
        let (changes, _) = broadcast::channel(CHANGE_QUEUE_DEPTH);
        let publisher = changes.clone();

        tokio::spawn(async move {
            let mut revision: u64 = 0;
            while let Some(command) = receiver.recv().await {
                match command {
                    StoreCommand::Get { keys, reply } => {
                        let _ = reply.send(read_keys(&database, &keys));
                    }
                    StoreCommand::Set { entries, reply } => {
                        let outcome = database.write_many(&entries);
                        let committed = outcome.is_ok();
                        let _ = reply.send(outcome);
                        if committed {
                            revision += 1;
                            let _ = publisher.send(ChangeNotice { revision });
                        }
                    }
                    StoreCommand::Clear { reply } => {
                        let outcome = database.clear();
                        let committed = outcome.is_ok();
                        let _ = reply.send(outcome);
                        if committed {
                            revision += 1;
                            let _ = publisher.send(ChangeNotice { revision });
                        }
                    }
                    StoreCommand::Shutdown => break,
                }
            }
            tracing::debug!("store actor stopped");
        });

        Self { commands, changes }
    }

    pub async fn get(&self, key: StoreKey) -> AppResult<Option<Value>> {
        let mut values = self.get_many(&[key]).await?;
        Ok(values.remove(&key))
    }

    pub async fn get_many(&self, keys: &[StoreKey]) -> AppResult<HashMap<StoreKey, Value>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(StoreCommand::Get {
                keys: keys.to_vec(),
                reply,
            })
            .await
            .map_err(|_| unavailable())?;
        response.await.map_err(|_| unavailable())?
    }

    pub async fn set(&self, key: StoreKey, value: Value) -> AppResult<()> {
        self.set_many(vec![(key, value)]).await
    }

    pub async fn set_many(&self, entries: Vec<(StoreKey, Value)>) -> AppResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(StoreCommand::Set { entries, reply })
            .await
            .map_err(|_| unavailable())?;
        response.await.map_err(|_| unavailable())?
    }

    pub async fn clear(&self) -> AppResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(StoreCommand::Clear { reply })
            .await
            .map_err(|_| unavailable())?;
        response.await.map_err(|_| unavailable())?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(StoreCommand::Shutdown).await;
    }
}

fn read_keys(database: &Database, keys: &[StoreKey]) -> AppResult<HashMap<StoreKey, Value>> {
    let mut found = HashMap::new();
    for key in keys {
        if let Some(value) = database.read(*key)? {
            found.insert(*key, value);
        }
    }
    Ok(found)
}

fn unavailable() -> AppError {
    AppError::StoreUnavailable(
        "the storage runtime is gone; reload this surface to reconnect".to_string(),
    )
}
