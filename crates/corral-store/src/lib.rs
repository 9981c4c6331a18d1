pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::info;

use corral_types::error::ChatError;

/// Durable conversation store. All access is serialized through the
/// connection mutex, which also serializes appends to the same
/// conversation — the one write ordering the store must guarantee.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, ChatError> {
        let conn = Connection::open(path).map_err(store_err)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(store_err)?;

        migrations::run(&conn)?;

        info!("Conversation store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, ChatError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(store_err)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, ChatError> {
        self.conn
            .lock()
            .map_err(|_| ChatError::Store("connection lock poisoned".into()))
    }
}

pub(crate) fn store_err(e: rusqlite::Error) -> ChatError {
    ChatError::Store(e.to_string())
}
