//! SQLite cache for height-addressed RPC responses.
//!
//! A block, its transactions, the state after it and the supply at it never change
//! once the height is final, so responses are stored by (route, height, request hash)
//! and replayed on later runs. The latest-height query is never cached.

use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ResponseCache {
    conn: Mutex<Connection>,
}

impl ResponseCache {
    /// Open or create the cache database at `path`, creating parent dirs.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Cache that lives only as long as the process.
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                route TEXT NOT NULL,
                height INTEGER NOT NULL,
                request_sha256 TEXT NOT NULL,
                body BLOB NOT NULL,
                fetched_utc INTEGER NOT NULL,
                PRIMARY KEY (route, height, request_sha256)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Hash of the serialized request body, so paging parameters key separately.
    pub fn request_key(request: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(
        &self,
        route: &str,
        height: u64,
        request_key: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT body FROM responses WHERE route = ?1 AND height = ?2 AND request_sha256 = ?3",
        )?;
        let row = stmt
            .query_row(rusqlite::params![route, height as i64, request_key], |r| {
                r.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(row)
    }

    pub fn put(
        &self,
        route: &str,
        height: u64,
        request_key: &str,
        body: &[u8],
    ) -> Result<(), CacheError> {
        let fetched = time::OffsetDateTime::now_utc().unix_timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO responses (route, height, request_sha256, body, fetched_utc) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![route, height as i64, request_key, body, fetched],
        )?;
        Ok(())
    }

    /// Number of cached responses for a route.
    pub fn count(&self, route: &str) -> Result<u64, CacheError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE route = ?1",
            [route],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }
}
