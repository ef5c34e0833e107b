use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Which endpoint table a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Server,
    Client,
}

impl EndpointKind {
    fn table(self) -> &'static str {
        match self {
            EndpointKind::Server => "server",
            EndpointKind::Client => "client",
        }
    }
}

/// A persisted endpoint entity, keyed uniquely by IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRow {
    pub id: i64,
    pub ip: IpAddr,
}

/// The entity API the pipeline consumes: atomic find-or-create on the
/// `server` and `client` tables. Rows are created on first sighting and
/// never deleted by the core.
pub trait EndpointStore: Send + Sync {
    fn find_or_create(&self, kind: EndpointKind, ip: IpAddr) -> Result<EndpointRow, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS server (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip TEXT NOT NULL UNIQUE,
    first_seen TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS client (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip TEXT NOT NULL UNIQUE,
    first_seen TEXT NOT NULL
);
";

/// SQLite-backed endpoint store.
///
/// A single connection behind a mutex: find-or-create volume is tiny (one
/// pair per DNS event, nearly always hitting the SELECT), so pooling would
/// buy nothing.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and apply the schema idempotently.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

impl EndpointStore for SqliteStore {
    fn find_or_create(&self, kind: EndpointKind, ip: IpAddr) -> Result<EndpointRow, StoreError> {
        let conn = self.conn.lock();
        let ip_text = ip.to_string();

        // INSERT OR IGNORE then SELECT; the connection mutex makes the pair
        // atomic with respect to concurrent callers on the same IP.
        conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} (ip, first_seen) VALUES (?1, ?2)",
            kind.table()
        ))?
        .execute(params![ip_text, Utc::now().to_rfc3339()])?;

        let id: i64 = conn
            .prepare_cached(&format!("SELECT id FROM {} WHERE ip = ?1", kind.table()))?
            .query_row(params![ip_text], |row| row.get(0))?;

        Ok(EndpointRow { id, ip })
    }
}

/// In-memory store with the same find-or-create semantics, used by tests.
#[derive(Default)]
pub struct MemoryStore {
    servers: Mutex<HashMap<IpAddr, i64>>,
    clients: Mutex<HashMap<IpAddr, i64>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            servers: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl EndpointStore for MemoryStore {
    fn find_or_create(&self, kind: EndpointKind, ip: IpAddr) -> Result<EndpointRow, StoreError> {
        let mut map = match kind {
            EndpointKind::Server => self.servers.lock(),
            EndpointKind::Client => self.clients.lock(),
        };
        let id = *map
            .entry(ip)
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(EndpointRow { id, ip })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_find_or_create_is_stable() {
        let store = MemoryStore::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let first = store.find_or_create(EndpointKind::Server, ip).unwrap();
        let second = store.find_or_create(EndpointKind::Server, ip).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_memory_store_tables_are_independent() {
        let store = MemoryStore::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let server = store.find_or_create(EndpointKind::Server, ip).unwrap();
        let client = store.find_or_create(EndpointKind::Client, ip).unwrap();
        assert_ne!(server.id, client.id);
    }
}
