use std::net::IpAddr;
use std::sync::Arc;

use hugin::endpoint::{EndpointResolver, EndpointRoles};
use hugin::store::{EndpointKind, EndpointRow, EndpointStore, SqliteStore, StoreError};

#[test]
fn test_sqlite_find_or_create_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("hugin.db")).unwrap();

    let ip: IpAddr = "10.0.0.1".parse().unwrap();
    let first = store.find_or_create(EndpointKind::Server, ip).unwrap();
    let second = store.find_or_create(EndpointKind::Server, ip).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.ip, ip);
}

#[test]
fn test_sqlite_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hugin.db");

    let ip: IpAddr = "192.0.2.7".parse().unwrap();
    let original = {
        let store = SqliteStore::open(&path).unwrap();
        store.find_or_create(EndpointKind::Client, ip).unwrap()
    };

    let store = SqliteStore::open(&path).unwrap();
    let reloaded = store.find_or_create(EndpointKind::Client, ip).unwrap();
    assert_eq!(original.id, reloaded.id);
}

#[test]
fn test_sqlite_server_and_client_tables_are_distinct() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ip: IpAddr = "10.0.0.1".parse().unwrap();

    store.find_or_create(EndpointKind::Server, ip).unwrap();
    let other: IpAddr = "10.0.0.2".parse().unwrap();
    let second_server = store.find_or_create(EndpointKind::Server, other).unwrap();
    // the client table has its own id sequence
    let first_client = store.find_or_create(EndpointKind::Client, other).unwrap();

    assert_eq!(second_server.id, 2);
    assert_eq!(first_client.id, 1);
}

#[test]
fn test_sqlite_ipv6_keys() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ip: IpAddr = "2001:db8::53".parse().unwrap();
    let row = store.find_or_create(EndpointKind::Server, ip).unwrap();
    assert_eq!(row.ip, ip);
    let again = store.find_or_create(EndpointKind::Server, ip).unwrap();
    assert_eq!(row.id, again.id);
}

#[test]
fn test_sqlite_concurrent_find_or_create_single_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("hugin.db")).unwrap());
    let ip: IpAddr = "10.9.9.9".parse().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || store.find_or_create(EndpointKind::Server, ip).unwrap().id)
        })
        .collect();

    let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
}

/// Fails a configurable number of times before succeeding.
struct FlakyStore {
    failures_left: parking_lot::Mutex<u32>,
    calls: parking_lot::Mutex<u32>,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        FlakyStore {
            failures_left: parking_lot::Mutex::new(failures),
            calls: parking_lot::Mutex::new(0),
        }
    }
}

impl EndpointStore for FlakyStore {
    fn find_or_create(&self, _kind: EndpointKind, ip: IpAddr) -> Result<EndpointRow, StoreError> {
        *self.calls.lock() += 1;
        let mut failures = self.failures_left.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(EndpointRow { id: 1, ip })
    }
}

fn roles() -> EndpointRoles {
    EndpointRoles {
        server_ip: "10.0.0.1".parse().unwrap(),
        server_port: 53,
        client_ip: "10.0.0.5".parse().unwrap(),
        client_port: 54321,
    }
}

#[test]
fn test_resolver_retries_once_on_store_failure() {
    let store = Arc::new(FlakyStore::new(1));
    let resolver = EndpointResolver::new(store.clone());
    assert!(resolver.resolve(&roles()).is_ok());
    // one failed call, one retry, one clean call for the second role
    assert_eq!(*store.calls.lock(), 3);
}

#[test]
fn test_resolver_gives_up_after_second_failure() {
    let store = Arc::new(FlakyStore::new(2));
    let resolver = EndpointResolver::new(store.clone());
    assert!(resolver.resolve(&roles()).is_err());
    assert_eq!(*store.calls.lock(), 2);
}
