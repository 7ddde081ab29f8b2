//! Write-once object stores for recorded decisions.
//!
//! Every backend offers the same two operations: `get` and a create-only
//! `put_if_absent`. When two writers race on one key exactly one of them sees
//! [`PutOutcome::Created`]; the other gets [`PutOutcome::Exists`] and must read
//! the winner back.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed for {key}: {message}")]
    Io { key: String, message: String },
    #[error("sqlite store failed: {0}")]
    Sqlite(String),
    #[error("store config invalid: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Exists,
}

/// `<prefix>/<promptVersion>/<requestId>.json` with both ids url-encoded.
pub fn object_key(prefix: &str, prompt_version: &str, request_id: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let pv: String = url::form_urlencoded::byte_serialize(prompt_version.as_bytes()).collect();
    let rid: String = url::form_urlencoded::byte_serialize(request_id.as_bytes()).collect();
    format!("{prefix}/{pv}/{rid}.json")
}

pub enum ObjectStore {
    Memory(MemoryObjects),
    Filesystem(FsObjects),
    Sqlite(SqliteObjects),
}

impl ObjectStore {
    /// Builds the configured backend; `type: none` yields `None`.
    pub fn from_config(store: &steward_config::Store) -> Result<Option<Self>, StoreError> {
        let path = || {
            store.path.clone().ok_or_else(|| {
                StoreError::Config(format!("store.path is required for {}", store.kind))
            })
        };
        match store.kind.as_str() {
            "none" => Ok(None),
            "memory" => Ok(Some(Self::Memory(MemoryObjects::default()))),
            "filesystem" => Ok(Some(Self::Filesystem(FsObjects::new(path()?)))),
            "sqlite" => Ok(Some(Self::Sqlite(SqliteObjects::new(&path()?)?))),
            other => Err(StoreError::Config(format!("unsupported store.type={other}"))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Filesystem(_) => "filesystem",
            Self::Sqlite(_) => "sqlite",
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Self::Memory(s) => Ok(s.objects.get(key).cloned()),
            Self::Filesystem(s) => s.get(key),
            Self::Sqlite(s) => s.get(key),
        }
    }

    pub fn put_if_absent(&mut self, key: &str, body: &[u8]) -> Result<PutOutcome, StoreError> {
        match self {
            Self::Memory(s) => {
                if s.objects.contains_key(key) {
                    return Ok(PutOutcome::Exists);
                }
                s.objects.insert(key.to_string(), body.to_vec());
                Ok(PutOutcome::Created)
            }
            Self::Filesystem(s) => s.put_if_absent(key, body),
            Self::Sqlite(s) => s.put_if_absent(key, body),
        }
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    objects: HashMap<String, Vec<u8>>,
}

pub struct FsObjects {
    root: PathBuf,
}

impl FsObjects {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(key, err)),
        }
    }

    /// Writes a temp file, then hard-links it into place. `link` refuses to
    /// replace an existing file, so the first linker wins.
    fn put_if_absent(&self, key: &str, body: &[u8]) -> Result<PutOutcome, StoreError> {
        let target = self.path_for(key);
        let dir = target.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| io_err(key, e))?;

        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, body).map_err(|e| io_err(key, e))?;
        let linked = std::fs::hard_link(&tmp, &target);
        let _ = std::fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(PutOutcome::Created),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(PutOutcome::Exists),
            Err(err) => Err(io_err(key, err)),
        }
    }
}

fn io_err(key: &str, err: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        message: err.to_string(),
    }
}

pub struct SqliteObjects {
    conn: Connection,
}

impl SqliteObjects {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Sqlite(e.to_string()))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS decision_objects (
                object_key TEXT PRIMARY KEY,
                body BLOB NOT NULL
            );
            ",
        )
        .map_err(|e| StoreError::Sqlite(e.to_string()))?;
        Ok(Self { conn })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn
            .query_row(
                "SELECT body FROM decision_objects WHERE object_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Sqlite(e.to_string()))
    }

    fn put_if_absent(&mut self, key: &str, body: &[u8]) -> Result<PutOutcome, StoreError> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO decision_objects(object_key, body) VALUES (?1, ?2)",
                params![key, body],
            )
            .map_err(|e| StoreError::Sqlite(e.to_string()))?;
        Ok(if changed == 1 {
            PutOutcome::Created
        } else {
            PutOutcome::Exists
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("steward-store-{name}-{nanos}"))
    }

    fn first_writer_wins(store: &mut ObjectStore) {
        let key = object_key("decisions", "l0-v1", "req-1");
        assert_eq!(store.get(&key).unwrap(), None);
        assert_eq!(store.put_if_absent(&key, b"first").unwrap(), PutOutcome::Created);
        assert_eq!(store.put_if_absent(&key, b"second").unwrap(), PutOutcome::Exists);
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn object_key_encodes_components() {
        assert_eq!(
            object_key("/decisions/", "l0 v1", "req:a/b"),
            "decisions/l0+v1/req%3Aa%2Fb.json"
        );
    }

    #[test]
    fn memory_store_is_write_once() {
        first_writer_wins(&mut ObjectStore::Memory(MemoryObjects::default()));
    }

    #[test]
    fn filesystem_store_is_write_once() {
        let root = temp_path("fs");
        first_writer_wins(&mut ObjectStore::Filesystem(FsObjects::new(&root)));
        let leftovers: Vec<_> = std::fs::read_dir(root.join("decisions/l0-v1"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn sqlite_store_is_write_once_across_connections() {
        let path = temp_path("db");
        let path = path.to_string_lossy().to_string();
        let mut a = ObjectStore::Sqlite(SqliteObjects::new(&path).unwrap());
        first_writer_wins(&mut a);

        let mut b = ObjectStore::Sqlite(SqliteObjects::new(&path).unwrap());
        let key = object_key("decisions", "l0-v1", "req-1");
        assert_eq!(b.put_if_absent(&key, b"late").unwrap(), PutOutcome::Exists);
        assert_eq!(b.get(&key).unwrap().as_deref(), Some(&b"first"[..]));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn none_store_builds_nothing() {
        let cfg = steward_config::Store {
            kind: "none".to_string(),
            path: None,
            prefix: "decisions".to_string(),
        };
        assert!(ObjectStore::from_config(&cfg).unwrap().is_none());
    }
}
