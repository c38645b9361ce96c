#![cfg(feature = "embedded-kv")]
//! Embedded key-value backend on SQLite.
use crate::data::{Attribute, AttributeBatch};
use crate::error::{Error, Result};
use crate::storage::general::BucketStore;
use fnv::FnvHashMap;
use rusqlite::{params, Connection, OptionalExtension, NO_PARAMS};
use std::path::Path;

fn init_db_settings(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = OFF;
    PRAGMA synchronous = OFF;
    PRAGMA cache_size = 100000;
    PRAGMA main.locking_mode=EXCLUSIVE;",
    )?;
    Ok(())
}

fn make_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS buckets (
             attr       TEXT NOT NULL,
             key        INTEGER NOT NULL,
             value      BLOB NOT NULL,
             PRIMARY KEY (attr, key)
            )
                ",
    )?;
    Ok(())
}

/// Single-file embedded backend. One row per `(attribute, key)`; appends
/// merge by blob concatenation in an upsert, one transaction per `store`
/// call. State survives sessions: opening the same path resumes the index.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(keyprefix: &str, dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let name = if keyprefix.is_empty() {
            "buckets"
        } else {
            keyprefix
        };
        let path = dir.as_ref().join(format!("{}.db3", name));
        let conn = Connection::open(path)?;
        SqliteStore::init_from_conn(conn)
    }

    /// Volatile variant, handy in tests.
    pub fn in_memory() -> Result<Self> {
        SqliteStore::init_from_conn(Connection::open_in_memory()?)
    }

    fn init_from_conn(conn: Connection) -> Result<Self> {
        init_db_settings(&conn)?;
        make_table(&conn)?;
        Ok(SqliteStore { conn })
    }
}

impl BucketStore for SqliteStore {
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize> {
        // Merge per (attribute, key) first so each row is upserted once.
        let mut merged: FnvHashMap<(String, u64), Vec<u8>> = FnvHashMap::default();
        for (name, elements) in values {
            if elements.len() != keys.len() {
                return Err(Error::Failed(format!(
                    "attribute {} has {} elements for {} keys",
                    name,
                    elements.len(),
                    keys.len()
                )));
            }
            for (&key, element) in keys.iter().zip(elements) {
                merged
                    .entry((name.clone(), key))
                    .or_default()
                    .extend(element);
            }
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO buckets (attr, key, value)
VALUES (?1, ?2, ?3)
ON CONFLICT (attr, key) DO UPDATE SET value = value || excluded.value
        ",
            )?;
            for ((attr, key), blob) in merged {
                stmt.execute(params![attr, key as i64, blob])?;
            }
        }
        tx.commit()?;
        Ok(keys.len())
    }

    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM buckets WHERE attr = ?1 AND key = ?2")?;
        keys.iter()
            .map(|&key| {
                let blob: Option<Vec<u8>> = stmt
                    .query_row(params![attribute.name, key as i64], |row| row.get(0))
                    .optional()?;
                match blob {
                    Some(bytes) => attribute.decode(&bytes),
                    None => Ok(attribute.empty_batch()),
                }
            })
            .collect()
    }

    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>> {
        let element_size = attribute.element_size();
        let mut stmt = self
            .conn
            .prepare_cached("SELECT length(value) FROM buckets WHERE attr = ?1 AND key = ?2")?;
        keys.iter()
            .map(|&key| {
                let len: Option<i64> = stmt
                    .query_row(params![attribute.name, key as i64], |row| row.get(0))
                    .optional()?;
                match len {
                    Some(len) => {
                        let len = len as usize;
                        if len % element_size != 0 {
                            return Err(Error::CorruptBucket { len, element_size });
                        }
                        Ok(len / element_size)
                    }
                    None => Ok(0),
                }
            })
            .collect()
    }

    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key FROM buckets WHERE attr = ?1")?;
        let mut rows = stmt.query(params![attribute])?;
        let mut keys = vec![];
        while let Some(row) = rows.next()? {
            let key: i64 = row.get(0)?;
            keys.push(key as u64);
        }
        keys.sort_unstable();
        Ok(keys)
    }

    fn clear(&mut self, keys: &[u64]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM buckets WHERE key = ?1")?;
            for &key in keys {
                removed += stmt.execute(params![key as i64])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn clear_all(&mut self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM buckets", NO_PARAMS)?;
        Ok(removed)
    }
}
