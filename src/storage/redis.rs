#![cfg(feature = "remote-kv")]
//! Remote key-value backend speaking the Redis list protocol.
use crate::data::{Attribute, AttributeBatch};
use crate::error::{Error, Result};
use crate::storage::general::BucketStore;
use fnv::FnvHashMap;
use redis::Commands;
use std::cell::RefCell;

/// One Redis list per `(bucket key, attribute)` pair under the physical key
/// `"{prefix}_{key}_{attribute}"`; every list entry is one encoded element.
/// Writes go through a single pipeline per `store` call.
pub struct RedisStore {
    conn: RefCell<redis::Connection>,
    keyprefix: String,
}

impl RedisStore {
    pub fn new(keyprefix: &str, host: &str, port: u16, db: i64) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{}:{}/{}", host, port, db).as_str())?;
        let conn = client.get_connection()?;
        Ok(RedisStore {
            conn: RefCell::new(conn),
            keyprefix: keyprefix.to_string(),
        })
    }

    fn physical_key(&self, key: u64, attribute: &str) -> String {
        format!("{}_{}_{}", self.keyprefix, key, attribute)
    }

    /// Recover the bucket key from a physical key matching the attribute
    /// suffix scan.
    fn parse_physical_key(&self, physical: &str, attribute: &str) -> Option<u64> {
        physical
            .strip_prefix(&format!("{}_", self.keyprefix))?
            .strip_suffix(&format!("_{}", attribute))?
            .parse()
            .ok()
    }

    fn matching_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.borrow_mut();
        let found: Vec<String> = conn.scan_match(pattern)?.collect();
        Ok(found)
    }
}

impl BucketStore for RedisStore {
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize> {
        let mut pipeline = redis::pipe();
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
                pipeline
                    .rpush(self.physical_key(key, &name), element)
                    .ignore();
            }
        }
        pipeline.query::<()>(&mut *self.conn.borrow_mut())?;
        Ok(keys.len())
    }

    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>> {
        let mut conn = self.conn.borrow_mut();
        keys.iter()
            .map(|&key| {
                let elements: Vec<Vec<u8>> =
                    conn.lrange(self.physical_key(key, &attribute.name), 0, -1)?;
                attribute.decode(&elements.concat())
            })
            .collect()
    }

    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>> {
        let mut conn = self.conn.borrow_mut();
        keys.iter()
            .map(|&key| {
                let len: usize = conn.llen(self.physical_key(key, &attribute.name))?;
                Ok(len)
            })
            .collect()
    }

    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>> {
        let pattern = format!("{}_*_{}", self.keyprefix, attribute);
        let mut keys: Vec<u64> = self
            .matching_keys(&pattern)?
            .iter()
            .filter_map(|physical| self.parse_physical_key(physical, attribute))
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn clear(&mut self, keys: &[u64]) -> Result<usize> {
        let mut removed = 0;
        for &key in keys {
            let found = self.matching_keys(&format!("{}_{}_*", self.keyprefix, key))?;
            if found.is_empty() {
                continue;
            }
            let deleted: usize = self.conn.borrow_mut().del(found)?;
            removed += deleted;
        }
        Ok(removed)
    }

    fn clear_all(&mut self) -> Result<usize> {
        let found = self.matching_keys(&format!("{}_*", self.keyprefix))?;
        if found.is_empty() {
            return Ok(0);
        }
        let deleted: usize = self.conn.borrow_mut().del(found)?;
        Ok(deleted)
    }
}
