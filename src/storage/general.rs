//! The backend contract and the storage factory.
use crate::data::{Attribute, AttributeBatch};
use crate::error::{Error, Result};
use fnv::FnvHashMap;
use serde::Deserialize;
use std::path::PathBuf;

/// An append-only multimap from `(attribute, bucket key)` to the
/// concatenated byte encodings of the elements stored under it.
///
/// Within one `store` call, element i of every attribute stream lands in
/// bucket `keys[i]`; the call is the atomicity boundary, so element
/// positions line up across attributes exactly when they were written
/// together. Backends propagate I/O failures verbatim; a missing bucket is
/// an empty batch, never an error.
pub trait BucketStore {
    /// Append element i of each attribute stream to bucket `keys[i]`.
    /// Every stream must hold one element per key. Returns the number of
    /// keys written.
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize>;

    /// The full decoded contents of each requested bucket.
    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>>;

    /// Number of logical elements in each bucket. Callers pass the
    /// attribute the count is measured on (canonically the patch).
    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>>;

    /// All keys ever written for the given attribute, ascending.
    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>>;

    /// Delete every `(attribute, key)` pair for the listed keys. Returns
    /// the number of pairs removed.
    fn clear(&mut self, keys: &[u64]) -> Result<usize>;

    /// Wholesale wipe across all attributes and keys.
    fn clear_all(&mut self) -> Result<usize>;
}

impl<S: BucketStore + ?Sized> BucketStore for Box<S> {
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize> {
        (**self).store(keys, values)
    }

    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>> {
        (**self).retrieve(keys, attribute)
    }

    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>> {
        (**self).count(keys, attribute)
    }

    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>> {
        (**self).bucket_keys(attribute)
    }

    fn clear(&mut self, keys: &[u64]) -> Result<usize> {
        (**self).clear(keys)
    }

    fn clear_all(&mut self) -> Result<usize> {
        (**self).clear_all()
    }
}

/// Backend options; unused fields are ignored by backends that do not need
/// them. Deserializable so deployments can keep them in a config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            dir: PathBuf::from("./db"),
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

/// Construct a backend by its discriminant name: `memory`, `file`,
/// `embedded-kv` or `remote-kv`. Unknown names fail.
pub fn storage_factory(
    name: &str,
    keyprefix: &str,
    options: &StorageOptions,
) -> Result<Box<dyn BucketStore>> {
    match name.to_lowercase().as_str() {
        "memory" => Ok(Box::new(super::mem::MemoryStore::new())),
        "file" => Ok(Box::new(super::file::FileStore::new(
            keyprefix,
            &options.dir,
        )?)),
        #[cfg(feature = "embedded-kv")]
        "embedded-kv" => Ok(Box::new(super::sqlite::SqliteStore::new(
            keyprefix,
            &options.dir,
        )?)),
        #[cfg(feature = "remote-kv")]
        "remote-kv" => Ok(Box::new(super::redis::RedisStore::new(
            keyprefix,
            &options.host,
            options.port,
            options.db,
        )?)),
        _ => Err(Error::UnknownStorage(name.to_string())),
    }
}
