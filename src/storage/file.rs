//! Plain-file backend: one file per `(bucket key, attribute)` pair.
use crate::data::{Attribute, AttributeBatch};
use crate::error::{Error, Result};
use crate::storage::general::BucketStore;
use fnv::{FnvHashMap, FnvHashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const EXTENSION: &str = ".npy";

/// Buckets live under `<dir>/<keyprefix>/<key>_<attribute>.npy` as raw
/// concatenated element bytes. Appends use the filesystem's append mode, so
/// a bucket file grows by whole elements only.
pub struct FileStore {
    buckets_dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(keyprefix: &str, root: P) -> Result<Self> {
        let mut buckets_dir = root.as_ref().to_path_buf();
        if !keyprefix.is_empty() {
            buckets_dir.push(keyprefix);
        }
        fs::create_dir_all(&buckets_dir)?;
        Ok(FileStore { buckets_dir })
    }

    fn bucket_path(&self, key: u64, attribute: &str) -> PathBuf {
        self.buckets_dir
            .join(format!("{}_{}{}", key, attribute, EXTENSION))
    }

    /// Parse `<key>_<attribute>.npy` back into its parts.
    fn parse_file_name(name: &str) -> Option<(u64, &str)> {
        let stem = name.strip_suffix(EXTENSION)?;
        let mut parts = stem.splitn(2, '_');
        let key = parts.next()?.parse().ok()?;
        let attribute = parts.next()?;
        Some((key, attribute))
    }
}

impl BucketStore for FileStore {
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize> {
        // Buffer per file so a key repeated within the batch costs one append.
        let mut buf: FnvHashMap<PathBuf, Vec<u8>> = FnvHashMap::default();
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
                buf.entry(self.bucket_path(key, &name))
                    .or_default()
                    .extend(element);
            }
        }

        for (path, bytes) in buf {
            let mut f = OpenOptions::new().create(true).append(true).open(path)?;
            f.write_all(&bytes)?;
        }
        Ok(keys.len())
    }

    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>> {
        keys.iter()
            .map(|&key| {
                match fs::read(self.bucket_path(key, &attribute.name)) {
                    Ok(bytes) => attribute.decode(&bytes),
                    Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(attribute.empty_batch())
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .collect()
    }

    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>> {
        let element_size = attribute.element_size();
        keys.iter()
            .map(|&key| {
                match fs::metadata(self.bucket_path(key, &attribute.name)) {
                    Ok(meta) => {
                        let len = meta.len() as usize;
                        if len % element_size != 0 {
                            return Err(Error::CorruptBucket { len, element_size });
                        }
                        Ok(len / element_size)
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                    Err(e) => Err(e.into()),
                }
            })
            .collect()
    }

    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>> {
        let mut keys = vec![];
        for entry in fs::read_dir(&self.buckets_dir)? {
            let file_name = entry?.file_name();
            if let Some((key, attr)) = file_name.to_str().and_then(Self::parse_file_name) {
                if attr == attribute {
                    keys.push(key);
                }
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }

    fn clear(&mut self, keys: &[u64]) -> Result<usize> {
        let wanted: FnvHashSet<u64> = keys.iter().copied().collect();
        let mut removed = 0;
        for entry in fs::read_dir(&self.buckets_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some((key, _)) = file_name.to_str().and_then(Self::parse_file_name) {
                if wanted.contains(&key) {
                    fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn clear_all(&mut self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.buckets_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if file_name.to_str().and_then(Self::parse_file_name).is_some() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
