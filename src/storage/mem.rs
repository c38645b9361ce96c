//! In-memory backend.
use crate::data::{Attribute, AttributeBatch};
use crate::error::{Error, Result};
use crate::storage::general::BucketStore;
use fnv::FnvHashMap;

/// Process-local backend keeping one element list per `(attribute, key)`
/// pair. The namespace discriminator other backends need is pointless here,
/// the map itself is the namespace.
#[derive(Default)]
pub struct MemoryStore {
    buckets: FnvHashMap<String, FnvHashMap<u64, Vec<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            buckets: FnvHashMap::default(),
        }
    }
}

impl BucketStore for MemoryStore {
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize> {
        for (name, elements) in values {
            if elements.len() != keys.len() {
                return Err(Error::Failed(format!(
                    "attribute {} has {} elements for {} keys",
                    name,
                    elements.len(),
                    keys.len()
                )));
            }
            let attr_buckets = self.buckets.entry(name).or_default();
            for (&key, element) in keys.iter().zip(elements) {
                attr_buckets.entry(key).or_default().push(element);
            }
        }
        Ok(keys.len())
    }

    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>> {
        let attr_buckets = self.buckets.get(attribute.name.as_str());
        keys.iter()
            .map(
                |key| match attr_buckets.and_then(|buckets| buckets.get(key)) {
                    Some(elements) => attribute.decode(&elements.concat()),
                    None => Ok(attribute.empty_batch()),
                },
            )
            .collect()
    }

    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>> {
        let attr_buckets = self.buckets.get(attribute.name.as_str());
        Ok(keys
            .iter()
            .map(|key| {
                attr_buckets
                    .and_then(|buckets| buckets.get(key))
                    .map_or(0, |elements| elements.len())
            })
            .collect())
    }

    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>> {
        let mut keys: Vec<u64> = match self.buckets.get(attribute) {
            Some(buckets) => buckets.keys().copied().collect(),
            None => vec![],
        };
        keys.sort_unstable();
        Ok(keys)
    }

    fn clear(&mut self, keys: &[u64]) -> Result<usize> {
        let mut removed = 0;
        for buckets in self.buckets.values_mut() {
            for key in keys {
                if buckets.remove(key).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn clear_all(&mut self) -> Result<usize> {
        let count = self.buckets.values().map(|buckets| buckets.len()).sum();
        self.buckets.clear();
        Ok(count)
    }
}
