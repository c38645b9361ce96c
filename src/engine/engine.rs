//! The indexing and query engine.
use crate::constants::PATCH;
use crate::data::{Attribute, AttributeBatch};
use crate::dist::{Distance, EuclideanDistance};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::hash::BucketHash;
use crate::storage::general::BucketStore;
use crate::utils::Timer;
use fnv::FnvHashMap;
use log::debug;
use ndarray::prelude::*;
use std::collections::VecDeque;

/// Drives ANN indexing and search over one hasher, one distance, an ordered
/// filter chain and one storage backend.
///
/// Indexing hashes a vector batch into bucket keys and appends the vectors
/// (under the canonical patch attribute) plus any caller attributes to their
/// buckets. Querying hashes, fetches each distinct bucket once, scores the
/// candidates and yields the filtered survivors lazily.
///
/// # Example
///
/// ```
/// use vicinity::prelude::*;
/// use ndarray::prelude::*;
///
/// let hasher = HyperplaneHash::new("lsh", 3, 4, 1).unwrap();
/// let mut engine = Engine::new(hasher, MemoryStore::new())
///     .filters(vec![Box::new(NearestFilter::new(2))]);
///
/// let vs = array![[1., 0., 0.], [0., 1., 0.]];
/// engine.store_batch(vs.view(), &[]).unwrap();
///
/// for record in engine.neighbors_batch(vs.view(), vs.view(), &[]).unwrap() {
///     let (query, neighbors) = record.unwrap();
///     assert!(neighbors.dist.len() <= 2);
///     println!("query {}: {:?}", query, neighbors.dist);
/// }
/// ```
pub struct Engine<H, S>
where
    H: BucketHash,
    S: BucketStore,
{
    hasher: H,
    storage: S,
    distance: Box<dyn Distance>,
    filters: Vec<Box<dyn Filter>>,
    /// Bit positions flipped when a bucket under-fills. None flips all
    /// `nbits`, Some(0) disables probing.
    refill_bits: Option<usize>,
}

/// One query's result: filtered distances plus the matching slice of every
/// requested attribute. Element i of every field describes the same
/// candidate.
#[derive(Debug)]
pub struct Neighborhood {
    pub dist: Array1<f32>,
    pub attributes: FnvHashMap<String, AttributeBatch>,
}

impl<H, S> Engine<H, S>
where
    H: BucketHash,
    S: BucketStore,
{
    /// A new engine with Euclidean distance over the patch attribute, no
    /// filters and full-width underfill probing.
    pub fn new(hasher: H, storage: S) -> Self {
        Engine {
            hasher,
            storage,
            distance: Box::new(EuclideanDistance::new()),
            filters: vec![],
            refill_bits: None,
        }
    }

    /// Replace the distance function.
    pub fn distance(mut self, distance: Box<dyn Distance>) -> Self {
        self.distance = distance;
        self
    }

    /// Replace the filter chain. Filters apply left to right; the first
    /// filter's target count drives underfill probing.
    pub fn filters(mut self, filters: Vec<Box<dyn Filter>>) -> Self {
        self.filters = filters;
        self
    }

    /// Number of low bit positions flipped when a bucket holds fewer
    /// candidates than the first filter's target. Zero disables probing.
    pub fn refill_bits(mut self, bits: usize) -> Self {
        self.refill_bits = Some(bits);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Descriptor of the canonical patch attribute for this engine's input
    /// dimension.
    pub fn patch_attribute(&self) -> Attribute {
        Attribute::tensor(PATCH, vec![self.hasher.dim()])
    }

    /// Hash and append a batch of vectors, together with any extra
    /// attribute batches of the same length. Returns the bucket key of each
    /// row.
    pub fn store_batch(
        &mut self,
        v: ArrayView2<f32>,
        extra: &[(Attribute, AttributeBatch)],
    ) -> Result<Array1<u64>> {
        let keys = {
            let _t = Timer::new("hashing");
            self.hasher.hash(v)?
        };

        let patch = self.patch_attribute();
        let mut values = FnvHashMap::default();
        values.insert(
            patch.name.clone(),
            patch.encode(&AttributeBatch::Tensor(v.to_owned()))?,
        );
        for (attribute, batch) in extra {
            if attribute.name == PATCH {
                return Err(Error::Failed(
                    "the patch attribute is written by the engine itself".to_string(),
                ));
            }
            if batch.len() != v.nrows() {
                return Err(Error::Failed(format!(
                    "attribute {} has {} elements for {} vectors",
                    attribute.name,
                    batch.len(),
                    v.nrows()
                )));
            }
            values.insert(attribute.name.clone(), attribute.encode(batch)?);
        }

        let _t = Timer::new("storing");
        let keys_slice = keys
            .as_slice()
            .ok_or_else(|| Error::Failed("keys are not contiguous".to_string()))?;
        self.storage.store(keys_slice, values)?;
        Ok(keys)
    }

    /// Single-vector convenience wrapper around
    /// [store_batch](Engine::store_batch).
    pub fn store_vec(
        &mut self,
        v: ArrayView1<f32>,
        extra: &[(Attribute, AttributeBatch)],
    ) -> Result<u64> {
        let keys = self.store_batch(v.insert_axis(Axis(0)), extra)?;
        Ok(keys[0])
    }

    /// Query a batch of vectors. `v` is hashed; `query_values` feeds the
    /// distance function, row-aligned with `v`. The returned iterator
    /// lazily yields `(query index, neighborhood)` per query, grouped by
    /// bucket: ascending bucket key first, then input order within a
    /// bucket. Consumers must not assume input order.
    pub fn neighbors_batch<'a>(
        &'a self,
        v: ArrayView2<f32>,
        query_values: ArrayView2<f32>,
        attributes: &[Attribute],
    ) -> Result<Neighbors<'a, H, S>> {
        if v.nrows() != query_values.nrows() {
            return Err(Error::Failed(format!(
                "{} hash vectors for {} query values",
                v.nrows(),
                query_values.nrows()
            )));
        }

        let mut attributes: Vec<Attribute> = attributes.to_vec();
        if !attributes.iter().any(|a| a.name == self.distance.attribute()) {
            if self.distance.attribute() == PATCH {
                attributes.push(self.patch_attribute());
            } else {
                return Err(Error::Failed(format!(
                    "distance attribute {} was not supplied",
                    self.distance.attribute()
                )));
            }
        }
        let scored = attributes
            .iter()
            .find(|a| a.name == self.distance.attribute())
            .expect("distance attribute present by construction");
        if let Some(width) = scored.row_width() {
            if query_values.ncols() != width {
                return Err(Error::DimensionMismatch {
                    expected: width,
                    got: query_values.ncols(),
                });
            }
        }

        let keys = {
            let _t = Timer::new("hashing");
            self.hasher.hash(v)?
        };

        // Fetch only buckets that are unique.
        let _t = Timer::new("uniquifying");
        let mut unique_keys: Vec<u64> = keys.iter().copied().collect();
        unique_keys.sort_unstable();
        unique_keys.dedup();
        let mut groups: Vec<Vec<usize>> = vec![vec![]; unique_keys.len()];
        for (query, key) in keys.iter().enumerate() {
            let slot = unique_keys
                .binary_search(key)
                .expect("key came from the deduplicated list");
            groups[slot].push(query);
        }
        debug!(
            "{} queries over {} distinct buckets",
            keys.len(),
            unique_keys.len()
        );

        Ok(Neighbors {
            engine: self,
            attributes,
            patch: self.patch_attribute(),
            queries: query_values.to_owned(),
            target: self.filters.first().and_then(|f| f.target()),
            flip_bits: self
                .refill_bits
                .unwrap_or_else(|| self.hasher.nbits())
                .min(self.hasher.nbits()),
            unique_keys,
            groups,
            cursor: 0,
            pending: VecDeque::new(),
            buckets: FnvHashMap::default(),
            done: false,
        })
    }

    /// Query a single vector and return its neighborhood.
    pub fn neighbors(&self, v: ArrayView1<f32>, attributes: &[Attribute]) -> Result<Neighborhood> {
        let v = v.insert_axis(Axis(0));
        let mut records = self.neighbors_batch(v.view(), v.view(), attributes)?;
        match records.next() {
            Some(Ok((_, neighborhood))) => Ok(neighborhood),
            Some(Err(e)) => Err(e),
            None => Err(Error::Failed("query yielded no record".to_string())),
        }
    }

    /// Number of candidates each vector's bucket currently holds. Large
    /// counts relative to the wanted top-K mean the hash spreads too
    /// little; more bits shrink the buckets.
    pub fn candidate_count_batch(&self, v: ArrayView2<f32>) -> Result<Vec<usize>> {
        let keys = self.hasher.hash(v)?;
        let keys_slice = keys
            .as_slice()
            .ok_or_else(|| Error::Failed("keys are not contiguous".to_string()))?;
        self.storage.count(keys_slice, &self.patch_attribute())
    }

    pub fn candidate_count(&self, v: ArrayView1<f32>) -> Result<usize> {
        let counts = self.candidate_count_batch(v.insert_axis(Axis(0)))?;
        Ok(counts[0])
    }

    /// Sizes of all buckets, with their keys.
    pub fn bucket_counts(&self) -> Result<(Vec<usize>, Vec<u64>)> {
        let keys = self.storage.bucket_keys(PATCH)?;
        let counts = self.storage.count(&keys, &self.patch_attribute())?;
        Ok((counts, keys))
    }

    /// Total number of indexed vectors.
    pub fn patch_count(&self) -> Result<usize> {
        Ok(self.bucket_counts()?.0.iter().sum())
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> Result<usize> {
        Ok(self.storage.bucket_keys(PATCH)?.len())
    }

    /// Drop every bucket of every attribute.
    pub fn clear_all_buckets(&mut self) -> Result<usize> {
        self.storage.clear_all()
    }
}

/// Lazy query results; see [neighbors_batch](Engine::neighbors_batch).
/// Dropping the iterator abandons the remaining buckets unfetched.
pub struct Neighbors<'a, H, S>
where
    H: BucketHash,
    S: BucketStore,
{
    engine: &'a Engine<H, S>,
    attributes: Vec<Attribute>,
    patch: Attribute,
    queries: Array2<f32>,
    target: Option<usize>,
    flip_bits: usize,
    unique_keys: Vec<u64>,
    groups: Vec<Vec<usize>>,
    cursor: usize,
    pending: VecDeque<usize>,
    buckets: FnvHashMap<String, AttributeBatch>,
    done: bool,
}

impl<'a, H, S> Neighbors<'a, H, S>
where
    H: BucketHash,
    S: BucketStore,
{
    /// Pull the bucket contents for one key, expanding by single-bit flips
    /// when the patch bucket stays below the first filter's target.
    fn fetch_bucket(&mut self, key: u64) -> Result<()> {
        let mut buckets = FnvHashMap::default();
        for attribute in &self.attributes {
            let batch = self
                .engine
                .storage
                .retrieve(&[key], attribute)?
                .pop()
                .ok_or_else(|| Error::Failed("backend returned no batch for a key".to_string()))?;
            buckets.insert(attribute.name.clone(), batch);
        }

        if let Some(target) = self.target {
            // Underfill is measured on the patch bucket, which may not be
            // among the requested attributes.
            let have = match buckets.get(PATCH) {
                Some(batch) => batch.len(),
                None => self.engine.storage.count(&[key], &self.patch)?[0],
            };
            if have < target && self.flip_bits > 0 {
                debug!(
                    "bucket {:#018x} under-filled ({} < {}), fetching {} flip neighbors",
                    key, have, target, self.flip_bits
                );
                let flipped: Vec<u64> = (0..self.flip_bits).map(|bit| key ^ (1 << bit)).collect();
                for attribute in &self.attributes {
                    let extra = self.engine.storage.retrieve(&flipped, attribute)?;
                    let bucket = buckets
                        .get_mut(&attribute.name)
                        .expect("bucket fetched above");
                    for batch in &extra {
                        bucket.append(batch)?;
                    }
                }
            }
        }

        self.buckets = buckets;
        Ok(())
    }

    /// Score and filter the current bucket for one query.
    fn score(&self, query: usize) -> Result<Neighborhood> {
        let distance = &self.engine.distance;
        let candidates = self.buckets[distance.attribute()]
            .as_tensor()
            .ok_or_else(|| {
                Error::Failed(format!(
                    "distance attribute {} is not a tensor",
                    distance.attribute()
                ))
            })?;
        let mut dist = distance.eval(self.queries.row(query), candidates);

        // Filters compose left to right, each seeing the surviving slice.
        let mut kept: Vec<usize> = (0..dist.len()).collect();
        for filter in &self.engine.filters {
            let local = filter.keep(dist.view());
            kept = local.iter().map(|&i| kept[i]).collect();
            dist = Array1::from(local.iter().map(|&i| dist[i]).collect::<Vec<f32>>());
        }

        let mut attributes = FnvHashMap::default();
        for attribute in &self.attributes {
            attributes.insert(
                attribute.name.clone(),
                self.buckets[&attribute.name].select(&kept),
            );
        }
        Ok(Neighborhood { dist, attributes })
    }
}

impl<'a, H, S> Iterator for Neighbors<'a, H, S>
where
    H: BucketHash,
    S: BucketStore,
{
    type Item = Result<(usize, Neighborhood)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(query) = self.pending.pop_front() {
                return match self.score(query) {
                    Ok(neighborhood) => Some(Ok((query, neighborhood))),
                    Err(e) => {
                        self.done = true;
                        Some(Err(e))
                    }
                };
            }
            if self.cursor >= self.unique_keys.len() {
                self.done = true;
                return None;
            }
            let key = self.unique_keys[self.cursor];
            if let Err(e) = self.fetch_bucket(key) {
                self.done = true;
                return Some(Err(e));
            }
            self.pending = self.groups[self.cursor].iter().copied().collect();
            self.cursor += 1;
        }
    }
}
