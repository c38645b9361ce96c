#![cfg(test)]
use crate::hash::check_dim;
use crate::prelude::*;
use fnv::FnvHashMap;
use ndarray::prelude::*;
use std::cell::RefCell;

/// Hashes every row to the same key. Forces full bucket collisions.
struct ConstHash {
    dim: usize,
    nbits: usize,
    key: u64,
}

impl BucketHash for ConstHash {
    fn name(&self) -> &str {
        "const"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn nbits(&self) -> usize {
        self.nbits
    }

    fn hash(&self, v: ArrayView2<f32>) -> Result<Array1<u64>> {
        check_dim(self.dim, &v)?;
        Ok(Array1::from_elem(v.nrows(), self.key))
    }
}

/// Keys each row by its first component. Gives tests full control over
/// which queries collide.
struct FirstComponentHash {
    dim: usize,
    nbits: usize,
}

impl BucketHash for FirstComponentHash {
    fn name(&self) -> &str {
        "first"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn nbits(&self) -> usize {
        self.nbits
    }

    fn hash(&self, v: ArrayView2<f32>) -> Result<Array1<u64>> {
        check_dim(self.dim, &v)?;
        let mask = (1u64 << self.nbits) - 1;
        Ok(v.column(0).mapv(|x| x as u64 & mask))
    }
}

/// Wraps a MemoryStore and records every retrieval's key list.
struct SpyStore {
    inner: MemoryStore,
    retrievals: RefCell<Vec<(String, Vec<u64>)>>,
}

impl SpyStore {
    fn new() -> Self {
        SpyStore {
            inner: MemoryStore::new(),
            retrievals: RefCell::new(vec![]),
        }
    }
}

impl BucketStore for SpyStore {
    fn store(&mut self, keys: &[u64], values: FnvHashMap<String, Vec<Vec<u8>>>) -> Result<usize> {
        self.inner.store(keys, values)
    }

    fn retrieve(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<AttributeBatch>> {
        self.retrievals
            .borrow_mut()
            .push((attribute.name.clone(), keys.to_vec()));
        self.inner.retrieve(keys, attribute)
    }

    fn count(&self, keys: &[u64], attribute: &Attribute) -> Result<Vec<usize>> {
        self.inner.count(keys, attribute)
    }

    fn bucket_keys(&self, attribute: &str) -> Result<Vec<u64>> {
        self.inner.bucket_keys(attribute)
    }

    fn clear(&mut self, keys: &[u64]) -> Result<usize> {
        self.inner.clear(keys)
    }

    fn clear_all(&mut self) -> Result<usize> {
        self.inner.clear_all()
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_random_lsh_round_trip() {
    init_logging();
    let hasher = HyperplaneHash::new("lsh", 3, 3, 42).unwrap();
    let mut engine = Engine::new(hasher, MemoryStore::new())
        .filters(vec![Box::new(NearestFilter::new(2))]);

    let vs = array![[1., 0., 0.], [1., 0., 0.0001], [-1., 0., 0.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    let neighbors = engine.neighbors(vs.row(0), &[]).unwrap();
    assert!(!neighbors.dist.is_empty());
    assert!(neighbors.dist.len() <= 2);

    // The queried vector itself scores zero and comes first.
    assert_eq!(neighbors.dist[0], 0.);
    let patches = neighbors.attributes["patch"].as_tensor().unwrap();
    assert_eq!(patches.row(0), vs.row(0));

    // Its near-twin outranks the far vector.
    if neighbors.dist.len() == 2 {
        assert!(neighbors.dist[1] < 1.);
        assert!(neighbors.dist[0] <= neighbors.dist[1]);
    }
}

#[test]
fn test_dedup_one_fetch_per_bucket() {
    let hasher = FirstComponentHash { dim: 2, nbits: 8 };
    let mut engine = Engine::new(hasher, SpyStore::new());

    let vs = array![[1., 0.], [1., 5.], [2., 0.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    let records: Vec<_> = engine
        .neighbors_batch(vs.view(), vs.view(), &[])
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(records.len(), 3);

    // Three queries, two distinct buckets: exactly two patch retrievals.
    let retrievals = engine.storage().retrievals.borrow();
    let patch_fetches: Vec<_> = retrievals.iter().filter(|(a, _)| a == "patch").collect();
    assert_eq!(patch_fetches.len(), 2);
    assert_eq!(patch_fetches[0].1, vec![1]);
    assert_eq!(patch_fetches[1].1, vec![2]);
}

#[test]
fn test_emission_groups_queries_by_bucket() {
    let hasher = FirstComponentHash { dim: 2, nbits: 8 };
    let mut engine = Engine::new(hasher, MemoryStore::new());

    let vs = array![[2., 0.], [1., 0.], [2., 1.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    let order: Vec<usize> = engine
        .neighbors_batch(vs.view(), vs.view(), &[])
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    // Ascending bucket key, input order within a bucket.
    assert_eq!(order, vec![1, 0, 2]);
}

#[test]
fn test_underfill_flips_all_bits_in_order() {
    init_logging();
    let hasher = ConstHash {
        dim: 2,
        nbits: 4,
        key: 0b0101,
    };
    let mut engine = Engine::new(hasher, SpyStore::new())
        .filters(vec![Box::new(NearestFilter::new(10))]);

    let vs = array![[1., 1.], [2., 2.], [3., 3.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    let query = array![[1., 1.]];
    let records: Vec<_> = engine
        .neighbors_batch(query.view(), query.view(), &[])
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();

    // All three collided candidates survive the top-10 filter.
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1.dist.len(), 3);

    let retrievals = engine.storage().retrievals.borrow();
    let patch_fetches: Vec<_> = retrievals.iter().filter(|(a, _)| a == "patch").collect();
    assert_eq!(patch_fetches.len(), 2);
    assert_eq!(patch_fetches[0].1, vec![0b0101]);
    // One single-bit flip per key bit, in bit index order.
    assert_eq!(
        patch_fetches[1].1,
        vec![0b0100, 0b0111, 0b0001, 0b1101]
    );
}

#[test]
fn test_underfill_can_be_disabled() {
    let hasher = ConstHash {
        dim: 2,
        nbits: 4,
        key: 3,
    };
    let mut engine = Engine::new(hasher, SpyStore::new())
        .filters(vec![Box::new(NearestFilter::new(10))])
        .refill_bits(0);

    let vs = array![[1., 1.]];
    engine.store_batch(vs.view(), &[]).unwrap();
    let records: Vec<_> = engine
        .neighbors_batch(vs.view(), vs.view(), &[])
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(records[0].1.dist.len(), 1);

    let retrievals = engine.storage().retrievals.borrow();
    assert_eq!(retrievals.len(), 1);
}

#[test]
fn test_correlation_with_constant_patch_does_not_panic() {
    let hasher = ConstHash {
        dim: 3,
        nbits: 4,
        key: 1,
    };
    let mut engine = Engine::new(hasher, MemoryStore::new())
        .distance(Box::new(CorrelationDistance::new()))
        .filters(vec![Box::new(NearestFilter::new(2))]);

    // The constant patch has zero variance, so its correlation is NaN.
    let vs = array![[1., 2., 3.], [3., 2., 1.], [5., 5., 5.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    let neighbors = engine.neighbors(vs.row(0), &[]).unwrap();
    assert_eq!(neighbors.dist.len(), 2);
    // The NaN-scored candidate ranks last and falls out of the top 2.
    assert!((neighbors.dist[0] + 1.).abs() < 1e-6);
    assert!((neighbors.dist[1] - 1.).abs() < 1e-6);

    // A constant query scores every candidate NaN; still no panic.
    let neighbors = engine.neighbors(array![4., 4., 4.].view(), &[]).unwrap();
    assert_eq!(neighbors.dist.len(), 2);
    assert!(neighbors.dist.iter().all(|d| d.is_nan()));
}

#[test]
fn test_underfill_measures_patch_for_custom_distance_attribute() {
    let hasher = ConstHash {
        dim: 2,
        nbits: 3,
        key: 2,
    };
    let feat = Attribute::tensor("feat", vec![2]);
    let mut engine = Engine::new(hasher, SpyStore::new())
        .distance(Box::new(EuclideanDistance::over("feat")))
        .filters(vec![Box::new(NearestFilter::new(5))]);

    let vs = array![[1., 1.]];
    let feats = AttributeBatch::Tensor(array![[0.5, 0.5]]);
    engine
        .store_batch(vs.view(), &[(feat.clone(), feats)])
        .unwrap();

    // Only the scored attribute is requested, so the patch bucket is never
    // fetched; its count still drives the underfill expansion.
    let query = array![[0.5, 0.5]];
    let records: Vec<_> = engine
        .neighbors_batch(vs.view(), query.view(), &[feat])
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1.dist.len(), 1);

    let retrievals = engine.storage().retrievals.borrow();
    assert!(retrievals.iter().all(|(a, _)| a == "feat"));
    let feat_fetches: Vec<_> = retrievals.iter().filter(|(a, _)| a == "feat").collect();
    assert_eq!(feat_fetches.len(), 2);
    assert_eq!(feat_fetches[0].1, vec![2]);
    assert_eq!(feat_fetches[1].1, vec![3, 0, 6]);
}

#[test]
fn test_multi_attribute_slicing() {
    let hasher = ConstHash {
        dim: 2,
        nbits: 4,
        key: 2,
    };
    let mut engine = Engine::new(hasher, MemoryStore::new())
        .filters(vec![Box::new(NearestFilter::new(3))]);

    let vs = array![[0., 0.], [1., 1.], [2., 2.], [3., 3.], [10., 10.]];
    let label = Attribute::opaque("label", 1);
    let labels = AttributeBatch::Opaque(vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    engine
        .store_batch(vs.view(), &[(label.clone(), labels)])
        .unwrap();

    let neighbors = engine.neighbors(vs.row(0), &[label]).unwrap();
    assert_eq!(neighbors.dist.len(), 3);
    assert_eq!(neighbors.attributes["label"].len(), 3);

    // label[i] belongs to the patch scoring dist[i].
    match &neighbors.attributes["label"] {
        AttributeBatch::Opaque(labels) => {
            assert_eq!(labels, &vec![vec![0], vec![1], vec![2]]);
        }
        other => panic!("labels decoded as {:?}", other),
    }
    assert!(neighbors.dist[0] <= neighbors.dist[1]);
    assert!(neighbors.dist[1] <= neighbors.dist[2]);
}

#[test]
fn test_empty_index_yields_empty_records() {
    let hasher = HyperplaneHash::new("lsh", 3, 4, 1).unwrap();
    let engine = Engine::new(hasher, MemoryStore::new())
        .filters(vec![Box::new(NearestFilter::new(5))]);

    let neighbors = engine.neighbors(array![1., 2., 3.].view(), &[]).unwrap();
    assert_eq!(neighbors.dist.len(), 0);
    assert_eq!(neighbors.attributes["patch"].len(), 0);
}

#[test]
fn test_store_validates_input() {
    let hasher = HyperplaneHash::new("lsh", 3, 4, 1).unwrap();
    let mut engine = Engine::new(hasher, MemoryStore::new());

    // Wrong vector width.
    assert!(engine.store_batch(array![[1., 2.]].view(), &[]).is_err());

    // Extra attribute stream of the wrong length.
    let label = Attribute::opaque("label", 1);
    let labels = AttributeBatch::Opaque(vec![vec![0]]);
    assert!(engine
        .store_batch(array![[1., 2., 3.], [4., 5., 6.]].view(), &[(label, labels)])
        .is_err());
}

#[test]
fn test_counts_and_clear() {
    let hasher = FirstComponentHash { dim: 2, nbits: 8 };
    let mut engine = Engine::new(hasher, MemoryStore::new());

    let vs = array![[1., 0.], [1., 5.], [2., 0.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    assert_eq!(engine.candidate_count(vs.row(0)).unwrap(), 2);
    assert_eq!(engine.candidate_count_batch(vs.view()).unwrap(), vec![2, 2, 1]);

    let (counts, keys) = engine.bucket_counts().unwrap();
    assert_eq!(keys, vec![1, 2]);
    assert_eq!(counts, vec![2, 1]);
    assert_eq!(engine.patch_count().unwrap(), 3);
    assert_eq!(engine.bucket_count().unwrap(), 2);

    assert!(engine.clear_all_buckets().unwrap() > 0);
    assert_eq!(engine.patch_count().unwrap(), 0);
}

#[test]
fn test_dropping_iterator_stops_fetches() {
    let hasher = FirstComponentHash { dim: 2, nbits: 8 };
    let mut engine = Engine::new(hasher, SpyStore::new());

    let vs = array![[1., 0.], [2., 0.], [3., 0.]];
    engine.store_batch(vs.view(), &[]).unwrap();

    let mut records = engine.neighbors_batch(vs.view(), vs.view(), &[]).unwrap();
    records.next().unwrap().unwrap();
    drop(records);

    // Only the first bucket was ever fetched.
    assert_eq!(engine.storage().retrievals.borrow().len(), 1);
}
