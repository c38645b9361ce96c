//! # vicinity
//!
//! Approximate nearest neighbor search built on locality sensitive
//! hashing. Vectors are hashed to compact integer bucket keys; vectors that
//! hash alike share a bucket, and querying scores only the contents of the
//! buckets a query lands in.
//!
//! ## Hashing families
//! * [HyperplaneHash](crate::hash::HyperplaneHash) - random hyperplane
//!   signs, no training.
//! * [PcaHash](crate::hash::PcaHash) - signs of the leading principal
//!   components of a training stream.
//! * [SpectralHash](crate::spectral::SpectralHash) - sinusoidal
//!   eigenfunctions over the PCA projection, after Weiss et al.
//!
//! ## Storage backends
//! Buckets are byte streams in a pluggable [BucketStore](
//! crate::storage::general::BucketStore): in-memory, plain files, an
//! embedded key-value store (SQLite, feature `embedded-kv`, on by default)
//! or a remote key-value server (Redis, feature `remote-kv`). The
//! [storage_factory](crate::storage::general::storage_factory) picks one by
//! name at runtime.
//!
//! ## Example
//!
//! ```
//! use vicinity::prelude::*;
//! use ndarray::prelude::*;
//!
//! let hasher = HyperplaneHash::new("demo", 3, 8, 1).unwrap();
//! let mut engine = Engine::new(hasher, MemoryStore::new())
//!     .filters(vec![Box::new(NearestFilter::new(5))]);
//!
//! let vs = array![[1., 0., 0.], [0.9, 0.1, 0.], [-1., 0., 0.]];
//! engine.store_batch(vs.view(), &[]).unwrap();
//!
//! let query = array![1., 0., 0.1];
//! let neighbors = engine.neighbors(query.view(), &[]).unwrap();
//! assert!(neighbors.dist.len() <= 5);
//! ```
#[cfg(feature = "blas")]
extern crate blas_src;

pub mod constants;
pub mod data;
pub mod dist;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hash;
pub mod pca;
pub mod prelude;
pub mod spectral;
pub mod storage;
pub(crate) mod utils;

pub use crate::engine::engine::{Engine, Neighborhood};
pub use crate::error::{Error, Result};
