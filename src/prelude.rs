//! Re-export of the public api of vicinity.
#[cfg(feature = "remote-kv")]
pub use crate::storage::redis::RedisStore;
#[cfg(feature = "embedded-kv")]
pub use crate::storage::sqlite::SqliteStore;
pub use crate::{
    data::{Attribute, AttributeBatch, AttributeKind},
    dist::{CorrelationDistance, Distance, EuclideanDistance},
    engine::engine::{Engine, Neighborhood, Neighbors},
    error::{Error, Result},
    filter::{DistanceThresholdFilter, Filter, NearestFilter, SortedFilter},
    hash::{BucketHash, HyperplaneHash, PcaHash, PcaProjector},
    pca::{online_pca, PcaModel},
    spectral::SpectralHash,
    storage::{
        file::FileStore,
        general::{storage_factory, BucketStore, StorageOptions},
        mem::MemoryStore,
    },
};

pub type EngineMem<H> = Engine<H, MemoryStore>;
pub type EngineFile<H> = Engine<H, FileStore>;
#[cfg(feature = "embedded-kv")]
pub type EngineSql<H> = Engine<H, SqliteStore>;
/// Engine over whatever backend the factory picked at runtime.
pub type EngineBoxed<H> = Engine<H, Box<dyn BucketStore>>;
