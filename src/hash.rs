//! Hashing families that map vector batches to bucket keys.
use crate::constants::MAX_NBITS;
use crate::error::{Error, Result};
use crate::pca::{online_pca, PcaModel};
use crate::utils::create_rng;
use ndarray::prelude::*;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use serde::{Deserialize, Serialize};

/// Implement this trait to create your own custom bucket hashers.
///
/// `hash` maps a `[N, dim]` f32 batch to one `u64` bucket key per row, with
/// every key below `2^nbits`. It must be deterministic given the hasher's
/// construction-time parameters.
pub trait BucketHash {
    /// Name used to tell hashers apart in storage namespaces.
    fn name(&self) -> &str;
    /// Declared input dimension.
    fn dim(&self) -> usize;
    /// Number of key bits, at most 64.
    fn nbits(&self) -> usize;
    /// Hash a batch of vectors into bucket keys.
    fn hash(&self, v: ArrayView2<f32>) -> Result<Array1<u64>>;
}

pub(crate) fn check_nbits(nbits: usize) -> Result<()> {
    if nbits == 0 || nbits > MAX_NBITS {
        return Err(Error::InvalidBits(nbits));
    }
    Ok(())
}

pub(crate) fn check_dim(expected: usize, v: &ArrayView2<f32>) -> Result<()> {
    if v.ncols() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            got: v.ncols(),
        });
    }
    Ok(())
}

/// Fold a batch of projections into keys: bit i is set iff projection i is
/// strictly positive, with weight 2^i.
pub(crate) fn fold_signs(projections: ArrayView2<f32>) -> Array1<u64> {
    projections
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold(0u64, |key, (i, &p)| if p > 0.0 { key | 1 << i } else { key })
        })
        .collect()
}

/// Random hyperplane LSH for angular similarity.
///
/// Projects every vector on `nbits` Gaussian hyperplane normals; each sign
/// becomes one key bit, so nearby directions tend to share a bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HyperplaneHash {
    name: String,
    /// Hyperplane normals, one column per key bit.
    hyperplanes: Array2<f32>,
    nbits: usize,
}

impl HyperplaneHash {
    /// # Arguments
    ///
    /// * `dim` - Dimension of the input vectors.
    /// * `nbits` - Number of hyperplanes, and of key bits.
    /// * `seed` - Seed for the RNG. If 0, the RNG is seeded from the OS.
    pub fn new(name: &str, dim: usize, nbits: usize, seed: u64) -> Result<Self> {
        check_nbits(nbits)?;
        let mut rng = create_rng(seed);
        let hyperplanes: Array2<f32> = Array::random_using((dim, nbits), StandardNormal, &mut rng);
        Ok(HyperplaneHash {
            name: name.to_string(),
            hyperplanes,
            nbits,
        })
    }
}

impl BucketHash for HyperplaneHash {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.hyperplanes.nrows()
    }

    fn nbits(&self) -> usize {
        self.nbits
    }

    fn hash(&self, v: ArrayView2<f32>) -> Result<Array1<u64>> {
        check_dim(self.dim(), &v)?;
        let projections = v.dot(&self.hyperplanes);
        Ok(fold_signs(projections.view()))
    }
}

/// The projection part shared by the PCA based hashers.
///
/// Owns the training mean and the first `npca = min(nbits, dim)` principal
/// components, downcast to f32 for application to f32 batches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaProjector {
    mean: Array1<f32>,
    /// `[dim, npca]` basis, one retained component per column.
    components: Array2<f32>,
}

impl PcaProjector {
    pub fn from_model(model: &PcaModel, nbits: usize) -> Self {
        let dim = model.dim();
        let npca = nbits.min(dim);
        let components = model
            .eigenvectors
            .slice(s![.., ..npca])
            .mapv(|x| x as f32);
        PcaProjector {
            mean: model.mean.clone(),
            components,
        }
    }

    pub fn dim(&self) -> usize {
        self.components.nrows()
    }

    pub fn npca(&self) -> usize {
        self.components.ncols()
    }

    /// Project without removing the mean.
    pub fn project(&self, v: ArrayView2<f32>) -> Array2<f32> {
        v.dot(&self.components)
    }

    /// Project after removing the training mean.
    pub fn project_centered(&self, v: ArrayView2<f32>) -> Array2<f32> {
        (&v - &self.mean).dot(&self.components)
    }
}

/// Binary hashing on principal component signs.
///
/// Each retained component splits the centered data by its hyperplane; the
/// sign pattern folded over bit weights is the bucket key. With
/// `nbits > dim` the upper bits stay zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaHash {
    name: String,
    nbits: usize,
    projector: PcaProjector,
}

impl PcaHash {
    /// Train the PCA basis from a stream of `[N, dim]` batches.
    ///
    /// The trainset closure is invoked once; see
    /// [from_model](PcaHash::from_model) for reusing a cached basis.
    pub fn fit<F, I>(name: &str, dim: usize, nbits: usize, trainset: F) -> Result<Self>
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = Array2<f32>>,
    {
        let model = online_pca(trainset(), dim)?;
        PcaHash::from_model(name, dim, nbits, &model)
    }

    /// Build from a previously trained [PcaModel].
    pub fn from_model(name: &str, dim: usize, nbits: usize, model: &PcaModel) -> Result<Self> {
        check_nbits(nbits)?;
        if model.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: model.dim(),
            });
        }
        Ok(PcaHash {
            name: name.to_string(),
            nbits,
            projector: PcaProjector::from_model(model, nbits),
        })
    }
}

impl BucketHash for PcaHash {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.projector.dim()
    }

    fn nbits(&self) -> usize {
        self.nbits
    }

    fn hash(&self, v: ArrayView2<f32>) -> Result<Array1<u64>> {
        check_dim(self.dim(), &v)?;
        let projections = self.projector.project_centered(v);
        Ok(fold_signs(projections.view()))
    }
}
