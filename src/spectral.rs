//! Spectral hashing over a PCA projection.
//!
//! Implementation of:
//!
//! Weiss, Y., Torralba, A., & Fergus, R. (2008). Spectral Hashing. NIPS.
//! http://www.cs.huji.ac.il/~yweiss/SpectralHashing/
use crate::constants::BOUNDS_EPS;
use crate::error::{Error, Result};
use crate::hash::{check_dim, check_nbits, BucketHash, PcaProjector};
use crate::pca::{online_pca, PcaModel};
use itertools::Itertools;
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Axis-aligned bounds of the projected training data.
fn projected_bounds<F, I>(projector: &PcaProjector, trainset: F) -> Result<(Array1<f32>, Array1<f32>)>
where
    F: FnOnce() -> I,
    I: IntoIterator<Item = Array2<f32>>,
{
    let npca = projector.npca();
    let mut lo = Array1::<f32>::from_elem(npca, f32::INFINITY);
    let mut hi = Array1::<f32>::from_elem(npca, f32::NEG_INFINITY);
    let mut seen = false;

    for batch in trainset() {
        check_dim(projector.dim(), &batch.view())?;
        // According to Weiss, no need to remove the mean.
        let projections = projector.project(batch.view());
        for row in projections.genrows() {
            seen = true;
            for (i, &p) in row.iter().enumerate() {
                lo[i] = lo[i].min(p);
                hi[i] = hi[i].max(p);
            }
        }
    }
    if !seen {
        return Err(Error::Failed(
            "spectral bounds need a non-empty training stream".to_string(),
        ));
    }
    Ok((lo - BOUNDS_EPS, hi + BOUNDS_EPS))
}

/// Enumerate single-axis sinusoidal modes, rank them by analytic eigenvalue
/// and keep the `nbits` best after the constant mode.
fn mode_table(lo: &Array1<f32>, hi: &Array1<f32>, nbits: usize) -> Result<Array2<f64>> {
    let npca = lo.len();
    let range: Vec<f64> = lo
        .iter()
        .zip(hi.iter())
        .map(|(&l, &h)| h as f64 - l as f64)
        .collect();
    let max_range = range.iter().cloned().fold(0.0, f64::max);
    if !(max_range > 0.0) {
        return Err(Error::Failed(
            "projected training data has no spread".to_string(),
        ));
    }

    // Candidate modes with their eigenvalue -||m * omega0||^2. The all-zero
    // candidate is the constant eigenfunction.
    let mut candidates: Vec<(f64, usize, usize)> = vec![(0.0, 0, 0)];
    for (axis, &r) in range.iter().enumerate() {
        let max_mode = ((nbits + 1) as f64 * r / max_range).ceil() as usize;
        for m in 1..max_mode {
            let omega = m as f64 * PI / r;
            candidates.push((-(omega * omega), axis, m));
        }
    }

    if candidates.len() < nbits + 1 {
        return Err(Error::Failed(format!(
            "only {} spectral modes available for {} bits",
            candidates.len() - 1,
            nbits
        )));
    }

    let ranked = candidates
        .into_iter()
        .sorted_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let mut modes = Array2::<f64>::zeros((nbits, npca));
    // Skip the constant mode; it would give every vector the same bit.
    for (k, (_, axis, m)) in ranked.skip(1).take(nbits).enumerate() {
        modes[[k, axis]] = m as f64;
    }
    Ok(modes)
}

/// Spectral hashing: bucket keys from the signs of products of sine
/// eigenfunctions evaluated on the PCA projection of a vector.
///
/// Compared to [PcaHash](crate::hash::PcaHash), the retained components are
/// cut by more than one threshold each, spreading buckets along the
/// directions with the largest spread.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectralHash {
    name: String,
    nbits: usize,
    projector: PcaProjector,
    /// Bounding box of the projected training data, epsilon padded.
    lo: Array1<f32>,
    hi: Array1<f32>,
    /// One single-axis mode per key bit, `[nbits, npca]`.
    modes: Array2<f64>,
}

impl SpectralHash {
    /// Train basis and bounds from a stream of `[N, dim]` batches. The
    /// trainset closure is invoked twice: once for PCA, once for bounds.
    pub fn fit<F, I>(name: &str, dim: usize, nbits: usize, trainset: F) -> Result<Self>
    where
        F: Fn() -> I,
        I: IntoIterator<Item = Array2<f32>>,
    {
        let model = online_pca(trainset(), dim)?;
        SpectralHash::from_model(name, dim, nbits, &model, trainset)
    }

    /// Build from a cached [PcaModel]; only the bounds pass touches the
    /// training stream.
    pub fn from_model<F, I>(
        name: &str,
        dim: usize,
        nbits: usize,
        model: &PcaModel,
        trainset: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = Array2<f32>>,
    {
        check_nbits(nbits)?;
        if model.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: model.dim(),
            });
        }
        let projector = PcaProjector::from_model(model, nbits);
        let (lo, hi) = projected_bounds(&projector, trainset)?;
        SpectralHash::from_parts(name, dim, nbits, model, lo, hi)
    }

    /// Build from a cached model and cached bounds. `lo`/`hi` must be the
    /// pair produced by an earlier training run over the same model.
    pub fn from_parts(
        name: &str,
        dim: usize,
        nbits: usize,
        model: &PcaModel,
        lo: Array1<f32>,
        hi: Array1<f32>,
    ) -> Result<Self> {
        check_nbits(nbits)?;
        let projector = PcaProjector::from_model(model, nbits);
        if lo.len() != projector.npca() || hi.len() != projector.npca() {
            return Err(Error::DimensionMismatch {
                expected: projector.npca(),
                got: lo.len(),
            });
        }
        let modes = mode_table(&lo, &hi, nbits)?;
        Ok(SpectralHash {
            name: name.to_string(),
            nbits,
            projector,
            lo,
            hi,
            modes,
        })
    }

    /// Bounds pair for caching alongside the PCA model.
    pub fn bounds(&self) -> (ArrayView1<f32>, ArrayView1<f32>) {
        (self.lo.view(), self.hi.view())
    }

    pub fn modes(&self) -> ArrayView2<f64> {
        self.modes.view()
    }

    fn hash_row(&self, projection: ArrayView1<f32>) -> u64 {
        let npca = self.projector.npca();
        let mut key = 0u64;
        for k in 0..self.nbits {
            let mut f = 1.0f64;
            for i in 0..npca {
                // Ratio before the multiplication by pi keeps training
                // boundary points on exact sign boundaries.
                let span = self.hi[i] as f64 - self.lo[i] as f64;
                let t = self.modes[[k, i]] * (projection[i] as f64 - self.lo[i] as f64) / span;
                f *= (PI * (t + 0.5)).sin();
            }
            if f > 0.0 {
                key |= 1 << k;
            }
        }
        key
    }
}

impl BucketHash for SpectralHash {
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
        let projections = self.projector.project(v);
        let keys: Vec<u64> = projections
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.hash_row(row))
            .collect();
        Ok(Array1::from(keys))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn identity_model() -> PcaModel {
        PcaModel {
            mean: Array1::zeros(3),
            eigenvalues: array![1., 1., 1.],
            eigenvectors: Array2::eye(3),
        }
    }

    fn trainset() -> Array2<f32> {
        array![
            [1., 100., -5.],
            [4., 0., 21.],
            [3.2, -10., -7.],
            [3., 17., 13.]
        ]
    }

    #[test]
    fn test_mode_table_three_bits() {
        let model = identity_model();
        let sh =
            SpectralHash::from_model("sh", 3, 3, &model, || vec![trainset()]).unwrap();
        let expected = array![[0., 1., 0.], [0., 2., 0.], [0., 3., 0.]];
        assert_eq!(sh.modes(), expected.view());
    }

    #[test]
    fn test_mode_table_six_bits() {
        let model = identity_model();
        let sh =
            SpectralHash::from_model("sh", 3, 6, &model, || vec![trainset()]).unwrap();
        let expected = array![
            [0., 1., 0.],
            [0., 2., 0.],
            [0., 3., 0.],
            [0., 0., 1.],
            [0., 4., 0.],
            [0., 5., 0.]
        ];
        assert_eq!(sh.modes(), expected.view());
    }

    #[test]
    fn test_golden_keys() {
        let model = identity_model();
        let sh =
            SpectralHash::from_model("sh", 3, 6, &model, || vec![trainset()]).unwrap();

        // Training bounds and two interpolations between them.
        let mn = [1.0f32, -10., -7.];
        let mx = [4.0f32, 100., 21.];
        let q = array![
            [mn[0], mn[1], mn[2]],
            [mx[0], mx[1], mx[2]],
            [1.9, 23., 1.4],  // 0.7 * mn + 0.3 * mx
            [3.1, 67., 12.6], // 0.3 * mn + 0.7 * mx
        ];
        let keys = sh.hash(q.view()).unwrap();
        assert_eq!(keys, array![63u64, 18, 9, 4]);
    }

    #[test]
    fn test_keys_in_range_and_deterministic() {
        let model = identity_model();
        let sh = SpectralHash::fit("sh", 3, 5, || vec![trainset()]).unwrap();
        let v = array![[0.3, 5., -2.], [2., 2., 2.]];
        let k1 = sh.hash(v.view()).unwrap();
        let k2 = sh.hash(v.view()).unwrap();
        assert_eq!(k1, k2);
        for &k in k1.iter() {
            assert!(k < 1 << 5);
        }
    }

    #[test]
    fn test_serialization_round_trip() {
        let model = identity_model();
        let sh =
            SpectralHash::from_model("sh", 3, 6, &model, || vec![trainset()]).unwrap();
        let blob = bincode::serialize(&sh).unwrap();
        let back: SpectralHash = bincode::deserialize(&blob).unwrap();
        let v = array![[1.5, 30., 0.]];
        assert_eq!(sh.hash(v.view()).unwrap(), back.hash(v.view()).unwrap());
    }

    #[test]
    fn test_cached_bounds_round_trip() {
        let model = identity_model();
        let sh =
            SpectralHash::from_model("sh", 3, 6, &model, || vec![trainset()]).unwrap();
        let (lo, hi) = sh.bounds();
        let rebuilt =
            SpectralHash::from_parts("sh", 3, 6, &model, lo.to_owned(), hi.to_owned()).unwrap();
        let v = array![[1.9, 23., 1.4]];
        assert_eq!(
            sh.hash(v.view()).unwrap(),
            rebuilt.hash(v.view()).unwrap()
        );
    }
}
