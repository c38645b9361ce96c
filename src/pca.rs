//! Streamed principal component analysis.
//!
//! Consumes a training stream in one pass, accumulating the mean and
//! comoment matrix in f64, then eigendecomposes the covariance. The
//! resulting [PcaModel] is what the PCA based hashers project with.
use crate::error::{Error, Result};
use crate::utils::Timer;
use itertools::Itertools;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// The persisted outcome of a PCA training run.
///
/// Eigenvalues are sorted descending; eigenvectors are the matching columns.
/// The mean is kept in f32 as it is applied to f32 vectors, the basis in f64.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaModel {
    pub mean: Array1<f32>,
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
}

impl PcaModel {
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Serialize to a file with bincode. Round-trips exactly.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let blob = bincode::serialize(self)?;
        let mut f = File::create(path)?;
        f.write_all(&blob)?;
        Ok(())
    }

    /// Deserialize from a file written by [save](PcaModel::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut f = File::open(path)?;
        let mut buf: Vec<u8> = vec![];
        f.read_to_end(&mut buf)?;
        let model = bincode::deserialize(&buf)?;
        Ok(model)
    }
}

/// Train a [PcaModel] over a stream of `[N, dim]` batches.
///
/// Single pass: the mean and comoment matrix are updated per batch, so the
/// stream never has to fit in memory at once.
pub fn online_pca<I>(stream: I, dim: usize) -> Result<PcaModel>
where
    I: IntoIterator<Item = Array2<f32>>,
{
    let _t = Timer::new("pca training");
    let mut total = 0usize;
    let mut mean = Array1::<f64>::zeros(dim);
    let mut comoment = Array2::<f64>::zeros((dim, dim));

    for batch in stream {
        if batch.ncols() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: batch.ncols(),
            });
        }
        if batch.nrows() == 0 {
            continue;
        }
        let batch = batch.mapv(|x| x as f64);
        total += batch.nrows();
        let last_mean = mean.clone();
        mean = &mean + &((&batch - &mean).sum_axis(Axis(0)) / total as f64);
        comoment = comoment + (&batch - &mean).t().dot(&(&batch - &last_mean));
    }

    if total < 2 {
        return Err(Error::Failed(
            "pca training needs at least two vectors".to_string(),
        ));
    }

    let cov = comoment / (total - 1) as f64;
    let (eigenvalues, eigenvectors) = symmetric_eigen(cov);

    // Descending variance order.
    let order: Vec<usize> = (0..dim)
        .sorted_by(|&i, &j| eigenvalues[j].partial_cmp(&eigenvalues[i]).unwrap())
        .collect();
    let eigenvalues = Array1::from(order.iter().map(|&i| eigenvalues[i]).collect::<Vec<_>>());
    let eigenvectors = eigenvectors.select(Axis(1), &order);

    Ok(PcaModel {
        mean: mean.mapv(|x| x as f32),
        eigenvalues,
        eigenvectors,
    })
}

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns unsorted eigenvalues and eigenvectors as columns.
fn symmetric_eigen(mut a: Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..100 {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off.sqrt() <= 1e-14 * n as f64 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_owned(), v)
}
