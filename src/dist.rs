//! Distance functions scoring candidates against a query.
use crate::constants::PATCH;
use ndarray::prelude::*;

/// A pure scorer `(query, candidates) -> scores`, one score per candidate
/// row. Smaller should mean closer. Every distance names the stored
/// attribute it wants fed to it, normally the patch attribute.
pub trait Distance {
    /// Stored attribute this distance is computed over.
    fn attribute(&self) -> &str;
    /// Score `[M, D]` candidates against a `[D]` query.
    fn eval(&self, query: ArrayView1<f32>, candidates: ArrayView2<f32>) -> Array1<f32>;
}

/// Root mean squared difference per candidate.
pub struct EuclideanDistance {
    attribute: String,
}

impl EuclideanDistance {
    pub fn new() -> Self {
        EuclideanDistance {
            attribute: PATCH.to_string(),
        }
    }

    pub fn over(attribute: &str) -> Self {
        EuclideanDistance {
            attribute: attribute.to_string(),
        }
    }
}

impl Default for EuclideanDistance {
    fn default() -> Self {
        EuclideanDistance::new()
    }
}

impl Distance for EuclideanDistance {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn eval(&self, query: ArrayView1<f32>, candidates: ArrayView2<f32>) -> Array1<f32> {
        let diff = &candidates - &query;
        diff.mapv(|x| x * x)
            .mean_axis(Axis(1))
            .expect("candidate rows have at least one column")
            .mapv(f32::sqrt)
    }
}

/// Pearson correlation between query and candidates. Higher means more
/// alike; combine with a threshold filter accordingly.
///
/// Correlation is undefined for constant-valued inputs; those score NaN,
/// which the supplied filters rank behind every real score.
pub struct CorrelationDistance {
    attribute: String,
}

impl CorrelationDistance {
    pub fn new() -> Self {
        CorrelationDistance {
            attribute: PATCH.to_string(),
        }
    }
}

impl Default for CorrelationDistance {
    fn default() -> Self {
        CorrelationDistance::new()
    }
}

fn mean_std(x: ArrayView1<f32>) -> (f32, f32) {
    let n = x.len() as f32;
    let mean = x.sum() / n;
    let var = x.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, var.sqrt())
}

impl Distance for CorrelationDistance {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn eval(&self, query: ArrayView1<f32>, candidates: ArrayView2<f32>) -> Array1<f32> {
        let (q_mean, q_std) = mean_std(query);
        let q_norm = query.mapv(|x| (x - q_mean) / q_std);

        candidates
            .axis_iter(Axis(0))
            .map(|row| {
                let (mean, std) = mean_std(row);
                row.iter()
                    .zip(q_norm.iter())
                    .map(|(&c, &q)| ((c - mean) / std) * q)
                    .sum::<f32>()
                    / row.len() as f32
            })
            .collect()
    }
}
