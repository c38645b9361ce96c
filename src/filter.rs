//! Filters reducing a score vector to the candidate indices worth keeping.
use itertools::Itertools;
use ndarray::prelude::*;
use std::cmp::Ordering;

/// A pure function from scores to the indices to keep, in the order they
/// should be yielded. Filters compose left to right; each one sees the
/// scores surviving the previous one.
pub trait Filter {
    fn keep(&self, dist: ArrayView1<f32>) -> Vec<usize>;

    /// The candidate count this filter aims for, if it has one. The engine
    /// uses the first filter's target to detect under-filled buckets.
    fn target(&self) -> Option<usize> {
        None
    }
}

/// Total order on scores. NaN ranks behind every real score, so degenerate
/// candidates (e.g. a constant patch under correlation) drop out of a top-K
/// instead of panicking the sort.
fn score_cmp(a: f32, b: f32) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering,
        None => a.is_nan().cmp(&b.is_nan()),
    }
}

fn argsort(dist: ArrayView1<f32>) -> Vec<usize> {
    (0..dist.len())
        .sorted_by(|&i, &j| score_cmp(dist[i], dist[j]))
        .collect()
}

/// Keeps the `k` candidates with the smallest scores, sorted ascending.
pub struct NearestFilter {
    pub k: usize,
}

impl NearestFilter {
    pub fn new(k: usize) -> Self {
        NearestFilter { k }
    }
}

impl Filter for NearestFilter {
    fn keep(&self, dist: ArrayView1<f32>) -> Vec<usize> {
        let mut indices = argsort(dist);
        indices.truncate(self.k);
        indices
    }

    fn target(&self) -> Option<usize> {
        Some(self.k)
    }
}

/// Keeps candidates scoring at or below a threshold, in input order.
pub struct DistanceThresholdFilter {
    pub threshold: f32,
}

impl DistanceThresholdFilter {
    pub fn new(threshold: f32) -> Self {
        DistanceThresholdFilter { threshold }
    }
}

impl Filter for DistanceThresholdFilter {
    fn keep(&self, dist: ArrayView1<f32>) -> Vec<usize> {
        dist.iter()
            .enumerate()
            .filter(|(_, &d)| d <= self.threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Keeps everything, sorted by ascending score.
pub struct SortedFilter;

impl Filter for SortedFilter {
    fn keep(&self, dist: ArrayView1<f32>) -> Vec<usize> {
        argsort(dist)
    }
}
