//! Brute-force Hamming matcher.

use crate::brief::{hamming, Descriptor};
use panocam::prelude::v1::*;

/// Find the `k` nearest train descriptors of every query descriptor.
///
/// Equal distances are ordered by train index.
pub fn knn(query: &[Descriptor], train: &[Descriptor], k: usize) -> Vec<Vec<KnnMatch>> {
    query
        .iter()
        .enumerate()
        .map(|(qi, q)| {
            let mut best: Vec<KnnMatch> = Vec::with_capacity(k + 1);

            for (ti, t) in train.iter().enumerate() {
                let distance = hamming(q, t) as f32;

                if best.len() == k && best.last().map(|m| distance >= m.distance).unwrap_or(true) {
                    continue;
                }

                let pos = best.partition_point(|m| m.distance <= distance);
                best.insert(
                    pos,
                    KnnMatch {
                        query: qi,
                        train: ti,
                        distance,
                    },
                );
                best.truncate(k);
            }

            best
        })
        .collect()
}
