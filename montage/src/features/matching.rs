use rayon::prelude::*;

use super::extract::FeatureDescriptor;

/// Nearest-neighbour descriptor matching with a distance-ratio test.
///
/// A feature of `a` is matched to its nearest neighbour in `b` when
/// `nearest * ratio < second_nearest`. Targets claimed by more than one
/// source are dropped. Returns `(index_in_a, index_in_b)` pairs in `a` order.
pub fn match_descriptors(
    a: &[FeatureDescriptor],
    b: &[FeatureDescriptor],
    ratio: f64,
) -> Vec<(usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }

    let candidates: Vec<Option<(usize, usize)>> = a
        .par_iter()
        .enumerate()
        .map(|(i, fa)| {
            let mut best = (f32::INFINITY, usize::MAX);
            let mut second = f32::INFINITY;
            for (j, fb) in b.iter().enumerate() {
                let d = fa.distance(fb);
                if d < best.0 {
                    second = best.0;
                    best = (d, j);
                } else if d < second {
                    second = d;
                }
            }
            ((best.0 as f64) * ratio < second as f64).then_some((i, best.1))
        })
        .collect();

    let mut claims = vec![0usize; b.len()];
    for &(_, j) in candidates.iter().flatten() {
        claims[j] += 1;
    }

    candidates
        .into_iter()
        .flatten()
        .filter(|&(_, j)| claims[j] == 1)
        .collect()
}
