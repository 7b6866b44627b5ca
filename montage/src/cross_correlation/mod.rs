//! Spatial-domain cross correlation over a bounded displacement range.
//!
//! Every integer displacement whose overlap covers at least the requested
//! fraction of the smaller stripe is scored with the Pearson coefficient.
//! Worker threads pull displacement columns from a shared counter and merge
//! their best column result into a shared best-so-far.


use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use common::Buffer2;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::correlation::{overlap_correlation, CorrelationResult};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    r: f64,
    mx: i64,
    my: i64,
}

impl Candidate {
    // Ties go to the smallest (mx, my) so the outcome does not depend on scheduling.
    fn beats(&self, other: &Candidate) -> bool {
        self.r > other.r || (self.r == other.r && (self.mx, self.my) < (other.mx, other.my))
    }
}

/// Cross-correlation matcher.
#[derive(Debug, Clone)]
pub struct CrossCorrelationMatcher {
    min_r: f64,
}

impl CrossCorrelationMatcher {
    /// `min_r` is the phase-correlation threshold; cross correlation accepts half of it.
    pub fn new(min_r: f64) -> Self {
        Self { min_r }
    }

    /// Register `moving` against `base`, requiring the overlap to span at least
    /// `x_fraction` / `y_fraction` of the smaller stripe's width / height.
    ///
    /// The displacement is the position of `moving`'s origin in `base`'s frame.
    pub fn correlate(
        &self,
        base: &Buffer2<f32>,
        moving: &Buffer2<f32>,
        x_fraction: f64,
        y_fraction: f64,
        cancel: &CancelToken,
    ) -> Result<CorrelationResult> {
        if base.is_empty() || moving.is_empty() {
            return Ok(CorrelationResult::Failed);
        }

        let (w1, h1) = (base.width() as i64, base.height() as i64);
        let (w2, h2) = (moving.width() as i64, moving.height() as i64);
        let min_border_w = ((w1.min(w2) as f64 * x_fraction + 0.5) as i64).max(1);
        let min_border_h = ((h1.min(h2) as f64 * y_fraction + 0.5) as i64).max(1);

        // base(x, y) is compared with moving(x + mx, y + my).
        let mx_range = (-w1 + min_border_w)..(w2 - min_border_w);
        let my_range = (-h1 + min_border_h)..(h2 - min_border_h);
        if mx_range.is_empty() || my_range.is_empty() {
            return Ok(CorrelationResult::Failed);
        }

        let next_column = AtomicI64::new(mx_range.start);
        let cancelled = AtomicBool::new(false);
        let best: Mutex<Option<Candidate>> = Mutex::new(None);

        (0..rayon::current_num_threads())
            .into_par_iter()
            .for_each(|_| loop {
                let mx = next_column.fetch_add(1, Ordering::Relaxed);
                if mx >= mx_range.end || cancelled.load(Ordering::Relaxed) {
                    break;
                }
                if cancel.is_cancelled() {
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }

                let mut column_best: Option<Candidate> = None;
                for my in my_range.clone() {
                    let Some(r) = overlap_correlation(base, moving, -mx, -my).r else {
                        continue;
                    };
                    let candidate = Candidate { r, mx, my };
                    if column_best.is_none_or(|b| candidate.beats(&b)) {
                        column_best = Some(candidate);
                    }
                }

                if let Some(candidate) = column_best {
                    let mut shared = best.lock();
                    if shared.is_none_or(|b| candidate.beats(&b)) {
                        *shared = Some(candidate);
                    }
                }
            });

        if cancelled.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let result = match best.into_inner() {
            None => CorrelationResult::Failed,
            Some(Candidate { r, mx, my }) => {
                let score = r.clamp(-1.0, 1.0);
                let (dx, dy) = (-mx as f64, -my as f64);
                if score > self.min_r / 2.0 {
                    CorrelationResult::Success { dx, dy, score }
                } else {
                    CorrelationResult::LowConfidence { dx, dy, score }
                }
            }
        };
        tracing::trace!(?result, "Cross correlation");
        Ok(result)
    }
}
