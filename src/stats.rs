//! Chain storage, filtering, and summary statistics.
//!
//! The raw chain is a `(steps, walkers, dimensions)` array, append-only
//! while sampling and read-only afterward. Filtering discards burn-in
//! steps, thins the remainder, and optionally flattens walkers into a
//! single sample axis; statistics (mean, std, percentiles) operate on the
//! flattened form. Percentiles use linear interpolation between order
//! statistics.

use std::cmp::Ordering;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::error::{Result, SipError};

/// The outcome of one sampling run: the chain plus run diagnostics.
///
/// Created by a successful `fit()` and replaced wholesale by the next one.
#[derive(Debug, Clone)]
pub struct FitResult {
    chain: Array3<f64>,
    /// Per-walker fraction of accepted proposals.
    pub accept_fraction: Array1<f64>,
    /// The seed the run was started with.
    pub seed: u64,
}

impl FitResult {
    pub fn new(chain: Array3<f64>, accept_fraction: Array1<f64>, seed: u64) -> Self {
        Self {
            chain,
            accept_fraction,
            seed,
        }
    }

    pub fn n_steps(&self) -> usize {
        self.chain.shape()[0]
    }

    pub fn n_walkers(&self) -> usize {
        self.chain.shape()[1]
    }

    pub fn ndim(&self) -> usize {
        self.chain.shape()[2]
    }

    /// The raw, unfiltered chain.
    pub fn chain(&self) -> ArrayView3<f64> {
        self.chain.view()
    }

    /// Drops the first `discard` steps and keeps every `thin`-th step of
    /// the remainder (`discard`, `discard + thin`, ...).
    ///
    /// `discard >= n_steps` yields an empty chain; `thin = 0` is an
    /// invalid argument.
    pub fn get_chain(&self, discard: usize, thin: usize) -> Result<Array3<f64>> {
        if thin == 0 {
            return Err(SipError::InvalidArgument("thin must be >= 1".into()));
        }
        let start = discard.min(self.n_steps());
        Ok(self.chain.slice(s![start..;thin, .., ..]).to_owned())
    }

    /// Like [`get_chain`](Self::get_chain), flattened step-major to
    /// `(kept_steps * n_walkers, ndim)`. Zero samples is a valid result.
    pub fn get_flat_chain(&self, discard: usize, thin: usize) -> Result<Array2<f64>> {
        let filtered = self.get_chain(discard, thin)?;
        let (steps, walkers, ndim) = filtered.dim();
        Ok(filtered
            .into_shape_with_order((steps * walkers, ndim))
            .expect("filtered chain is contiguous"))
    }
}

/// Per-parameter mean over the sample axis of a flattened chain.
///
/// An empty chain yields NaN entries.
pub fn param_mean(chain: ArrayView2<f64>) -> Array1<f64> {
    let ndim = chain.ncols();
    chain
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::from_elem(ndim, f64::NAN))
}

/// Per-parameter population standard deviation over the sample axis.
pub fn param_std(chain: ArrayView2<f64>) -> Array1<f64> {
    if chain.nrows() == 0 {
        return Array1::from_elem(chain.ncols(), f64::NAN);
    }
    chain.std_axis(Axis(0), 0.0)
}

/// Per-parameter percentiles, shape `(len(ps), ndim)`.
///
/// Percentile ranks are in `[0, 100]`; an empty chain is rejected.
pub fn param_percentile(chain: ArrayView2<f64>, ps: &[f64]) -> Result<Array2<f64>> {
    if chain.nrows() == 0 {
        return Err(SipError::InvalidArgument(
            "cannot compute percentiles of an empty chain".into(),
        ));
    }
    check_percentiles(ps)?;
    let mut out = Array2::zeros((ps.len(), chain.ncols()));
    for (j, col) in chain.columns().into_iter().enumerate() {
        let sorted = sorted_copy(col);
        for (r, &p) in ps.iter().enumerate() {
            out[[r, j]] = percentile_of_sorted(&sorted, p);
        }
    }
    Ok(out)
}

/// Percentiles over a stack of model predictions, shape
/// `(len(ps), 2, n_freq)` for an input of shape `(samples, 2, n_freq)`.
pub fn prediction_percentile(preds: ArrayView3<f64>, ps: &[f64]) -> Result<Array3<f64>> {
    if preds.shape()[0] == 0 {
        return Err(SipError::InvalidArgument(
            "cannot compute percentiles of an empty prediction stack".into(),
        ));
    }
    check_percentiles(ps)?;
    let (_, parts, n) = preds.dim();
    let mut out = Array3::zeros((ps.len(), parts, n));
    for i in 0..parts {
        for k in 0..n {
            let sorted = sorted_copy(preds.slice(s![.., i, k]));
            for (r, &p) in ps.iter().enumerate() {
                out[[r, i, k]] = percentile_of_sorted(&sorted, p);
            }
        }
    }
    Ok(out)
}

fn check_percentiles(ps: &[f64]) -> Result<()> {
    for &p in ps {
        if !(0.0..=100.0).contains(&p) {
            return Err(SipError::InvalidArgument(format!(
                "percentile {p} is outside [0, 100]"
            )));
        }
    }
    Ok(())
}

fn sorted_copy(values: ArrayView1<f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().collect();
    v.sort_unstable_by(cmp_f64);
    v
}

/// Linear interpolation between order statistics, with `p` in `[0, 100]`.
fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Comparison for sorting f64 slices, treating NaN as greater than all
/// real values.
fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    if a.is_nan() {
        return Ordering::Greater;
    }
    if b.is_nan() {
        return Ordering::Less;
    }
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    /// Chain with chain[[s, w, 0]] = s and chain[[s, w, 1]] = w, so the
    /// provenance of every flattened row is recoverable.
    fn labeled_chain(steps: usize, walkers: usize) -> FitResult {
        let mut chain = Array3::zeros((steps, walkers, 2));
        for s in 0..steps {
            for w in 0..walkers {
                chain[[s, w, 0]] = s as f64;
                chain[[s, w, 1]] = w as f64;
            }
        }
        FitResult::new(chain, Array1::zeros(walkers), 0)
    }

    #[test]
    fn flat_chain_length_follows_discard_and_thin() {
        let fit = labeled_chain(5, 2);
        for (discard, thin, expected_steps) in [
            (0, 1, 5),
            (2, 1, 3),
            (1, 2, 2), // steps 1, 3
            (0, 2, 3), // steps 0, 2, 4
            (4, 3, 1),
            (5, 1, 0),
            (7, 3, 0),
        ] {
            let flat = fit.get_flat_chain(discard, thin).unwrap();
            assert_eq!(
                flat.nrows(),
                expected_steps * 2,
                "discard={discard} thin={thin}"
            );
            assert_eq!(flat.ncols(), 2);
        }
    }

    #[test]
    fn thin_keeps_every_nth_step_from_discard() {
        let fit = labeled_chain(5, 2);
        let kept = fit.get_chain(1, 2).unwrap();
        let steps: Vec<f64> = kept.slice(s![.., 0, 0]).to_vec();
        assert_eq!(steps, vec![1.0, 3.0]);
    }

    #[test]
    fn flatten_is_step_major() {
        let fit = labeled_chain(2, 2);
        let flat = fit.get_flat_chain(0, 1).unwrap();
        let rows: Vec<(f64, f64)> = flat.rows().into_iter().map(|r| (r[0], r[1])).collect();
        assert_eq!(rows, vec![(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)]);
    }

    #[test]
    fn zero_thin_is_invalid() {
        let fit = labeled_chain(3, 2);
        assert!(matches!(
            fit.get_chain(0, 0),
            Err(SipError::InvalidArgument(_))
        ));
    }

    #[test]
    fn mean_and_std_match_closed_form() {
        let chain = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let mean = param_mean(chain.view());
        let std = param_std(chain.view());
        assert_abs_diff_eq!(mean[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean[1], 4.0, epsilon = 1e-12);
        let expected = (8.0f64 / 3.0).sqrt();
        assert_abs_diff_eq!(std[0], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(std[1], expected, epsilon = 1e-12);
    }

    #[test]
    fn empty_chain_moments_are_nan() {
        let chain = Array2::<f64>::zeros((0, 3));
        assert!(param_mean(chain.view()).iter().all(|x| x.is_nan()));
        assert!(param_std(chain.view()).iter().all(|x| x.is_nan()));
    }

    #[test]
    fn percentiles_interpolate_linearly() {
        let chain = arr2(&[[1.0], [2.0], [3.0], [4.0]]);
        let q = param_percentile(chain.view(), &[0.0, 25.0, 50.0, 100.0]).unwrap();
        assert_abs_diff_eq!(q[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[[1, 0]], 1.75, epsilon = 1e-12);
        assert_abs_diff_eq!(q[[2, 0]], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(q[[3, 0]], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn percentile_validation() {
        let chain = arr2(&[[1.0], [2.0]]);
        assert!(param_percentile(chain.view(), &[101.0]).is_err());
        let empty = Array2::<f64>::zeros((0, 1));
        assert!(param_percentile(empty.view(), &[50.0]).is_err());
    }

    #[test]
    fn prediction_percentile_reduces_the_sample_axis() {
        let mut preds = Array3::zeros((3, 2, 2));
        for i in 0..3 {
            preds[[i, 0, 0]] = i as f64; // 0, 1, 2
            preds[[i, 1, 1]] = 2.0 * i as f64; // 0, 2, 4
        }
        let q = prediction_percentile(preds.view(), &[50.0]).unwrap();
        assert_eq!(q.shape(), &[1, 2, 2]);
        assert_abs_diff_eq!(q[[0, 0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[[0, 1, 1]], 2.0, epsilon = 1e-12);
    }
}
