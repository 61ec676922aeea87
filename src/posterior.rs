//! Log-prior, log-likelihood, and log-posterior evaluation.
//!
//! The prior is flat inside the parameter hyper-box (strictly exclusive at
//! the boundary) and `-inf` outside. The likelihood assumes independent
//! Gaussian residuals per real/imaginary component with the propagated
//! measurement errors as known standard deviations; the constant `ln(2*pi)`
//! term is dropped, so only relative posterior values are meaningful.

use ndarray::{ArrayView1, ArrayView2, Zip};

use crate::data::SipData;
use crate::error::Result;
use crate::models::ForwardModel;

/// Flat box prior: 0.0 if `lower < theta < upper` elementwise (strict),
/// else `-inf`.
pub fn log_prior(theta: &[f64], lower: ArrayView1<f64>, upper: ArrayView1<f64>) -> f64 {
    let inside = theta
        .iter()
        .zip(lower.iter().zip(upper.iter()))
        .all(|(&t, (&lo, &hi))| lo < t && t < hi);
    if inside {
        0.0
    } else {
        f64::NEG_INFINITY
    }
}

/// The target density for one model and one measurement set.
///
/// Borrows the model and data for a single fit invocation; evaluation is
/// read-only and safe to share across parallel walkers.
pub struct Posterior<'a, M: ForwardModel> {
    model: &'a M,
    lower: ArrayView1<'a, f64>,
    upper: ArrayView1<'a, f64>,
    w: ArrayView1<'a, f64>,
    y: ArrayView2<'a, f64>,
    y_err: ArrayView2<'a, f64>,
}

impl<'a, M: ForwardModel> Posterior<'a, M> {
    pub fn new(
        model: &'a M,
        lower: ArrayView1<'a, f64>,
        upper: ArrayView1<'a, f64>,
        data: &'a SipData,
    ) -> Self {
        Self {
            model,
            lower,
            upper,
            w: data.w.view(),
            y: data.zn.view(),
            y_err: data.zn_err.view(),
        }
    }

    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        log_prior(theta, self.lower, self.upper)
    }

    /// Gaussian log-likelihood with known per-point standard deviations:
    /// `-0.5 * sum((y - f(theta))^2 / sigma^2 + ln(sigma^2))`.
    pub fn log_likelihood(&self, theta: &[f64]) -> Result<f64> {
        let pred = self.model.forward(theta, self.w)?;
        let mut acc = 0.0;
        Zip::from(&self.y)
            .and(&pred)
            .and(&self.y_err)
            .for_each(|&y, &f, &e| {
                let sigma2 = e * e;
                let r = y - f;
                acc += r * r / sigma2 + sigma2.ln();
            });
        Ok(-0.5 * acc)
    }

    /// Log-posterior; short-circuits to `-inf` outside the prior box
    /// without evaluating the forward model.
    pub fn log_prob(&self, theta: &[f64]) -> Result<f64> {
        let lp = self.log_prior(theta);
        if !lp.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(lp + self.log_likelihood(theta)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PhaseUnit;
    use crate::models::ColeCole;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn tiny_data() -> SipData {
        SipData::from_records(
            &[[1.0, 1.0, -100.0, 0.01, 5.0], [10.0, 0.8, -200.0, 0.01, 5.0]],
            PhaseUnit::Mrad,
        )
        .unwrap()
    }

    #[test]
    fn prior_is_boundary_exclusive() {
        let lower = array![0.0, -1.0];
        let upper = array![1.0, 1.0];
        assert_eq!(log_prior(&[0.5, 0.0], lower.view(), upper.view()), 0.0);
        assert_eq!(
            log_prior(&[0.0, 0.0], lower.view(), upper.view()),
            f64::NEG_INFINITY
        );
        assert_eq!(
            log_prior(&[0.5, 1.0], lower.view(), upper.view()),
            f64::NEG_INFINITY
        );
        assert_eq!(
            log_prior(&[1.5, 0.0], lower.view(), upper.view()),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn likelihood_matches_direct_summation() {
        let data = tiny_data();
        let model = ColeCole::new(1);
        let (lower, upper) = model.params().bounds_arrays().unwrap();
        let post = Posterior::new(&model, lower.view(), upper.view(), &data);

        let theta = [1.0, 0.5, -2.0, 0.5];
        let pred = model.forward(&theta, data.w.view()).unwrap();
        let mut expected = 0.0;
        for i in 0..2 {
            for k in 0..data.len() {
                let sigma2 = data.zn_err[[i, k]].powi(2);
                let r = data.zn[[i, k]] - pred[[i, k]];
                expected += r * r / sigma2 + sigma2.ln();
            }
        }
        expected *= -0.5;
        assert_abs_diff_eq!(
            post.log_likelihood(&theta).unwrap(),
            expected,
            epsilon = 1e-10
        );
    }

    #[test]
    fn log_prob_short_circuits_outside_bounds() {
        let data = tiny_data();
        let model = ColeCole::new(1);
        let (lower, upper) = model.params().bounds_arrays().unwrap();
        let post = Posterior::new(&model, lower.view(), upper.view(), &data);

        // m outside [0, 1]: the forward model is never consulted.
        let lp = post.log_prob(&[1.0, 1.5, -2.0, 0.5]).unwrap();
        assert_eq!(lp, f64::NEG_INFINITY);

        let inside = post.log_prob(&[1.0, 0.5, -2.0, 0.5]).unwrap();
        assert!(inside.is_finite());
    }
}
