/*!
# Forward models for SIP spectra

A forward model maps a parameter vector and an angular-frequency array to a
predicted normalized impedance spectrum, returned as a `(2, N)` array with
row 0 the real part and row 1 the imaginary part. Models own their fixed
hyperparameters (polynomial degree, mode count, kernel exponent,
precomputed relaxation-time grids) and an ordered [`ParamSpec`] that fixes
the layout of the parameter vector.

Two variants are provided:

- [`PolynomialDecomposition`]: a dense relaxation-time decomposition whose
  chargeability distribution is a polynomial in `log10(tau)`, with a fixed
  kernel exponent (0.5 Warburg-like, 1.0 Debye-like).
- [`ColeCole`]: a generalized Cole-Cole model with `n_modes` additive
  relaxation modes.

# Examples

```rust
use ndarray::array;
use sip_mcmc::models::{ColeCole, ForwardModel};

let model = ColeCole::new(1);
assert_eq!(model.ndim(), 4); // r0, m1, log_tau1, c1

let w = array![0.1, 1.0, 10.0];
let pred = model.forward(&[1.0, 0.5, -1.0, 0.6], w.view()).unwrap();
assert_eq!(pred.shape(), &[2, 3]);
```
*/

use std::f64::consts::FRAC_PI_2;

use ndarray::{Array1, Array2, ArrayView1};
use num_complex::Complex64;

use crate::error::{Result, SipError};

/// An ordered mapping of parameter name to `[lower, upper]` bounds.
///
/// Insertion order fixes the parameter-vector layout for the model's
/// lifetime; re-inserting an existing name updates its bounds in place
/// without moving it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSpec {
    entries: Vec<(String, [f64; 2])>,
}

impl ParamSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter, or updates its bounds if the name exists.
    pub fn push(&mut self, name: impl Into<String>, bounds: [f64; 2]) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = bounds;
        } else {
            self.entries.push((name, bounds));
        }
    }

    /// Updates the bounds of an existing parameter.
    pub fn set(&mut self, name: &str, bounds: [f64; 2]) -> Result<()> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => {
                entry.1 = bounds;
                Ok(())
            }
            None => Err(SipError::InvalidArgument(format!(
                "unknown parameter `{name}`"
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<[f64; 2]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| *b)
    }

    /// Parameter names in vector order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the `(lower, upper)` bound arrays in vector order, rejecting
    /// any entry with `lower >= upper`.
    pub fn bounds_arrays(&self) -> Result<(Array1<f64>, Array1<f64>)> {
        for (name, [lo, hi]) in &self.entries {
            if !(lo < hi) {
                return Err(SipError::InvalidArgument(format!(
                    "parameter `{name}`: lower bound {lo} must be < upper bound {hi}"
                )));
            }
        }
        let lower = Array1::from_iter(self.entries.iter().map(|(_, b)| b[0]));
        let upper = Array1::from_iter(self.entries.iter().map(|(_, b)| b[1]));
        Ok((lower, upper))
    }
}

/// A forward model predicting a normalized impedance spectrum.
///
/// Implementations must be pure: `forward` reads only the model's fixed
/// hyperparameters, so concurrent evaluation across walkers is safe.
/// `forward` performs no bounds checking; parameter vectors outside the
/// feasible region produce mathematically valid output.
pub trait ForwardModel: Send + Sync {
    /// The ordered parameter specification.
    fn params(&self) -> &ParamSpec;

    /// Mutable access for editing bounds between fits.
    fn params_mut(&mut self) -> &mut ParamSpec;

    /// Dimensionality of the parameter vector.
    fn ndim(&self) -> usize {
        self.params().len()
    }

    /// Predicted normalized impedance, shape `(2, N)` for `N` angular
    /// frequencies. A `theta` of the wrong length is a shape error.
    fn forward(&self, theta: &[f64], w: ArrayView1<f64>) -> Result<Array2<f64>>;
}

fn check_theta(theta: &[f64], ndim: usize) -> Result<()> {
    if theta.len() != ndim {
        return Err(SipError::Shape {
            name: "theta",
            expected: ndim,
            actual: theta.len(),
        });
    }
    Ok(())
}

/// `(i * x)^c` on the principal branch, for `x > 0`.
fn im_pow(x: f64, c: f64) -> Complex64 {
    Complex64::from_polar(x.powf(c), FRAC_PI_2 * c)
}

/// Relaxation-time decomposition with a polynomial chargeability
/// distribution in `log10(tau)`.
///
/// The relaxation-time grid spans
/// `[floor(min(log10(1/w)) - 1), floor(max(log10(1/w)) + 1)]` with `2N`
/// log-spaced points, so it is fixed by the measurement frequencies at
/// construction. Parameters are the scale `r0` followed by one polynomial
/// coefficient per degree, highest degree first (`a{D}`, ..., `a0`),
/// matching the precomputed basis rows.
#[derive(Debug, Clone)]
pub struct PolynomialDecomposition {
    poly_deg: usize,
    c_exp: f64,
    taus: Array1<f64>,
    /// Basis matrix, shape `(poly_deg + 1, n_tau)`; row `i` holds
    /// `log_tau^(poly_deg - i)`.
    basis: Array2<f64>,
    params: ParamSpec,
}

impl PolynomialDecomposition {
    /// Builds the decomposition for the angular frequencies `w` with the
    /// given polynomial degree and kernel exponent (0.5 Warburg, 1.0
    /// Debye).
    pub fn new(w: ArrayView1<f64>, poly_deg: usize, c_exp: f64) -> Self {
        let log_inv_w = w.mapv(|x| (1.0 / x).log10());
        let min_tau = (log_inv_w.iter().fold(f64::INFINITY, |a, &b| a.min(b)) - 1.0).floor();
        let max_tau = (log_inv_w.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) + 1.0).floor();
        let n_tau = 2 * w.len();
        let log_tau = Array1::linspace(min_tau, max_tau, n_tau);

        let mut basis = Array2::zeros((poly_deg + 1, n_tau));
        for (i, deg) in (0..=poly_deg).rev().enumerate() {
            for (j, &lt) in log_tau.iter().enumerate() {
                basis[[i, j]] = lt.powi(deg as i32);
            }
        }
        let taus = log_tau.mapv(|lt| 10f64.powf(lt));

        let mut params = ParamSpec::new();
        params.push("r0", [0.9, 1.1]);
        for deg in (0..=poly_deg).rev() {
            params.push(format!("a{deg}"), [-1.0, 1.0]);
        }

        Self {
            poly_deg,
            c_exp,
            taus,
            basis,
            params,
        }
    }

    pub fn poly_deg(&self) -> usize {
        self.poly_deg
    }

    pub fn c_exp(&self) -> f64 {
        self.c_exp
    }

    /// The precomputed relaxation-time grid.
    pub fn taus(&self) -> ArrayView1<f64> {
        self.taus.view()
    }
}

impl ForwardModel for PolynomialDecomposition {
    fn params(&self) -> &ParamSpec {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSpec {
        &mut self.params
    }

    fn forward(&self, theta: &[f64], w: ArrayView1<f64>) -> Result<Array2<f64>> {
        check_theta(theta, self.ndim())?;
        let r0 = theta[0];
        // Polynomial weight per grid point: coefficients (highest degree
        // first) against the matching basis rows.
        let coeffs = ArrayView1::from(&theta[1..]);
        let weights = coeffs.dot(&self.basis);

        let mut out = Array2::zeros((2, w.len()));
        for (k, &wk) in w.iter().enumerate() {
            let mut acc = Complex64::new(0.0, 0.0);
            for (&tau, &wt) in self.taus.iter().zip(weights.iter()) {
                let denom = Complex64::new(1.0, 0.0) + im_pow(wk * tau, self.c_exp);
                acc += denom.inv().scale(wt);
            }
            out[[0, k]] = r0 * acc.re;
            out[[1, k]] = r0 * acc.im;
        }
        Ok(out)
    }
}

/// Generalized Cole-Cole model with `n_modes` additive relaxation modes.
///
/// The parameter vector is `r0`, then the chargeabilities `m1..mk`, then
/// `log_tau1..log_tauk`, then the exponents `c1..ck`.
#[derive(Debug, Clone)]
pub struct ColeCole {
    n_modes: usize,
    params: ParamSpec,
}

impl ColeCole {
    /// Builds a Cole-Cole model with `n_modes >= 1` relaxation modes.
    pub fn new(n_modes: usize) -> Self {
        let mut params = ParamSpec::new();
        params.push("r0", [0.9, 1.1]);
        for i in 1..=n_modes {
            params.push(format!("m{i}"), [0.0, 1.0]);
        }
        for i in 1..=n_modes {
            params.push(format!("log_tau{i}"), [-20.0, 10.0]);
        }
        for i in 1..=n_modes {
            params.push(format!("c{i}"), [0.0, 1.0]);
        }
        Self { n_modes, params }
    }

    pub fn n_modes(&self) -> usize {
        self.n_modes
    }
}

impl ForwardModel for ColeCole {
    fn params(&self) -> &ParamSpec {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSpec {
        &mut self.params
    }

    fn forward(&self, theta: &[f64], w: ArrayView1<f64>) -> Result<Array2<f64>> {
        check_theta(theta, self.ndim())?;
        let k = self.n_modes;
        let r0 = theta[0];
        let m = &theta[1..1 + k];
        let log_tau = &theta[1 + k..1 + 2 * k];
        let c = &theta[1 + 2 * k..1 + 3 * k];
        let taus: Vec<f64> = log_tau.iter().map(|&lt| 10f64.powf(lt)).collect();

        let mut out = Array2::zeros((2, w.len()));
        for (j, &wj) in w.iter().enumerate() {
            let mut z = Complex64::new(1.0, 0.0);
            for i in 0..k {
                let denom = Complex64::new(1.0, 0.0) + im_pow(wj * taus[i], c[i]);
                z -= (Complex64::new(1.0, 0.0) - denom.inv()).scale(m[i]);
            }
            out[[0, j]] = r0 * z.re;
            out[[1, j]] = r0 * z.im;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn param_spec_preserves_order_and_updates_in_place() {
        let mut spec = ParamSpec::new();
        spec.push("r0", [0.9, 1.1]);
        spec.push("m1", [0.0, 1.0]);
        spec.push("r0", [0.5, 1.5]);
        assert_eq!(spec.names(), vec!["r0", "m1"]);
        assert_eq!(spec.get("r0"), Some([0.5, 1.5]));
        assert!(spec.set("nope", [0.0, 1.0]).is_err());
    }

    #[test]
    fn bounds_arrays_reject_degenerate_entries() {
        let mut spec = ParamSpec::new();
        spec.push("r0", [0.9, 1.1]);
        spec.push("m1", [0.5, 0.5]);
        let err = spec.bounds_arrays().unwrap_err();
        assert!(err.to_string().contains("m1"), "got: {err}");
    }

    #[test]
    fn cole_cole_parameter_layout() {
        let model = ColeCole::new(2);
        assert_eq!(model.ndim(), 7);
        assert_eq!(
            model.params().names(),
            vec!["r0", "m1", "m2", "log_tau1", "log_tau2", "c1", "c2"]
        );
    }

    #[test]
    fn cole_cole_zero_chargeability_is_flat() {
        let model = ColeCole::new(1);
        let w = array![0.1, 1.0, 100.0];
        let pred = model.forward(&[1.0, 0.0, -3.0, 0.5], w.view()).unwrap();
        for j in 0..3 {
            assert_abs_diff_eq!(pred[[0, j]], 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(pred[[1, j]], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cole_cole_single_debye_mode_matches_analytic_value() {
        // c = 1 makes the mode a plain Debye relaxation, computable by hand:
        // Z = r0 * (1 - m * (1 - 1/(1 + i*w*tau))).
        let model = ColeCole::new(1);
        let w = array![2.0];
        let (r0, m, log_tau) = (1.0, 0.5, -0.5);
        let tau = 10f64.powf(log_tau);
        let pred = model.forward(&[r0, m, log_tau, 1.0], w.view()).unwrap();

        let iwt = Complex64::new(0.0, 2.0 * tau);
        let z = r0
            * (Complex64::new(1.0, 0.0)
                - (Complex64::new(1.0, 0.0) - (Complex64::new(1.0, 0.0) + iwt).inv()).scale(m));
        assert_abs_diff_eq!(pred[[0, 0]], z.re, epsilon = 1e-12);
        assert_abs_diff_eq!(pred[[1, 0]], z.im, epsilon = 1e-12);
    }

    #[test]
    fn decomposition_grid_spans_the_frequency_band() {
        // w = [1.0] -> log10(1/w) = 0 -> grid [-1, 1] with 2 points.
        let w = array![1.0];
        let model = PolynomialDecomposition::new(w.view(), 0, 1.0);
        let taus = model.taus();
        assert_eq!(taus.len(), 2);
        assert_abs_diff_eq!(taus[0], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(taus[1], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn degree_zero_decomposition_matches_hand_computed_reference() {
        let w = array![1.0];
        let model = PolynomialDecomposition::new(w.view(), 0, 1.0);
        assert_eq!(model.params().names(), vec!["r0", "a0"]);

        let (r0, a0) = (2.0, 0.5);
        let pred = model.forward(&[r0, a0], w.view()).unwrap();
        // Grid taus = [0.1, 10]; kernel 1/(1 + i*w*tau) at w = 1.
        let k1 = (Complex64::new(1.0, 0.1)).inv();
        let k2 = (Complex64::new(1.0, 10.0)).inv();
        let expected = (k1 + k2).scale(r0 * a0);
        assert_abs_diff_eq!(pred[[0, 0]], expected.re, epsilon = 1e-12);
        assert_abs_diff_eq!(pred[[1, 0]], expected.im, epsilon = 1e-12);
    }

    #[test]
    fn decomposition_coefficients_are_high_degree_first() {
        let w = array![1.0];
        let model = PolynomialDecomposition::new(w.view(), 1, 1.0);
        assert_eq!(model.params().names(), vec!["r0", "a1", "a0"]);

        // With only a1 set, the weight at log_tau = -1 is -a1 and at
        // log_tau = +1 it is +a1.
        let pred_a1 = model.forward(&[1.0, 1.0, 0.0], w.view()).unwrap();
        let k1 = (Complex64::new(1.0, 0.1)).inv();
        let k2 = (Complex64::new(1.0, 10.0)).inv();
        let expected = k2 - k1;
        assert_abs_diff_eq!(pred_a1[[0, 0]], expected.re, epsilon = 1e-12);
        assert_abs_diff_eq!(pred_a1[[1, 0]], expected.im, epsilon = 1e-12);
    }

    #[test]
    fn forward_is_finite_inside_bounds_for_both_variants() {
        let w = Array1::linspace(0.1, 1000.0, 20);
        let cc = ColeCole::new(2);
        let thetas = [
            vec![0.901, 0.001, 0.999, -19.9, 9.9, 0.001, 0.999],
            vec![1.099, 0.5, 0.5, -3.0, 2.0, 0.5, 0.5],
        ];
        for theta in &thetas {
            let pred = cc.forward(theta, w.view()).unwrap();
            assert!(pred.iter().all(|v| v.is_finite()), "theta {theta:?}");
        }

        let pd = PolynomialDecomposition::new(w.view(), 4, 0.5);
        let thetas = [
            vec![0.901, -0.999, 0.999, -0.999, 0.999, -0.999],
            vec![1.099, 0.1, -0.1, 0.1, -0.1, 0.1],
        ];
        for theta in &thetas {
            let pred = pd.forward(theta, w.view()).unwrap();
            assert!(pred.iter().all(|v| v.is_finite()), "theta {theta:?}");
        }
    }

    #[test]
    fn wrong_theta_length_is_a_shape_error() {
        let model = ColeCole::new(1);
        let w = array![1.0];
        let err = model.forward(&[1.0, 0.5], w.view()).unwrap_err();
        match err {
            SipError::Shape {
                expected, actual, ..
            } => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("expected shape error, got {other}"),
        }
    }
}
