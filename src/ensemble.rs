/*!
# Affine-invariant ensemble sampler

Runs `W` walkers through `S` steps against a [`Posterior`]. Each step
updates the ensemble in two halves: every walker in the active half
proposes a move relative to a randomly chosen walker from the complementary
half, and accepts or rejects it with a Metropolis-Hastings ratio corrected
for the proposal Jacobian. All walkers of a half are independent, so the
half-update can run on an injected rayon thread pool; a barrier at the end
of each step keeps the proposal geometry consistent.

The move strategy is pluggable through the [`Move`] trait; the default
[`StretchMove`] reproduces the classic Goodman & Weare stretch move with
scale `a = 2`.

Reproducibility follows the per-chain seeding scheme of the rest of the
crate: the global seed drives walker initialization, and walker `k` then
owns its own RNG seeded with `seed + 1 + k`, so results do not depend on
whether a worker pool is injected.
*/

use std::ops::Range;

use indicatif::ProgressBar;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2};
use rand::distributions::Uniform;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{Result, SipError};
use crate::models::ForwardModel;
use crate::posterior::Posterior;

/// A proposal strategy for one walker.
///
/// `propose` returns the candidate position together with the log of the
/// proposal-asymmetry factor to add to the acceptance ratio.
pub trait Move: Send + Sync {
    fn propose(
        &self,
        walker: ArrayView1<f64>,
        complement: ArrayView2<f64>,
        rng: &mut SmallRng,
    ) -> (Array1<f64>, f64);
}

/// The Goodman & Weare stretch move.
///
/// Draws `z` from g(z) proportional to 1/sqrt(z) on `[1/a, a]` and
/// stretches the walker toward a random member of the complementary half:
/// `Y = X_j + z * (X_k - X_j)`. The Jacobian correction is
/// `(D - 1) * ln z`.
#[derive(Debug, Clone, Copy)]
pub struct StretchMove {
    /// Stretch scale; must be > 1.
    pub a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

impl Move for StretchMove {
    fn propose(
        &self,
        walker: ArrayView1<f64>,
        complement: ArrayView2<f64>,
        rng: &mut SmallRng,
    ) -> (Array1<f64>, f64) {
        let u: f64 = rng.gen();
        let z = ((self.a - 1.0) * u + 1.0).powi(2) / self.a;
        let j = rng.gen_range(0..complement.nrows());
        let other = complement.row(j);
        let proposal = &other + &((&walker - &other) * z);
        let ln_factor = (walker.len() as f64 - 1.0) * z.ln();
        (proposal, ln_factor)
    }
}

/// The ensemble MCMC driver for one fit invocation.
///
/// Borrows the posterior (and through it the model and data), initializes
/// the walkers uniformly within the parameter bounds, and produces a chain
/// of shape `(steps, walkers, dimensions)`.
pub struct EnsembleSampler<'a, M: ForwardModel> {
    posterior: Posterior<'a, M>,
    move_policy: &'a dyn Move,
    pool: Option<&'a rayon::ThreadPool>,
    n_walkers: usize,
    ndim: usize,
    positions: Array2<f64>,
    log_probs: Array1<f64>,
    rngs: Vec<SmallRng>,
    accepted: Vec<u64>,
    steps_run: usize,
}

impl<'a, M: ForwardModel> std::fmt::Debug for EnsembleSampler<'a, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleSampler")
            .field("n_walkers", &self.n_walkers)
            .field("ndim", &self.ndim)
            .field("steps_run", &self.steps_run)
            .finish_non_exhaustive()
    }
}

impl<'a, M: ForwardModel> EnsembleSampler<'a, M> {
    /// Creates the sampler and initializes the ensemble.
    ///
    /// Walker starts are W x D independent uniform draws within the
    /// bounds. Fails with an invalid-argument error for an odd or
    /// non-positive walker count, and with a sampling error if every
    /// walker's posterior is `-inf` at initialization.
    pub fn new(
        posterior: Posterior<'a, M>,
        lower: ArrayView1<f64>,
        upper: ArrayView1<f64>,
        n_walkers: usize,
        move_policy: &'a dyn Move,
        pool: Option<&'a rayon::ThreadPool>,
        seed: u64,
    ) -> Result<Self> {
        if n_walkers < 2 || n_walkers % 2 != 0 {
            return Err(SipError::InvalidArgument(format!(
                "n_walkers must be a positive even number, got {n_walkers}"
            )));
        }
        let ndim = lower.len();

        let mut seed_rng = SmallRng::seed_from_u64(seed);
        let dists: Vec<Uniform<f64>> = lower
            .iter()
            .zip(upper.iter())
            .map(|(&lo, &hi)| Uniform::new(lo, hi))
            .collect();
        let mut positions = Array2::zeros((n_walkers, ndim));
        for k in 0..n_walkers {
            for (d, dist) in dists.iter().enumerate() {
                positions[[k, d]] = seed_rng.sample(*dist);
            }
        }

        let mut log_probs = Array1::zeros(n_walkers);
        for k in 0..n_walkers {
            let theta = positions.row(k);
            log_probs[k] = posterior.log_prob(theta.as_slice().expect("row is contiguous"))?;
        }
        if log_probs.iter().all(|lp| !lp.is_finite()) {
            return Err(SipError::Sampling(
                "posterior is -inf for every initial walker; \
                 check the parameter bounds against the data"
                    .into(),
            ));
        }

        let rngs = (0..n_walkers)
            .map(|k| SmallRng::seed_from_u64(seed + 1 + k as u64))
            .collect();

        Ok(Self {
            posterior,
            move_policy,
            pool,
            n_walkers,
            ndim,
            positions,
            log_probs,
            rngs,
            accepted: vec![0; n_walkers],
            steps_run: 0,
        })
    }

    /// Runs `n_steps` steps and returns the chain, shape
    /// `(n_steps, n_walkers, ndim)`.
    pub fn run(&mut self, n_steps: usize, progress: Option<&ProgressBar>) -> Result<Array3<f64>> {
        let half = self.n_walkers / 2;
        let mut chain = Array3::zeros((n_steps, self.n_walkers, self.ndim));
        if let Some(pb) = progress {
            pb.set_length(n_steps as u64);
        }
        for step in 0..n_steps {
            self.update_half(0..half, half..self.n_walkers)?;
            self.update_half(half..self.n_walkers, 0..half)?;
            // End-of-step barrier: the next step's proposals see this
            // step's completed positions.
            chain.slice_mut(s![step, .., ..]).assign(&self.positions);
            self.steps_run += 1;
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
        Ok(chain)
    }

    /// Per-walker fraction of accepted proposals over the steps run.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        let denom = self.steps_run.max(1) as f64;
        Array1::from_iter(self.accepted.iter().map(|&a| a as f64 / denom))
    }

    fn update_half(&mut self, active: Range<usize>, complement: Range<usize>) -> Result<()> {
        let comp = self.positions.slice(s![complement, ..]).to_owned();
        let act = self.positions.slice(s![active.clone(), ..]).to_owned();
        let lps: Vec<f64> = active.clone().map(|k| self.log_probs[k]).collect();
        let mv = self.move_policy;
        let posterior = &self.posterior;

        let step_walker = |(i, rng): (usize, &mut SmallRng)| -> Result<Option<(Array1<f64>, f64)>> {
            let (proposal, ln_factor) = mv.propose(act.row(i), comp.view(), rng);
            let lp =
                posterior.log_prob(proposal.as_slice().expect("proposal is contiguous"))?;
            let log_accept = ln_factor + lp - lps[i];
            let u: f64 = rng.gen();
            if log_accept > u.ln() {
                Ok(Some((proposal, lp)))
            } else {
                Ok(None)
            }
        };

        let rngs = &mut self.rngs[active.clone()];
        let updates: Result<Vec<Option<(Array1<f64>, f64)>>> = match self.pool {
            Some(pool) => {
                pool.install(|| rngs.par_iter_mut().enumerate().map(step_walker).collect())
            }
            None => rngs.iter_mut().enumerate().map(step_walker).collect(),
        };

        for (i, update) in updates?.into_iter().enumerate() {
            if let Some((proposal, lp)) = update {
                let k = active.start + i;
                self.positions.row_mut(k).assign(&proposal);
                self.log_probs[k] = lp;
                self.accepted[k] += 1;
            }
        }
        Ok(())
    }
}
