/*!
# Inversion service

[`Inversion`] composes a [`ForwardModel`] with one measurement set and a
sampler configuration, runs the ensemble sampler, and owns the resulting
chain. The chain-consuming accessors take a [`ChainSelect`] that either
filters the stored chain with discard/thin settings or operates on an
explicit pre-flattened chain; supplying both at once is rejected.

# Examples

```rust
use sip_mcmc::data::{PhaseUnit, SipData};
use sip_mcmc::inversion::{ChainSelect, Inversion, InversionConfig};
use sip_mcmc::models::ColeCole;

let rows = [
    [1.0, 1.0, -20.0, 0.01, 2.0],
    [10.0, 0.95, -50.0, 0.01, 2.0],
    [100.0, 0.9, -30.0, 0.01, 2.0],
];
let data = SipData::from_records(&rows, PhaseUnit::Mrad)?;

let config = InversionConfig {
    n_walkers: 8,
    n_steps: 50,
    seed: Some(42),
    progress: false,
    ..Default::default()
};
let mut inv = Inversion::new(ColeCole::new(1), data, config)?;
inv.fit()?;

let means = inv.get_param_mean(ChainSelect::burn_in(25))?;
assert_eq!(means.len(), inv.ndim());
# Ok::<(), sip_mcmc::error::SipError>(())
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{s, Array1, Array2, Array3};
use rand::{thread_rng, Rng};

use crate::data::SipData;
use crate::ensemble::{EnsembleSampler, Move, StretchMove};
use crate::error::{Result, SipError};
use crate::models::ForwardModel;
use crate::posterior::Posterior;
use crate::stats::{self, FitResult};

/// Sampler configuration shared by every model variant.
pub struct InversionConfig {
    /// Number of ensemble walkers; must be positive and even.
    pub n_walkers: usize,
    /// Number of sampler steps per fit.
    pub n_steps: usize,
    /// Seed for reproducible runs; a random seed is drawn when absent.
    pub seed: Option<u64>,
    /// Optional worker pool for the per-step walker evaluations.
    pub pool: Option<rayon::ThreadPool>,
    /// Proposal strategy; the stretch move with a = 2 when absent.
    pub move_policy: Option<Box<dyn Move>>,
    /// Whether to render a progress bar while sampling.
    pub progress: bool,
}

impl Default for InversionConfig {
    fn default() -> Self {
        Self {
            n_walkers: 32,
            n_steps: 5000,
            seed: None,
            pool: None,
            move_policy: None,
            progress: true,
        }
    }
}

/// Selects the samples a chain-consuming accessor operates on: either the
/// stored chain filtered by discard/thin, or an explicit flat chain.
#[derive(Debug, Clone, Default)]
pub struct ChainSelect {
    pub chain: Option<Array2<f64>>,
    pub discard: Option<usize>,
    pub thin: Option<usize>,
}

impl ChainSelect {
    /// The full stored chain, no burn-in removed.
    pub fn full() -> Self {
        Self::default()
    }

    /// Discard the first `discard` steps.
    pub fn burn_in(discard: usize) -> Self {
        Self {
            discard: Some(discard),
            ..Self::default()
        }
    }

    /// Discard and thin the stored chain.
    pub fn thinned(discard: usize, thin: usize) -> Self {
        Self {
            discard: Some(discard),
            thin: Some(thin),
            ..Self::default()
        }
    }

    /// Operate on an explicit pre-flattened chain.
    pub fn explicit(chain: Array2<f64>) -> Self {
        Self {
            chain: Some(chain),
            ..Self::default()
        }
    }
}

/// Fits a forward model to one measurement set and exposes the posterior
/// sample statistics.
pub struct Inversion<M: ForwardModel> {
    model: M,
    data: SipData,
    config: InversionConfig,
    result: Option<FitResult>,
}

impl<M: ForwardModel> std::fmt::Debug for Inversion<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inversion")
            .field("has_result", &self.result.is_some())
            .finish_non_exhaustive()
    }
}

impl<M: ForwardModel> Inversion<M> {
    /// Validates the configuration and binds the model to the data.
    pub fn new(model: M, data: SipData, config: InversionConfig) -> Result<Self> {
        if config.n_walkers < 2 || config.n_walkers % 2 != 0 {
            return Err(SipError::InvalidArgument(format!(
                "n_walkers must be a positive even number, got {}",
                config.n_walkers
            )));
        }
        if config.n_steps == 0 {
            return Err(SipError::InvalidArgument(
                "n_steps must be positive".into(),
            ));
        }
        Ok(Self {
            model,
            data,
            config,
            result: None,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable model access, e.g. for editing parameter bounds between
    /// fits.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn data(&self) -> &SipData {
        &self.data
    }

    /// Ordered parameter names.
    pub fn param_names(&self) -> Vec<&str> {
        self.model.params().names()
    }

    /// Ordered `(lower, upper)` bound arrays, validated.
    pub fn param_bounds(&self) -> Result<(Array1<f64>, Array1<f64>)> {
        self.model.params().bounds_arrays()
    }

    pub fn ndim(&self) -> usize {
        self.model.ndim()
    }

    /// Whether the last `fit()` call completed successfully.
    pub fn fitted(&self) -> bool {
        self.result.is_some()
    }

    /// The stored fit result.
    pub fn result(&self) -> Result<&FitResult> {
        self.result.as_ref().ok_or(SipError::NotFitted)
    }

    /// Runs the ensemble sampler against the posterior.
    ///
    /// Bound validation happens before any state is touched, so a bad
    /// parameter spec leaves an existing fit result in place. Once
    /// sampling starts the previous result is dropped; it is replaced
    /// only when the run finishes.
    pub fn fit(&mut self) -> Result<()> {
        let (lower, upper) = self.model.params().bounds_arrays()?;
        if self.config.n_walkers < 2 * lower.len() {
            log::warn!(
                "n_walkers = {} is below 2 * ndim = {}; stretch proposals may mix poorly",
                self.config.n_walkers,
                2 * lower.len()
            );
        }
        self.result = None;

        let seed = self.config.seed.unwrap_or_else(|| thread_rng().gen());
        let default_move = StretchMove::default();
        let move_policy: &dyn Move = self
            .config
            .move_policy
            .as_deref()
            .unwrap_or(&default_move);

        let posterior = Posterior::new(&self.model, lower.view(), upper.view(), &self.data);
        let mut sampler = EnsembleSampler::new(
            posterior,
            lower.view(),
            upper.view(),
            self.config.n_walkers,
            move_policy,
            self.config.pool.as_ref(),
            seed,
        )?;

        let pb = if self.config.progress {
            let pb = ProgressBar::new(self.config.n_steps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("##-"),
            );
            pb.set_prefix("Sampling");
            Some(pb)
        } else {
            None
        };

        let chain = sampler.run(self.config.n_steps, pb.as_ref())?;
        if let Some(pb) = &pb {
            pb.finish_with_message("Done!");
        }
        let accept_fraction = sampler.acceptance_fraction();
        self.result = Some(FitResult::new(chain, accept_fraction, seed));
        Ok(())
    }

    /// Filtered chain of shape `(kept_steps, n_walkers, ndim)`.
    pub fn get_chain(&self, discard: usize, thin: usize) -> Result<Array3<f64>> {
        self.result()?.get_chain(discard, thin)
    }

    /// Filtered chain flattened to `(kept_steps * n_walkers, ndim)`.
    pub fn get_flat_chain(&self, discard: usize, thin: usize) -> Result<Array2<f64>> {
        self.result()?.get_flat_chain(discard, thin)
    }

    /// Per-parameter means of the selected samples.
    pub fn get_param_mean(&self, select: ChainSelect) -> Result<Array1<f64>> {
        let chain = self.parse_chain(select)?;
        Ok(stats::param_mean(chain.view()))
    }

    /// Per-parameter standard deviations of the selected samples.
    pub fn get_param_std(&self, select: ChainSelect) -> Result<Array1<f64>> {
        let chain = self.parse_chain(select)?;
        Ok(stats::param_std(chain.view()))
    }

    /// Per-parameter percentiles, shape `(len(ps), ndim)`.
    pub fn get_param_percentile(&self, ps: &[f64], select: ChainSelect) -> Result<Array2<f64>> {
        let chain = self.parse_chain(select)?;
        stats::param_percentile(chain.view(), ps)
    }

    /// Percentiles of the model predictions over the selected samples,
    /// shape `(len(ps), 2, n_freq)`.
    ///
    /// Re-evaluates the forward model at every retained sample, so the
    /// cost grows with `samples * n_freq`.
    pub fn get_model_percentile(&self, ps: &[f64], select: ChainSelect) -> Result<Array3<f64>> {
        let chain = self.parse_chain(select)?;
        let n = self.data.len();
        let mut preds = Array3::zeros((chain.nrows(), 2, n));
        for (i, row) in chain.rows().into_iter().enumerate() {
            let theta = row.to_vec();
            let pred = self.model.forward(&theta, self.data.w.view())?;
            preds.slice_mut(s![i, .., ..]).assign(&pred);
        }
        stats::prediction_percentile(preds.view(), ps)
    }

    /// Resolves a [`ChainSelect`] into a flat chain, enforcing the
    /// either/or contract between an explicit chain and discard/thin.
    fn parse_chain(&self, select: ChainSelect) -> Result<Array2<f64>> {
        if let Some(chain) = select.chain {
            if select.discard.is_some() || select.thin.is_some() {
                return Err(SipError::InvalidArgument(
                    "pass either an explicit flat chain or discard/thin settings, not both"
                        .into(),
                ));
            }
            return Ok(chain);
        }
        if select.discard.is_none() && select.thin.is_none() {
            log::warn!(
                "no samples were discarded from the chain; \
                 pass discard/thin to drop burn-in and reduce autocorrelation"
            );
        }
        self.result()?
            .get_flat_chain(select.discard.unwrap_or(0), select.thin.unwrap_or(1))
    }
}
