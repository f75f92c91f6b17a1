//! User-supplied target density callables and sample evaluation.
//!
//! The prior, likelihood and negative log-likelihood are independently
//! assignable; at least one of likelihood/negLogLikelihood must be present
//! before a run starts. The engine prefers the negative log-likelihood
//! internally so it never exponentiates large magnitudes.

use std::sync::Arc;

use crate::params::ParameterConfig;
use crate::sample::Sample;

/// A shared density callable over a point in parameter space.
pub type TargetFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// The target density of a run: prior, likelihood, negative log-likelihood.
#[derive(Clone, Default)]
pub struct TargetDensity {
    prior: Option<TargetFn>,
    likelihood: Option<TargetFn>,
    neg_log_likelihood: Option<TargetFn>,
}

impl TargetDensity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prior. When absent, the prior is 1 inside the limits.
    pub fn with_prior(mut self, f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        self.prior = Some(Arc::new(f));
        self
    }

    pub fn with_likelihood(mut self, f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        self.likelihood = Some(Arc::new(f));
        self
    }

    pub fn with_neg_log_likelihood(
        mut self,
        f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.neg_log_likelihood = Some(Arc::new(f));
        self
    }

    /// True iff a likelihood or a negative log-likelihood is set.
    pub fn has_target(&self) -> bool {
        self.likelihood.is_some() || self.neg_log_likelihood.is_some()
    }

    /// Evaluates the density at `values`.
    ///
    /// Returns an invalid sample (prior 0) when the point lies outside the
    /// parameter limits, the prior vanishes, the likelihood is not strictly
    /// positive, or any callable returns NaN. Invalid candidates are valid
    /// rejections downstream, never errors.
    pub fn evaluate(
        &self,
        params: &ParameterConfig,
        values: Vec<f64>,
        generation: u64,
    ) -> Sample {
        let mut sample = Sample::new(values);
        sample.generation = generation;

        if !params.is_inside_limits(&sample.values) {
            return sample;
        }

        let prior = match &self.prior {
            Some(f) => f(&sample.values),
            None => 1.0,
        };
        if !(prior > 0.0) {
            return sample;
        }

        if let Some(f) = &self.likelihood {
            let likelihood = f(&sample.values);
            if !(likelihood > 0.0) {
                return sample;
            }
            sample.likelihood = likelihood;
            sample.neg_log_likelihood = -likelihood.ln();
        } else if let Some(f) = &self.neg_log_likelihood {
            let nll = f(&sample.values);
            if nll.is_nan() {
                return sample;
            }
            sample.neg_log_likelihood = nll;
            sample.likelihood = (-nll).exp();
        } else {
            return sample;
        }

        sample.prior = prior;
        sample
    }
}

impl std::fmt::Debug for TargetDensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDensity")
            .field("prior", &self.prior.is_some())
            .field("likelihood", &self.likelihood.is_some())
            .field("neg_log_likelihood", &self.neg_log_likelihood.is_some())
            .finish()
    }
}
