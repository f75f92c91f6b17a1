/*!
# Chain diagnostics

[`ChainStats`] computes per-chain summaries over a contiguous index range:
acceptance rate, mean, mode, per-parameter medians, variance, RMS, standard
error, the autocorrelation function and its integrated time. The
[`rubin_gelman`] potential-scale-reduction factor compares several chains.

An empty range yields zero-valued diagnostics and a WARN log entry, never a
panic.
*/

use ndarray::{Array1, Array2, Axis};
use ndarray_stats::QuantileExt;
use std::ops::Range;
use tracing::warn;

use crate::sample::{Chain, Sample};

/// Per-chain diagnostics over a sample range.
pub struct ChainStats<'a> {
    samples: &'a [Sample],
    values: Array2<f64>,
    accepted: usize,
}

impl<'a> ChainStats<'a> {
    /// Diagnostics over the full chain.
    pub fn new(chain: &'a Chain) -> Self {
        Self::over(chain, 0..chain.len())
    }

    /// Diagnostics over `chain[range]`. The range is clamped to the chain
    /// length.
    pub fn over(chain: &'a Chain, range: Range<usize>) -> Self {
        let end = range.end.min(chain.len());
        let start = range.start.min(end);
        let samples = &chain.as_slice()[start..end];
        if samples.is_empty() {
            warn!("statistics over an empty sample range; all diagnostics are degenerate");
        }

        let n = samples.len();
        let dim = samples.first().map_or(0, |s| s.values.len());
        let flat: Vec<f64> = samples
            .iter()
            .flat_map(|s| s.values.iter().copied())
            .collect();
        let values =
            Array2::from_shape_vec((n, dim), flat).expect("samples of one chain share a dimension");
        let accepted = samples.iter().filter(|s| s.accepted).count();

        Self {
            samples,
            values,
            accepted,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of parameters (0 for an empty range).
    pub fn dim(&self) -> usize {
        self.values.ncols()
    }

    /// Fraction of accepted steps in the range, in [0, 1].
    pub fn acceptance_rate(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.accepted as f64 / self.samples.len() as f64
        }
    }

    /// Componentwise arithmetic mean.
    pub fn mean(&self) -> Array1<f64> {
        self.values
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.dim()))
    }

    /// The sample with minimal negative log-likelihood; ties break to the
    /// earliest index.
    pub fn mode(&self) -> Option<&Sample> {
        self.samples
            .iter()
            .min_by(|a, b| a.neg_log_likelihood.total_cmp(&b.neg_log_likelihood))
    }

    /// The chain element carrying the median value of parameter `param`
    /// (the lower of the two middles for even counts).
    pub fn median(&self, param: usize) -> Option<&Sample> {
        if self.samples.is_empty() || param >= self.dim() {
            return None;
        }
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.sort_by(|&a, &b| {
            self.samples[a].values[param].total_cmp(&self.samples[b].values[param])
        });
        let middle = order[(order.len() - 1) / 2];
        Some(&self.samples[middle])
    }

    /// Componentwise sample variance (n - 1 denominator). Zero for fewer
    /// than two samples.
    pub fn variance(&self) -> Array1<f64> {
        if self.samples.len() < 2 {
            return Array1::zeros(self.dim());
        }
        self.values.var_axis(Axis(0), 1.0)
    }

    /// Componentwise root mean square of the values.
    pub fn rms(&self) -> Array1<f64> {
        self.values
            .mapv(|v| v * v)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.dim()))
            .mapv(f64::sqrt)
    }

    /// Componentwise standard error, sqrt(variance / effective sample size).
    pub fn error(&self) -> Array1<f64> {
        if self.samples.is_empty() {
            return Array1::zeros(self.dim());
        }
        let variance = self.variance();
        let ess = self.effective_size();
        Array1::from_iter(
            variance
                .iter()
                .zip(ess.iter())
                .map(|(&v, &e)| if e > 0.0 { (v / e).sqrt() } else { 0.0 }),
        )
    }

    /// Componentwise autocorrelation at `lag`. Degenerate (constant or too
    /// short) parameters report 0.
    pub fn autocorrelation(&self, lag: usize) -> Array1<f64> {
        let n = self.samples.len();
        let mut rho = Array1::zeros(self.dim());
        if n == 0 || lag == 0 || lag >= n {
            return rho;
        }
        let mean = self.mean();
        for p in 0..self.dim() {
            let centered: Vec<f64> = self.values.column(p).iter().map(|v| v - mean[p]).collect();
            let denom: f64 = centered.iter().map(|c| c * c).sum();
            if denom > 0.0 {
                let num: f64 = centered[..n - lag]
                    .iter()
                    .zip(&centered[lag..])
                    .map(|(a, b)| a * b)
                    .sum();
                rho[p] = num / denom;
            }
        }
        rho
    }

    /// Componentwise integrated autocorrelation time,
    /// `tau = 1 + 2 * sum rho(k)`, summed over the initial positive sequence
    /// and capped at lag n/5.
    pub fn autocorrelation_time(&self) -> Array1<f64> {
        let n = self.samples.len();
        let mut tau = Array1::ones(self.dim());
        if n < 2 {
            return tau;
        }
        let mean = self.mean();
        let max_lag = n / 5;
        for p in 0..self.dim() {
            let centered: Vec<f64> = self.values.column(p).iter().map(|v| v - mean[p]).collect();
            let denom: f64 = centered.iter().map(|c| c * c).sum();
            if denom <= 0.0 {
                continue;
            }
            let mut sum = 0.0;
            for lag in 1..=max_lag {
                let num: f64 = centered[..n - lag]
                    .iter()
                    .zip(&centered[lag..])
                    .map(|(a, b)| a * b)
                    .sum();
                let rho = num / denom;
                if rho < 0.0 {
                    break;
                }
                sum += rho;
            }
            tau[p] = 1.0 + 2.0 * sum;
        }
        tau
    }

    /// Componentwise effective sample size, n / tau.
    pub fn effective_size(&self) -> Array1<f64> {
        let n = self.samples.len() as f64;
        self.autocorrelation_time().mapv(|tau| n / tau)
    }
}

/// Rubin-Gelman potential scale reduction factor across chains, per
/// parameter.
///
/// With m chains of (common) length n, within-chain variance W and
/// between-chain variance B, the estimate is
/// `sqrt((((n - 1) / n) W + B / n) / W)`. Fewer than two chains or fewer
/// than two samples per chain report 1, as does a parameter with W = 0.
pub fn rubin_gelman(chains: &[ChainStats<'_>]) -> Array1<f64> {
    let m = chains.len();
    if m == 0 {
        return Array1::zeros(0);
    }
    let dim = chains[0].dim();
    let n = chains.iter().map(ChainStats::len).min().unwrap_or(0);
    if m < 2 || n < 2 {
        return Array1::ones(dim);
    }

    let means: Vec<Array1<f64>> = chains.iter().map(ChainStats::mean).collect();
    let variances: Vec<Array1<f64>> = chains.iter().map(ChainStats::variance).collect();

    let mut rhat = Array1::ones(dim);
    for p in 0..dim {
        let within = variances.iter().map(|v| v[p]).sum::<f64>() / m as f64;
        if within <= 0.0 {
            continue;
        }
        let grand_mean = means.iter().map(|mu| mu[p]).sum::<f64>() / m as f64;
        let between = n as f64 / (m as f64 - 1.0)
            * means
                .iter()
                .map(|mu| (mu[p] - grand_mean).powi(2))
                .sum::<f64>();
        let variance = (n as f64 - 1.0) / n as f64 * within + between / n as f64;
        rhat[p] = (variance / within).sqrt();
    }
    rhat
}

/// Largest component of an R-hat vector; 1 for an empty vector.
pub fn max_rhat(rhat: &Array1<f64>) -> f64 {
    rhat.max().map(|v| *v).unwrap_or(1.0)
}
