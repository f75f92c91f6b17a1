/*!
# Algorithm driver

The driver owns everything a run shares: the [`ParameterConfig`], the target
density callables, the writers and the run lengths. A concrete sampler
implements [`Algorithm`] and supplies chain construction and advancement; the
provided [`Algorithm::run`] method orchestrates the cycle loop:

1. log every chain's starting point,
2. advance all chains in cycles (the last cycle may be short),
3. after each cycle stream every new sample to every writer, chain-major,
4. log the latest sample of every chain at each 5% progress increment,
5. finalize: per-chain diagnostics, then cross-chain R-hat over the last
   half of the samples.

Cancellation is cooperative: the stop flag is checked at the top of each
cycle and short-circuits to finalization on the collected samples.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::io::Writer;
use crate::params::ParameterConfig;
use crate::sample::{Chain, Sample};
use crate::stats::{self, ChainStats};
use crate::target::TargetDensity;

pub const DEFAULT_TOTAL_LENGTH: usize = 1_000_000;
pub const DEFAULT_CYCLE_LENGTH: usize = 50;

/// Lifecycle of a sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unconfigured,
    Initialized,
    Running,
    Finalized,
}

/// Shared configuration and collaborators of a run.
pub struct AlgorithmConfig {
    pub parameters: ParameterConfig,
    pub target: TargetDensity,
    /// Number of samples to produce per chain.
    pub total_length: usize,
    /// Steps per cycle; clamped to `[1, total_length]` at initialization.
    pub cycle_length: usize,
    /// Display an indicatif progress bar while running.
    pub show_progress: bool,
    pub(crate) writers: Vec<Box<dyn Writer>>,
    pub(crate) phase: Phase,
    stop: Arc<AtomicBool>,
}

impl AlgorithmConfig {
    pub fn new(parameters: ParameterConfig, target: TargetDensity) -> Self {
        Self {
            parameters,
            target,
            total_length: DEFAULT_TOTAL_LENGTH,
            cycle_length: DEFAULT_CYCLE_LENGTH,
            show_progress: false,
            writers: Vec::new(),
            phase: Phase::Unconfigured,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_writer(&mut self, writer: impl Writer + 'static) {
        self.writers.push(Box::new(writer));
    }

    /// Cooperative cancellation flag; set it to true to stop the run at the
    /// next cycle boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Evaluates the target density at `values` (see the sample evaluation
    /// rules on [`TargetDensity::evaluate`]).
    pub fn evaluate(&self, values: Vec<f64>, generation: u64) -> Sample {
        self.target.evaluate(&self.parameters, values, generation)
    }

    pub(crate) fn prepare(&mut self) -> Result<()> {
        self.parameters.validate()?;
        if !self.target.has_target() {
            return Err(Error::MissingTarget);
        }
        self.cycle_length = self.cycle_length.clamp(1, self.total_length.max(1));
        Ok(())
    }
}

/// A sampling algorithm driven in cycles.
pub trait Algorithm {
    fn config(&self) -> &AlgorithmConfig;
    fn config_mut(&mut self) -> &mut AlgorithmConfig;

    /// Builds the chain state for a fresh run.
    fn initialize(&mut self) -> Result<()>;

    /// Advances every chain by `n_steps`.
    fn advance(&mut self, n_steps: usize);

    fn number_of_chains(&self) -> usize;

    /// The reported chain at `index`.
    fn chain(&self, index: usize) -> &Chain;

    /// Runs the full lifecycle: initialize, advance in cycles with streaming
    /// output and progress logging, then finalize.
    fn run(&mut self) -> Result<()>
    where
        Self: Sized,
    {
        self.config_mut().prepare()?;
        self.initialize()?;
        self.config_mut().phase = Phase::Running;

        // Writers are detached while the loop borrows chains immutably.
        let mut writers = std::mem::take(&mut self.config_mut().writers);
        let outcome = drive(self, &mut writers);
        self.config_mut().writers = writers;
        if let Err(err) = &outcome {
            error!(error = %err, "run aborted");
        }
        outcome?;

        self.finalize()?;
        self.config_mut().phase = Phase::Finalized;
        info!("MCMC run finished");
        Ok(())
    }

    /// Logs per-chain diagnostics and the cross-chain R-hat over the last
    /// half of the samples (burn-in discard).
    fn finalize(&mut self) -> Result<()>
    where
        Self: Sized,
    {
        for index in 0..self.number_of_chains() {
            let chain = self.chain(index);
            let stats = ChainStats::new(chain);
            info!(chain = index, "diagnostics for chain {index}:");
            info!(chain = index, acceptance_rate = stats.acceptance_rate());
            if let Some(mode) = stats.mode() {
                info!(chain = index, mode = %mode);
            }
            info!(chain = index, mean = ?stats.mean().to_vec());
            for parameter in 0..stats.dim() {
                if let Some(median) = stats.median(parameter) {
                    info!(chain = index, parameter = parameter, median = %median);
                }
            }
            info!(chain = index, variance = ?stats.variance().to_vec());
            info!(chain = index, error = ?stats.error().to_vec());
            info!(chain = index, rms = ?stats.rms().to_vec());
            info!(chain = index, autocorrelation_time = ?stats.autocorrelation_time().to_vec());
        }

        let chains: Vec<&Chain> = (0..self.number_of_chains())
            .map(|index| self.chain(index))
            .collect();
        let half: Vec<ChainStats<'_>> = chains
            .iter()
            .map(|chain| ChainStats::over(chain, chain.len() / 2..chain.len()))
            .collect();
        let rhat = stats::rubin_gelman(&half);
        info!(rhat = ?rhat.to_vec(), max = stats::max_rhat(&rhat), "Rubin-Gelman R-hat over the last half");
        Ok(())
    }
}

fn drive<A: Algorithm>(algo: &mut A, writers: &mut [Box<dyn Writer>]) -> Result<()> {
    let total = algo.config().total_length;
    let cycle_length = algo.config().cycle_length;
    let n_chains = algo.number_of_chains();
    let stop = algo.config().stop_flag();

    for writer in writers.iter_mut() {
        writer.initialize(n_chains, &algo.config().parameters)?;
    }

    for index in 0..n_chains {
        if let Some(sample) = algo.chain(index).last() {
            info!(chain = index, start = %sample, "starting point");
        }
    }

    let progress = algo.config().show_progress.then(|| {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .expect("static progress template")
                .progress_chars("##-"),
        );
        bar
    });

    let mut written = vec![0usize; n_chains];
    // Initialization already produced the generation-0 samples.
    let mut produced = (0..n_chains)
        .map(|index| algo.chain(index).len())
        .max()
        .unwrap_or(0)
        .min(total);
    flush_new_samples(algo, writers, &mut written)?;
    if let Some(bar) = &progress {
        bar.inc(produced as u64);
    }

    let mut next_percent = 5u64;
    while produced < total {
        if stop.load(Ordering::Relaxed) {
            info!("stop requested; finalizing on the collected samples");
            break;
        }

        let steps = cycle_length.min(total - produced);
        algo.advance(steps);
        produced += steps;
        flush_new_samples(algo, writers, &mut written)?;
        if let Some(bar) = &progress {
            bar.inc(steps as u64);
        }

        let percent = produced as u64 * 100 / total.max(1) as u64;
        if percent >= next_percent {
            for index in 0..n_chains {
                if let Some(sample) = algo.chain(index).last() {
                    info!(chain = index, step = produced, percent = percent, latest = %sample);
                }
            }
            next_percent = (percent / 5 + 1) * 5;
        }
    }

    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }
    for writer in writers.iter_mut() {
        writer.finalize()?;
    }
    Ok(())
}

/// Streams every not-yet-written sample to every writer, chain-major,
/// preserving insertion order within a chain.
fn flush_new_samples<A: Algorithm>(
    algo: &A,
    writers: &mut [Box<dyn Writer>],
    written: &mut [usize],
) -> Result<()> {
    for index in 0..algo.number_of_chains() {
        let chain = algo.chain(index);
        if written[index] < chain.len() {
            for writer in writers.iter_mut() {
                writer.write(index, chain, written[index])?;
            }
            written[index] = chain.len();
        }
    }
    Ok(())
}
