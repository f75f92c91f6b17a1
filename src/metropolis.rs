/*!
# Metropolis-Hastings engine

[`MetropolisHastings`] advances one or more independent chains, each of which
may carry a ladder of tempered replicas at inverse temperatures
`1 = beta_0 > beta_1 > ... > 0`. Every replica owns its chain, its RNG stream
and its proposal kernel, so replicas can be advanced on separate threads
inside a cycle; swap proposals between adjacent replicas run on the driver
thread at cycle barriers.

The acceptance rule works in log space,

```text
log A = beta * (x.nll - y.nll) + ln y.prior - ln x.prior + log q-ratio
```

so the engine never exponentiates large magnitudes. A candidate outside the
parameter limits, with zero prior, or with an undefined likelihood is a valid
rejection, never an error.

## Example

```rust
use tempered_mcmc::algorithm::Algorithm;
use tempered_mcmc::metropolis::MetropolisHastings;
use tempered_mcmc::params::{Parameter, ParameterConfig};
use tempered_mcmc::target::TargetDensity;

let params = ParameterConfig::from(vec![
    Parameter::new("x", 0.0, 1.0).with_limits(-10.0, 10.0),
]);
let target = TargetDensity::new().with_neg_log_likelihood(|v| v[0] * v[0] / 2.0);

let mut sampler = MetropolisHastings::new(params, target);
sampler.set_total_length(1_000);
sampler.set_seed(42);
sampler.run().unwrap();
assert_eq!(sampler.chain(0).len(), 1_000);
```
*/

use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nalgebra::DMatrix;
use rand::Rng;
use rayon::prelude::*;
use tracing::warn;

use crate::algorithm::{Algorithm, AlgorithmConfig, Phase};
use crate::error::{Error, Result};
use crate::io::Writer;
use crate::params::ParameterConfig;
use crate::proposal::{GaussianProposal, Proposal};
use crate::random::RngStream;
use crate::sample::{Chain, Sample};
use crate::target::TargetDensity;

/// Steps between two parallel-tempering swap proposals.
pub const DEFAULT_PT_FREQUENCY: usize = 10;

enum ProposalSource {
    DiagonalFromScales,
    Covariance(DMatrix<f64>),
    Custom(Box<dyn Proposal>),
}

/// One tempered replica: chain, private RNG stream, inverse temperature,
/// owned proposal and step counters.
struct TemperedChain {
    chain: Chain,
    current: Sample,
    rng: RngStream,
    beta: f64,
    proposal: Box<dyn Proposal>,
    proposed: u64,
    accepted: u64,
}

impl TemperedChain {
    fn step(&mut self, target: &TargetDensity, params: &ParameterConfig) {
        let (values, log_q) = self.proposal.propose(&self.current, params, &mut self.rng);
        let generation = self.current.generation + 1;
        let mut candidate = target.evaluate(params, values, generation);
        self.proposed += 1;

        let log_accept = if candidate.is_valid() {
            self.beta * (self.current.neg_log_likelihood - candidate.neg_log_likelihood)
                + candidate.prior.ln()
                - self.current.prior.ln()
                + log_q
        } else {
            f64::NEG_INFINITY
        };

        // log A >= 0 accepts unconditionally; NaN falls through to reject.
        let accept = log_accept >= 0.0 || self.rng.uniform01().ln() < log_accept;
        if accept {
            candidate.accepted = true;
            self.accepted += 1;
            self.current = candidate;
        } else {
            self.current.generation = generation;
            self.current.accepted = false;
        }
        self.chain.push(self.current.clone());
    }

    fn advance(&mut self, target: &TargetDensity, params: &ParameterConfig, n_steps: usize) {
        for _ in 0..n_steps {
            self.step(target, params);
        }
    }
}

/// A ladder of tempered replicas sharing one reported chain (the `beta = 1`
/// replica) plus per-pair swap counters.
struct ChainSet {
    replicas: Vec<TemperedChain>,
    rng: RngStream,
    swaps_proposed: Vec<u64>,
    swaps_accepted: Vec<u64>,
    steps_since_swap: usize,
}

impl ChainSet {
    /// Sequential advancement with swap proposals interleaved every
    /// `pt_frequency` steps.
    fn advance(
        &mut self,
        target: &TargetDensity,
        params: &ParameterConfig,
        n_steps: usize,
        pt_frequency: usize,
    ) {
        for _ in 0..n_steps {
            for replica in &mut self.replicas {
                replica.step(target, params);
            }
            self.steps_since_swap += 1;
            if self.replicas.len() > 1 && self.steps_since_swap >= pt_frequency {
                self.steps_since_swap = 0;
                self.propose_swap();
            }
        }
    }

    /// Replica-parallel advancement; the swap budget is spent later at the
    /// cycle barrier via [`ChainSet::run_pending_swaps`].
    fn advance_parallel(&mut self, target: &TargetDensity, params: &ParameterConfig, n_steps: usize) {
        self.replicas
            .par_iter_mut()
            .for_each(|replica| replica.advance(target, params, n_steps));
        self.steps_since_swap += n_steps;
    }

    fn run_pending_swaps(&mut self, pt_frequency: usize) {
        if self.replicas.len() < 2 {
            self.steps_since_swap = 0;
            return;
        }
        while self.steps_since_swap >= pt_frequency {
            self.steps_since_swap -= pt_frequency;
            self.propose_swap();
        }
    }

    /// Proposes exchanging the current states of a uniformly chosen adjacent
    /// replica pair. Only the current states move; past history stays put.
    fn propose_swap(&mut self) {
        let n = self.replicas.len();
        if n < 2 {
            return;
        }
        let pair = self.rng.uniform_int(0, (n - 2) as u64) as usize;
        self.swaps_proposed[pair] += 1;

        let (left, right) = self.replicas.split_at_mut(pair + 1);
        let colder = &mut left[pair];
        let hotter = &mut right[0];
        let log_swap = (colder.beta - hotter.beta)
            * (colder.current.neg_log_likelihood - hotter.current.neg_log_likelihood);

        let accept = log_swap >= 0.0 || self.rng.uniform01().ln() < log_swap;
        if accept {
            self.swaps_accepted[pair] += 1;
            mem::swap(&mut colder.current, &mut hotter.current);
            // generation and accepted stay with their replica
            mem::swap(&mut colder.current.generation, &mut hotter.current.generation);
            mem::swap(&mut colder.current.accepted, &mut hotter.current.accepted);
        }
    }
}

/// The Metropolis-Hastings sampler with optional parallel tempering.
pub struct MetropolisHastings {
    config: AlgorithmConfig,
    betas: Vec<f64>,
    pt_frequency: usize,
    n_chains: usize,
    seed: u64,
    multi_threading: bool,
    randomize_start: bool,
    proposal: ProposalSource,
    chain_sets: Vec<ChainSet>,
}

impl MetropolisHastings {
    pub fn new(parameters: ParameterConfig, target: TargetDensity) -> Self {
        Self {
            config: AlgorithmConfig::new(parameters, target),
            betas: vec![1.0],
            pt_frequency: DEFAULT_PT_FREQUENCY,
            n_chains: 1,
            seed: rand::thread_rng().gen(),
            multi_threading: false,
            randomize_start: false,
            proposal: ProposalSource::DiagonalFromScales,
            chain_sets: Vec::new(),
        }
    }

    /// Number of samples to produce per chain.
    pub fn set_total_length(&mut self, total_length: usize) {
        self.config.total_length = total_length;
    }

    pub fn set_cycle_length(&mut self, cycle_length: usize) {
        self.config.cycle_length = cycle_length;
    }

    /// Number of independent chains (each with its own tempered ladder).
    pub fn set_number_of_chains(&mut self, n_chains: usize) {
        self.n_chains = n_chains.max(1);
    }

    /// Master seed; every replica derives its own stream from it.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn set_multi_threading(&mut self, enable: bool) {
        self.multi_threading = enable;
    }

    /// Draw each replica's start point from the proposal around the
    /// configured initial values (retrying until inside the limits).
    pub fn set_randomize_start_point(&mut self, enable: bool) {
        self.randomize_start = enable;
    }

    pub fn set_pt_frequency(&mut self, frequency: usize) {
        self.pt_frequency = frequency.max(1);
    }

    pub fn set_show_progress(&mut self, show: bool) {
        self.config.show_progress = show;
    }

    pub fn add_writer(&mut self, writer: impl Writer + 'static) {
        self.config.add_writer(writer);
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.config.stop_flag()
    }

    /// Inverse temperatures of the tempered ladder. Values outside (0, 1)
    /// are dropped, `beta = 1` is always present, and the ladder is sorted
    /// in descending order.
    pub fn set_betas(&mut self, betas: impl IntoIterator<Item = f64>) {
        let mut ladder = vec![1.0];
        ladder.extend(betas.into_iter().filter(|&beta| beta > 0.0 && beta < 1.0));
        ladder.sort_by(|a, b| b.total_cmp(a));
        self.betas = ladder;
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    /// Custom proposal kernel; cloned into every replica at initialization.
    pub fn set_proposal(&mut self, proposal: impl Proposal + 'static) {
        self.proposal = ProposalSource::Custom(Box::new(proposal));
    }

    /// Gaussian proposal from a full covariance matrix. A matrix that is not
    /// positive definite falls back to the diagonal proposal built from the
    /// parameter scales (logged at WARN); a size mismatch is a
    /// configuration error.
    pub fn set_proposal_covariance(&mut self, covariance: DMatrix<f64>) {
        self.proposal = ProposalSource::Covariance(covariance);
    }

    /// Acceptance fraction of the reported (`beta = 1`) replica of `chain`.
    pub fn acceptance_rate(&self, chain: usize) -> f64 {
        let replica = &self.chain_sets[chain].replicas[0];
        if replica.proposed == 0 {
            0.0
        } else {
            replica.accepted as f64 / replica.proposed as f64
        }
    }

    /// Fraction of accepted swaps between tempered replicas of `chain`.
    /// `pair` indexes an adjacent beta pair; `None` averages over all pairs.
    pub fn swap_acceptance_rate(&self, chain: usize, pair: Option<usize>) -> f64 {
        let set = &self.chain_sets[chain];
        let (accepted, proposed): (u64, u64) = match pair {
            Some(p) => (set.swaps_accepted[p], set.swaps_proposed[p]),
            None => (
                set.swaps_accepted.iter().sum(),
                set.swaps_proposed.iter().sum(),
            ),
        };
        if proposed == 0 {
            0.0
        } else {
            accepted as f64 / proposed as f64
        }
    }

    fn template_proposal(&self) -> Result<Box<dyn Proposal>> {
        match &self.proposal {
            ProposalSource::DiagonalFromScales => Ok(Box::new(GaussianProposal::from_scales(
                &self.config.parameters.scales(),
            ))),
            ProposalSource::Covariance(covariance) => {
                let expected = self.config.parameters.len();
                if covariance.nrows() != expected || covariance.ncols() != expected {
                    return Err(Error::CovarianceSize {
                        found: covariance.nrows(),
                        expected,
                    });
                }
                match GaussianProposal::from_covariance(covariance) {
                    Ok(proposal) => Ok(Box::new(proposal)),
                    Err(Error::NotPositiveDefinite) => {
                        warn!(
                            "proposal covariance is not positive definite; \
                             falling back to the diagonal proposal from the parameter scales"
                        );
                        Ok(Box::new(GaussianProposal::from_scales(
                            &self.config.parameters.scales(),
                        )))
                    }
                    Err(other) => Err(other),
                }
            }
            ProposalSource::Custom(proposal) => Ok(proposal.boxed_clone()),
        }
    }

    fn start_values(&self, rng: &mut RngStream, proposal: &mut Box<dyn Proposal>) -> Vec<f64> {
        let initial = self.config.parameters.initial_values();
        if !self.randomize_start {
            return initial;
        }
        let around = Sample::new(initial.clone());
        for _ in 0..100 {
            let (values, _) = proposal.propose(&around, &self.config.parameters, rng);
            if self.config.parameters.is_inside_limits(&values) {
                return values;
            }
        }
        warn!("no randomized start point inside the limits after 100 draws; using the configured point");
        initial
    }
}

impl Algorithm for MetropolisHastings {
    fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut AlgorithmConfig {
        &mut self.config
    }

    /// Builds one [`ChainSet`] per chain with one replica per beta. Replica
    /// streams are seeded `seed + k` with a running stream counter, so a
    /// fixed seed reproduces the run.
    fn initialize(&mut self) -> Result<()> {
        let template = self.template_proposal()?;
        let pair_count = self.betas.len().saturating_sub(1);
        let mut stream = 0u64;
        let mut chain_sets = Vec::with_capacity(self.n_chains);

        for _ in 0..self.n_chains {
            let set_rng = RngStream::seeded(self.seed.wrapping_add(stream));
            stream += 1;

            let mut replicas = Vec::with_capacity(self.betas.len());
            for &beta in &self.betas {
                let mut rng = RngStream::seeded(self.seed.wrapping_add(stream));
                stream += 1;
                let mut proposal = template.clone();
                proposal.rescale(1.0 / beta.sqrt());

                let values = self.start_values(&mut rng, &mut proposal);
                let mut current = self.config.evaluate(values, 0);
                current.accepted = true;

                let mut chain = Chain::new();
                if self.config.total_length > 0 {
                    chain.push(current.clone());
                }
                replicas.push(TemperedChain {
                    chain,
                    current,
                    rng,
                    beta,
                    proposal,
                    proposed: 0,
                    accepted: 0,
                });
            }

            chain_sets.push(ChainSet {
                replicas,
                rng: set_rng,
                swaps_proposed: vec![0; pair_count],
                swaps_accepted: vec![0; pair_count],
                steps_since_swap: 0,
            });
        }

        self.chain_sets = chain_sets;
        self.config.phase = Phase::Initialized;
        Ok(())
    }

    fn advance(&mut self, n_steps: usize) {
        let target = &self.config.target;
        let params = &self.config.parameters;
        let pt_frequency = self.pt_frequency;

        if self.multi_threading {
            self.chain_sets
                .par_iter_mut()
                .for_each(|set| set.advance_parallel(target, params, n_steps));
            // swaps see the post-cycle state of every replica
            for set in &mut self.chain_sets {
                set.run_pending_swaps(pt_frequency);
            }
        } else {
            for set in &mut self.chain_sets {
                set.advance(target, params, n_steps, pt_frequency);
            }
        }
    }

    fn number_of_chains(&self) -> usize {
        self.chain_sets.len()
    }

    fn chain(&self, index: usize) -> &Chain {
        &self.chain_sets[index].replicas[0].chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameter;
    use std::sync::atomic::Ordering;

    fn gaussian_setup() -> MetropolisHastings {
        let params =
            ParameterConfig::from(vec![Parameter::new("x", 0.0, 1.0).with_limits(-10.0, 10.0)]);
        let target = TargetDensity::new().with_neg_log_likelihood(|v| v[0] * v[0] / 2.0);
        MetropolisHastings::new(params, target)
    }

    /// Proposal that never moves; on a constant target every step accepts.
    #[derive(Clone)]
    struct IdentityProposal;

    impl Proposal for IdentityProposal {
        fn propose(
            &mut self,
            current: &Sample,
            _params: &ParameterConfig,
            _rng: &mut RngStream,
        ) -> (Vec<f64>, f64) {
            (current.values.clone(), 0.0)
        }

        fn rescale(&mut self, _factor: f64) {}

        fn boxed_clone(&self) -> Box<dyn Proposal> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn missing_target_is_fatal_at_initialization() {
        let params = ParameterConfig::from(vec![Parameter::new("x", 0.0, 1.0)]);
        let mut sampler = MetropolisHastings::new(params, TargetDensity::new());
        assert!(matches!(sampler.run(), Err(Error::MissingTarget)));
    }

    #[test]
    fn chain_reaches_total_length_with_increasing_generations() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(500);
        sampler.set_cycle_length(64);
        sampler.set_seed(7);
        sampler.run().unwrap();

        let chain = sampler.chain(0);
        assert_eq!(chain.len(), 500);
        for (index, sample) in chain.iter().enumerate() {
            assert_eq!(sample.generation, index as u64);
        }
    }

    #[test]
    fn nll_matches_likelihood_on_every_sample() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(200);
        sampler.set_seed(11);
        sampler.run().unwrap();

        for sample in sampler.chain(0).iter() {
            assert!(sample.prior > 0.0 && sample.likelihood > 0.0);
            let implied = -sample.likelihood.ln();
            assert!((sample.neg_log_likelihood - implied).abs() < 1e-9);
        }
    }

    #[test]
    fn identity_proposal_on_constant_target_accepts_everything() {
        let params = ParameterConfig::from(vec![Parameter::new("x", 1.0, 1.0)]);
        let target = TargetDensity::new().with_neg_log_likelihood(|_| 3.0);
        let mut sampler = MetropolisHastings::new(params, target);
        sampler.set_proposal(IdentityProposal);
        sampler.set_total_length(100);
        sampler.set_seed(5);
        sampler.run().unwrap();

        assert_eq!(sampler.acceptance_rate(0), 1.0);
        assert!(sampler.chain(0).iter().all(|s| s.accepted));
    }

    #[test]
    fn cycle_length_is_clamped_to_total_length() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(10);
        sampler.set_cycle_length(1_000);
        sampler.set_seed(1);
        sampler.run().unwrap();

        assert_eq!(sampler.chain(0).len(), 10);
        assert_eq!(sampler.config().cycle_length, 10);
    }

    #[test]
    fn beta_ladder_is_filtered_and_sorted() {
        let mut sampler = gaussian_setup();
        sampler.set_betas([0.25, 2.0, 0.5, -1.0, 1.0, 0.0]);
        assert_eq!(sampler.betas(), &[1.0, 0.5, 0.25]);
    }

    #[test]
    fn tempering_proposes_and_accepts_swaps() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(2_000);
        sampler.set_betas([0.5, 0.25]);
        sampler.set_pt_frequency(10);
        sampler.set_seed(3);
        sampler.run().unwrap();

        let rate = sampler.swap_acceptance_rate(0, None);
        assert!((0.0..=1.0).contains(&rate));
        let proposed: u64 = (0..2)
            .map(|p| {
                sampler.chain_sets[0].swaps_proposed[p]
            })
            .sum();
        assert!(proposed > 100, "expected ~200 swap proposals, got {proposed}");
        assert!(rate > 0.0, "adjacent tempered replicas should swap sometimes");
    }

    #[test]
    fn stop_flag_short_circuits_at_the_cycle_boundary() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(10_000);
        sampler.set_cycle_length(50);
        sampler.set_seed(2);
        sampler.stop_flag().store(true, Ordering::Relaxed);
        sampler.run().unwrap();

        // only the evaluated starting point was produced
        assert_eq!(sampler.chain(0).len(), 1);
    }

    #[test]
    fn covariance_size_mismatch_is_a_configuration_error() {
        let mut sampler = gaussian_setup();
        sampler.set_proposal_covariance(DMatrix::from_element(2, 2, 1.0));
        assert!(matches!(sampler.run(), Err(Error::CovarianceSize { .. })));
    }

    #[test]
    fn indefinite_covariance_falls_back_to_scales() {
        let params = ParameterConfig::from(vec![
            Parameter::new("a", 0.0, 1.0),
            Parameter::new("b", 0.0, 1.0),
        ]);
        let target = TargetDensity::new()
            .with_neg_log_likelihood(|v| (v[0] * v[0] + v[1] * v[1]) / 2.0);
        let mut sampler = MetropolisHastings::new(params, target);
        sampler.set_proposal_covariance(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]));
        sampler.set_total_length(100);
        sampler.set_seed(9);
        sampler.run().unwrap();
        assert_eq!(sampler.chain(0).len(), 100);
    }

    #[test]
    fn multi_threaded_advancement_matches_lengths() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(1_000);
        sampler.set_number_of_chains(3);
        sampler.set_betas([0.5]);
        sampler.set_multi_threading(true);
        sampler.set_seed(13);
        sampler.run().unwrap();

        assert_eq!(sampler.number_of_chains(), 3);
        for index in 0..3 {
            assert_eq!(sampler.chain(index).len(), 1_000);
        }
    }

    #[test]
    fn randomized_start_points_disperse_chains() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(1);
        sampler.set_number_of_chains(4);
        sampler.set_randomize_start_point(true);
        sampler.set_seed(21);
        sampler.run().unwrap();

        let starts: Vec<f64> = (0..4).map(|i| sampler.chain(i).get(0).unwrap().values[0]).collect();
        let distinct = starts
            .iter()
            .any(|&a| starts.iter().any(|&b| (a - b).abs() > 1e-12));
        assert!(distinct, "randomized starts should differ: {starts:?}");
        for &s in &starts {
            assert!((-10.0..=10.0).contains(&s));
        }
    }

    struct FailingWriter;

    impl Writer for FailingWriter {
        fn initialize(&mut self, _n: usize, _params: &ParameterConfig) -> Result<()> {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "sink unavailable",
            )))
        }

        fn write(&mut self, _chain: usize, _data: &Chain, _start: usize) -> Result<()> {
            Ok(())
        }

        fn finalize(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_failure_terminates_the_run() {
        let mut sampler = gaussian_setup();
        sampler.set_total_length(100);
        sampler.set_seed(4);
        sampler.add_writer(FailingWriter);
        assert!(matches!(sampler.run(), Err(Error::Io(_))));
    }
}
