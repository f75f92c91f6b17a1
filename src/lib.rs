/*!
# tempered-mcmc

Markov chain Monte Carlo sampling over bounded real-valued parameter spaces:
a Metropolis-Hastings engine with a pluggable proposal kernel, optional
parallel tempering for multimodal targets, multi-chain execution, streaming
writers and per-chain diagnostics (acceptance rate, autocorrelation time,
Rubin-Gelman R-hat).

## Quick start

```rust
use tempered_mcmc::algorithm::Algorithm;
use tempered_mcmc::metropolis::MetropolisHastings;
use tempered_mcmc::params::{Parameter, ParameterConfig};
use tempered_mcmc::stats::ChainStats;
use tempered_mcmc::target::TargetDensity;

// A standard normal target via its negative log-likelihood.
let params = ParameterConfig::from(vec![
    Parameter::new("x", 0.0, 1.0).with_limits(-10.0, 10.0),
]);
let target = TargetDensity::new().with_neg_log_likelihood(|v| v[0] * v[0] / 2.0);

let mut sampler = MetropolisHastings::new(params, target);
sampler.set_total_length(5_000);
sampler.set_seed(42);
sampler.run().unwrap();

let stats = ChainStats::new(sampler.chain(0));
assert!(stats.acceptance_rate() > 0.0);
```

Parallel tempering is enabled by supplying inverse temperatures below one via
[`metropolis::MetropolisHastings::set_betas`]; chains can be streamed to disk
with [`io::TextFileWriter`].
*/

pub mod algorithm;
pub mod error;
pub mod io;
pub mod metropolis;
pub mod params;
pub mod proposal;
pub mod random;
pub mod sample;
pub mod stats;
pub mod target;
