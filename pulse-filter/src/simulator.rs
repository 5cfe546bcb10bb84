//! Synthetic detector-stack events: exponential pulses on a noisy baseline,
//! with an occasional stopped muon whose decay electron leaves a delayed
//! pulse in the upper or lower pair of layers.
use crate::{
    channels::{Channel, ChannelSet, RecordError, WaveformRecord},
    pulse_detection::Real,
};
use clap::Args;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Exp, Normal};
use thiserror::Error;
use tracing::trace;

const DEFAULT_NUM_SAMPLES: usize = 1500;
const DEFAULT_PULSE_WINDOW: usize = 100;
const DEFAULT_PULSE_HEIGHT: Real = 250.0;
const DEFAULT_DETECTOR_EFFICIENCY: Real = 0.95;
const DEFAULT_STOPPING_PROBABILITY: Real = 0.10;
const DEFAULT_MUON_LIFETIME_NS: Real = 2197.0;

#[derive(Clone, Debug, Args)]
pub struct SimulatorParameters {
    /// Number of samples in each record.
    #[clap(long, default_value_t = DEFAULT_NUM_SAMPLES)]
    pub num_samples: usize,

    /// Length of a pulse, in samples; its decay constant is a quarter of this.
    #[clap(long, default_value_t = DEFAULT_PULSE_WINDOW)]
    pub pulse_window: usize,

    /// Mean pulse height above the baseline.
    #[clap(long, default_value_t = DEFAULT_PULSE_HEIGHT)]
    pub pulse_height: Real,

    /// Standard deviation of the pulse height [default: 0.3 × pulse height].
    #[clap(long)]
    pub pulse_spread: Option<Real>,

    /// Peak-to-peak amplitude of the uniform noise [default: pulse height / 30].
    #[clap(long)]
    pub noise: Option<Real>,

    /// Probability that a layer registers a traversing particle.
    #[clap(long, default_value_t = DEFAULT_DETECTOR_EFFICIENCY)]
    pub detector_efficiency: Real,

    /// Probability that a muon stops in the stack and decays.
    #[clap(long, default_value_t = DEFAULT_STOPPING_PROBABILITY)]
    pub stopping_probability: Real,

    #[clap(long, default_value_t = DEFAULT_MUON_LIFETIME_NS)]
    pub muon_lifetime_ns: Real,

    /// Seed for reproducible output.
    #[clap(long)]
    pub seed: Option<u64>,
}

impl Default for SimulatorParameters {
    fn default() -> Self {
        Self {
            num_samples: DEFAULT_NUM_SAMPLES,
            pulse_window: DEFAULT_PULSE_WINDOW,
            pulse_height: DEFAULT_PULSE_HEIGHT,
            pulse_spread: None,
            noise: None,
            detector_efficiency: DEFAULT_DETECTOR_EFFICIENCY,
            stopping_probability: DEFAULT_STOPPING_PROBABILITY,
            muon_lifetime_ns: DEFAULT_MUON_LIFETIME_NS,
            seed: None,
        }
    }
}

/// Timing of the records to produce, shared with the pipeline configuration.
#[derive(Clone, Debug)]
pub struct RecordLayout {
    pub channels: ChannelSet,
    pub sample_period_ns: Real,
    pub pre_trigger_samples: usize,
    pub baseline: Real,
}

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Invalid pulse height distribution: {0}")]
    PulseHeight(#[from] rand_distr::NormalError),
    #[error("Invalid muon lifetime: {0}")]
    Lifetime(#[from] rand_distr::ExpError),
    #[error("{name} must lie in [0, 1], got {value}")]
    Probability { name: &'static str, value: Real },
    #[error(
        "A {window}-sample pulse after {pre_trigger} pre-trigger samples does not fit in {num_samples} samples"
    )]
    PulseDoesNotFit {
        window: usize,
        pre_trigger: usize,
        num_samples: usize,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// A generated record together with what was put into it.
#[derive(Clone, Debug)]
pub struct SimulatedEvent {
    pub record: WaveformRecord,
    /// Sample at which the decay pulse starts, if the muon stopped.
    pub decay_position: Option<usize>,
}

pub struct MuonSimulator {
    layout: RecordLayout,
    num_samples: usize,
    template: Vec<Real>,
    height: Normal<Real>,
    noise: Real,
    lifetime: Exp<Real>,
    detector_efficiency: Real,
    stopping_probability: Real,
    rng: StdRng,
}

fn check_probability(name: &'static str, value: Real) -> Result<Real, SimulatorError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(SimulatorError::Probability { name, value })
    }
}

impl MuonSimulator {
    pub fn new(
        layout: RecordLayout,
        parameters: &SimulatorParameters,
    ) -> Result<Self, SimulatorError> {
        let window = parameters.pulse_window;
        if layout.pre_trigger_samples + window > parameters.num_samples {
            return Err(SimulatorError::PulseDoesNotFit {
                window,
                pre_trigger: layout.pre_trigger_samples,
                num_samples: parameters.num_samples,
            });
        }

        let tau = window as Real / 4.0;
        let template = (0..window).map(|i| (-(i as Real) / tau).exp()).collect();
        let spread = parameters
            .pulse_spread
            .unwrap_or(parameters.pulse_height * 0.3);

        let rng = match parameters.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            num_samples: parameters.num_samples,
            template,
            height: Normal::new(parameters.pulse_height, spread)?,
            noise: parameters.noise.unwrap_or(parameters.pulse_height / 30.0),
            lifetime: Exp::new(1.0 / parameters.muon_lifetime_ns)?,
            detector_efficiency: check_probability(
                "detector_efficiency",
                parameters.detector_efficiency,
            )?,
            stopping_probability: check_probability(
                "stopping_probability",
                parameters.stopping_probability,
            )?,
            layout,
            rng,
        })
    }

    pub fn next_record(&mut self) -> Result<WaveformRecord, SimulatorError> {
        Ok(self.next_event()?.record)
    }

    pub fn next_event(&mut self) -> Result<SimulatedEvent, SimulatorError> {
        let channels: Vec<Channel> = self.layout.channels.iter().collect();
        let mut traces: Vec<Vec<Real>> = channels
            .iter()
            .map(|_| {
                (0..self.num_samples)
                    .map(|_| self.noise * (0.5 - self.rng.random::<Real>()))
                    .collect()
            })
            .collect();

        let stopped = self.rng.random::<Real>() < self.stopping_probability;
        // A stopped muon only reaches the upper two layers.
        let traversed = if stopped {
            traces.len().min(2)
        } else {
            traces.len()
        };
        let trigger_position = self.layout.pre_trigger_samples;
        for trace in traces.iter_mut().take(traversed) {
            self.add_pulse(trace, trigger_position);
        }

        let mut decay_position = None;
        if stopped {
            let decay_ns = self.lifetime.sample(&mut self.rng);
            let position =
                (decay_ns / self.layout.sample_period_ns) as usize + self.layout.pre_trigger_samples;
            let upper = traces.len().min(2);
            let layers = if self.rng.random::<bool>() {
                0..upper
            } else {
                upper..traces.len().min(4)
            };
            if !layers.is_empty() && position + self.template.len() < self.num_samples {
                for trace in traces.get_mut(layers).into_iter().flatten() {
                    self.add_pulse(trace, position);
                }
                decay_position = Some(position);
            }
            trace!(decay_ns, position, "Simulated stopped muon");
        }

        for trace in &mut traces {
            for value in trace.iter_mut() {
                *value += self.layout.baseline;
            }
        }

        Ok(SimulatedEvent {
            record: WaveformRecord::new(channels.into_iter().zip(traces))?,
            decay_position,
        })
    }

    /// Adds a pulse at `position` to `trace` if the layer registers it.
    fn add_pulse(&mut self, trace: &mut [Real], position: usize) {
        if self.rng.random::<Real>() >= self.detector_efficiency {
            return;
        }
        let height = self.height.sample(&mut self.rng);
        for (value, shape) in trace.iter_mut().skip(position).zip(&self.template) {
            *value += height * shape;
        }
    }
}
