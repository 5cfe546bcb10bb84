//! Run configuration, read once from a versioned JSON document.
use crate::{
    channels::{Channel, ChannelError, ChannelMap, ChannelSet},
    pulse_detection::{
        ClippingBounds, CoincidenceWindow, GradientBounds, Multiplicity, PeakParameters, Real,
        SignaturePattern, extraction::UnitConversion,
    },
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported configuration version {0}, expected {expected}", expected = CONFIG_VERSION)]
    UnsupportedVersion(u32),
    #[error("Invalid channel list: {0}")]
    Channels(#[from] ChannelError),
    #[error("Trigger channel {0} is not one of the configured channels")]
    TriggerNotInChannels(Channel),
    #[error("The {0} analysis requires a trigger channel")]
    TriggerRequired(&'static str),
    #[error("No {what} given for channel {channel}")]
    MissingParameter {
        what: &'static str,
        channel: Channel,
    },
    #[error("No coincidence window given for channel {0}")]
    MissingWindow(Channel),
    #[error("Signature {signature} has {found} markers, expected one per channel ({expected})")]
    SignatureLength {
        signature: String,
        expected: usize,
        found: usize,
    },
    #[error("Invalid {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name,
            reason: reason.into(),
        }
    }
}

/// A setting given either once for all channels or per channel.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PerChannel<T> {
    Each(BTreeMap<Channel, T>),
    All(T),
}

impl<T: Clone> PerChannel<T> {
    /// Spreads the setting over `channels`. A per-channel map must name
    /// every channel of the set and no other.
    pub fn resolve(
        &self,
        channels: &ChannelSet,
        what: &'static str,
    ) -> Result<ChannelMap<Option<T>>, ConfigError> {
        let mut resolved = ChannelMap::default();
        match self {
            PerChannel::All(value) => {
                for channel in channels.iter() {
                    resolved[channel] = Some(value.clone());
                }
            }
            PerChannel::Each(values) => {
                if let Some(&unknown) = values.keys().find(|&&c| !channels.contains(c)) {
                    return Err(ConfigError::invalid(
                        what,
                        format!("channel {unknown} is not configured"),
                    ));
                }
                for channel in channels.iter() {
                    let value = values
                        .get(&channel)
                        .ok_or(ConfigError::MissingParameter { what, channel })?;
                    resolved[channel] = Some(value.clone());
                }
            }
        }
        Ok(resolved)
    }
}

/// Saturation level of a channel: a symmetric `±level`, or explicit bounds.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClippingLevel {
    Symmetric(Real),
    Bounds(ClippingBounds),
}

impl ClippingLevel {
    pub fn bounds(self) -> ClippingBounds {
        match self {
            ClippingLevel::Symmetric(level) => ClippingBounds::symmetric(level),
            ClippingLevel::Bounds(bounds) => bounds,
        }
    }
}

/// How the start of each pulse is located.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OnsetMethod {
    Gradient {
        bounds: GradientBounds,
    },
    ZeroCrossing,
    #[default]
    None,
}

fn default_trigger_multiplicity() -> Multiplicity {
    Multiplicity::AtLeastOne
}

/// The decision that turns detected pulses into an output record.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisConfig {
    /// One pulse per channel, each inside its window around the trigger pulse.
    Coincidence {
        /// Keyed by every channel but the trigger.
        windows: BTreeMap<Channel, CoincidenceWindow>,
        #[serde(default = "default_trigger_multiplicity")]
        trigger_multiplicity: Multiplicity,
        #[serde(default)]
        signal_multiplicity: Multiplicity,
    },
    /// Correlated pulse groups classified by signature patterns.
    DoublePulse {
        /// In samples; peaks closer than this to a group's anchor join it.
        tolerance: usize,
        /// Tried in order, the first matching pattern accepts the event.
        signatures: Vec<SignaturePattern>,
    },
    /// Every pulse close to the trigger reference, in any channel.
    Spectrum {
        /// In samples.
        trigger_position_tolerance: usize,
    },
}

impl AnalysisConfig {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisConfig::Coincidence { .. } => "coincidence",
            AnalysisConfig::DoublePulse { .. } => "double_pulse",
            AnalysisConfig::Spectrum { .. } => "spectrum",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub version: u32,
    /// Channels of the run, in the column order of peak matrices and signatures.
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub trigger_channel: Option<Channel>,
    pub sample_period_ns: Real,
    /// Nominal position of the trigger pulse in each record.
    #[serde(default)]
    pub pre_trigger_samples: usize,
    /// Baseline level of every trace.
    #[serde(default)]
    pub analogue_offset_mv: Real,
    #[serde(default)]
    pub units: UnitConversion,
    #[serde(default)]
    pub clipping: Option<PerChannel<ClippingLevel>>,
    pub peaks: PerChannel<PeakParameters>,
    #[serde(default)]
    pub onset: OnsetMethod,
    pub analysis: AnalysisConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Parses a configuration and checks its version. Everything else is
    /// checked when a pipeline is built from it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(config.version));
        }
        Ok(config)
    }

    pub fn channel_set(&self) -> Result<ChannelSet, ConfigError> {
        let channels = ChannelSet::new(self.channels.clone())?;
        if let Some(trigger) = self.trigger_channel {
            if !channels.contains(trigger) {
                return Err(ConfigError::TriggerNotInChannels(trigger));
            }
        }
        Ok(channels)
    }
}
