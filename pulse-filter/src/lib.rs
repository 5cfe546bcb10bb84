//! Filters multi-channel waveform records from a muon-lifetime detector
//! stack and reduces the accepted ones to pulse-parameter records.
pub mod channels;
pub mod metrics;
pub mod parameters;
pub mod processing;
pub mod pulse_detection;
pub mod simulator;

pub use channels::{Channel, ChannelSet, WaveformRecord};
pub use parameters::{ConfigError, PipelineConfig};
pub use processing::Pipeline;
pub use pulse_detection::{PulseParameterRecord, Rejection};
