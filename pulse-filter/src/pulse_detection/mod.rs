//! The stages applied to one waveform record.
//!
//! Each stage works on plain slices and per-channel maps and is free of
//! state, so a record can be pushed through in any order by any number of
//! workers:
//! ```text
//! clipping -> peaks -> onset -> { coincidence | correlation + signature } -> extraction
//! ```
//! Every stage may reject the event with a [Rejection].

pub mod clipping;
pub mod coincidence;
pub mod correlation;
pub mod extraction;
pub mod onset;
pub mod peaks;
pub mod signature;

use crate::channels::Channel;
use muon_lifetime_common::metrics::rejections::RejectionKind;
use thiserror::Error;

pub use clipping::{ClippingBounds, find_clipped_channel};
pub use coincidence::{CoincidenceMatcher, CoincidenceWindow, Multiplicity, Selection};
pub use correlation::{PeakMatrix, PeakRow, correlate_peaks};
pub use extraction::{ChannelPulse, Extractor, PulseParameterRecord, UnitConversion};
pub use onset::{GradientBounds, OnsetStrategy, Pulse};
pub use peaks::{PeakDescriptor, PeakParameters, find_peaks};
pub use signature::{Marker, Signature, SignaturePattern};

pub type Real = f64;

/// Anything located at a sample index of a trace.
pub trait Positioned {
    fn position(&self) -> usize;
}

/// Why an event produced no output.
///
/// Rejections are ordinary outcomes of processing an event and are never
/// raised as errors.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("Channel {0} is missing from the record")]
    MissingChannel(Channel),
    #[error("Record holds no samples")]
    EmptyRecord,
    #[error("Channel {0} is clipped")]
    Clipped(Channel),
    #[error("No pulse found in trigger channel {0}")]
    NoTriggerPulse(Channel),
    #[error("Trigger channel {channel} has {count} pulses")]
    TriggerMultiplicity { channel: Channel, count: usize },
    #[error("Channel {channel} has {count} pulses")]
    SignalMultiplicity { channel: Channel, count: usize },
    #[error("Pulse in channel {0} is outside its coincidence window")]
    OutsideCoincidenceWindow(Channel),
    #[error("No signature pattern matched")]
    SignatureMismatch,
    #[error("No channel has a pulse near the trigger")]
    NoContributingChannel,
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::MissingChannel(_) => RejectionKind::MissingChannel,
            Rejection::EmptyRecord => RejectionKind::EmptyRecord,
            Rejection::Clipped(_) => RejectionKind::Clipped,
            Rejection::NoTriggerPulse(_) => RejectionKind::NoTriggerPulse,
            Rejection::TriggerMultiplicity { .. } => RejectionKind::TriggerMultiplicity,
            Rejection::SignalMultiplicity { .. } => RejectionKind::SignalMultiplicity,
            Rejection::OutsideCoincidenceWindow(_) => RejectionKind::OutsideCoincidenceWindow,
            Rejection::SignatureMismatch => RejectionKind::SignatureMismatch,
            Rejection::NoContributingChannel => RejectionKind::NoContributingChannel,
        }
    }
}

/// Index of the item closest to `target`, the first one on ties.
pub(crate) fn closest_to<P: Positioned>(items: &[P], target: Real) -> Option<usize> {
    use itertools::Itertools;

    items
        .iter()
        .map(|item| (item.position() as Real - target).abs())
        .position_min_by(|a, b| a.total_cmp(b))
}
