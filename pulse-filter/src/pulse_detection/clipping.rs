//! Rejection of saturated events.
use super::Real;
use crate::channels::{Channel, ChannelMap, ChannelSet, WaveformRecord};
use serde::Deserialize;

/// Samples at or beyond either bound are treated as saturated.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClippingBounds {
    pub upper: Real,
    pub lower: Real,
}

impl ClippingBounds {
    /// Bounds of ±`level`.
    pub fn symmetric(level: Real) -> Self {
        Self {
            upper: level,
            lower: -level,
        }
    }

    pub fn is_clipped(&self, value: Real) -> bool {
        value >= self.upper || value <= self.lower
    }
}

/// Returns the first channel, in `channels` order, with a saturated sample.
/// Channels without bounds are never clipped, nor are channels missing
/// from the record.
#[tracing::instrument(skip_all, level = "trace")]
pub fn find_clipped_channel(
    record: &WaveformRecord,
    channels: &ChannelSet,
    bounds: &ChannelMap<Option<ClippingBounds>>,
) -> Option<Channel> {
    channels.iter().find(|&channel| {
        Option::zip(bounds[channel], record.trace(channel))
            .map(|(bounds, trace)| trace.iter().any(|&value| bounds.is_clipped(value)))
            .unwrap_or(false)
    })
}
