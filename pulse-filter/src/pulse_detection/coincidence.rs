//! Matching pulses of the signal channels against the trigger pulse.
use super::{ClippingBounds, Pulse, Real, Rejection, closest_to};
use crate::channels::{Channel, ChannelMap, ChannelSet};
use serde::Deserialize;

/// Acceptance interval of a signal channel relative to the trigger
/// reference, in samples.
///
/// A pulse at `p` is accepted if `|p - (reference + offset)| <= width / 2`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoincidenceWindow {
    pub offset: Real,
    pub width: Real,
}

impl CoincidenceWindow {
    pub fn expected_position(&self, reference: Real) -> Real {
        reference + self.offset
    }

    pub fn accepts(&self, reference: Real, position: Real) -> bool {
        (position - self.expected_position(reference)).abs() <= self.width / 2.0
    }
}

/// Number of pulses a channel must hold for the event to be considered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    ExactlyOne,
    AtLeastOne,
}

impl Multiplicity {
    pub fn admits(self, count: usize) -> bool {
        match self {
            Multiplicity::ExactlyOne => count == 1,
            Multiplicity::AtLeastOne => count >= 1,
        }
    }
}

/// For each channel, the index of the pulse chosen for the event.
pub type Selection = ChannelMap<Option<usize>>;

#[derive(Clone, Debug)]
pub struct CoincidenceMatcher {
    pub trigger: Channel,
    pub pre_trigger_samples: usize,
    pub windows: ChannelMap<Option<CoincidenceWindow>>,
    pub trigger_multiplicity: Multiplicity,
    pub signal_multiplicity: Multiplicity,
    pub clipping: ChannelMap<Option<ClippingBounds>>,
}

impl CoincidenceMatcher {
    /// Picks the trigger pulse nearest the nominal trigger position and one
    /// pulse of every other channel inside its window.
    ///
    /// Every signal channel's multiplicity is checked before any window. The
    /// first failed condition rejects the event.
    #[tracing::instrument(skip_all, level = "trace", fields(trigger = %self.trigger))]
    pub fn select(
        &self,
        channels: &ChannelSet,
        pulses: &ChannelMap<Vec<Pulse>>,
    ) -> Result<Selection, Rejection> {
        let trigger_pulses = &pulses[self.trigger];
        if trigger_pulses.is_empty() {
            return Err(Rejection::NoTriggerPulse(self.trigger));
        }
        if !self.trigger_multiplicity.admits(trigger_pulses.len()) {
            return Err(Rejection::TriggerMultiplicity {
                channel: self.trigger,
                count: trigger_pulses.len(),
            });
        }

        let reference_index = closest_to(trigger_pulses, self.pre_trigger_samples as Real)
            .ok_or(Rejection::NoTriggerPulse(self.trigger))?;
        let reference = trigger_pulses
            .get(reference_index)
            .ok_or(Rejection::NoTriggerPulse(self.trigger))?;
        self.check_clipping(self.trigger, reference)?;

        let reference_position = reference.peak.position as Real;
        let mut selection = Selection::default();
        selection[self.trigger] = Some(reference_index);

        let signal_channels = || channels.iter().filter(|&channel| channel != self.trigger);
        if let Some(channel) = signal_channels()
            .find(|&channel| !self.signal_multiplicity.admits(pulses[channel].len()))
        {
            return Err(Rejection::SignalMultiplicity {
                channel,
                count: pulses[channel].len(),
            });
        }

        for channel in signal_channels() {
            let candidates = &pulses[channel];
            let multiplicity_rejection = Rejection::SignalMultiplicity {
                channel,
                count: candidates.len(),
            };
            let window =
                self.windows[channel].ok_or(Rejection::OutsideCoincidenceWindow(channel))?;
            let index = closest_to(candidates, window.expected_position(reference_position))
                .ok_or(multiplicity_rejection)?;
            let candidate = candidates.get(index).ok_or(multiplicity_rejection)?;

            if !window.accepts(reference_position, candidate.peak.position as Real) {
                return Err(Rejection::OutsideCoincidenceWindow(channel));
            }
            self.check_clipping(channel, candidate)?;
            selection[channel] = Some(index);
        }
        Ok(selection)
    }

    fn check_clipping(&self, channel: Channel, pulse: &Pulse) -> Result<(), Rejection> {
        match self.clipping[channel] {
            Some(bounds) if bounds.is_clipped(pulse.peak.amplitude) => {
                Err(Rejection::Clipped(channel))
            }
            _ => Ok(()),
        }
    }
}
