//! Turning the pulses chosen for an event into its output record.
use super::{PeakDescriptor, PeakMatrix, Pulse, Real, Rejection};
use crate::channels::{ChannelMap, ChannelSet, WaveformRecord};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};

fn default_impedance_ohm() -> Real {
    50.0
}

fn default_gain() -> Real {
    5.0
}

/// Converts a sum of samples into collected charge.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConversion {
    #[serde(default = "default_impedance_ohm")]
    pub impedance_ohm: Real,
    #[serde(default = "default_gain")]
    pub gain: Real,
}

impl Default for UnitConversion {
    fn default() -> Self {
        Self {
            impedance_ohm: default_impedance_ohm(),
            gain: default_gain(),
        }
    }
}

/// The measured parameters of one channel's pulse.
/// All zero for a channel that did not contribute.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelPulse {
    pub position: usize,
    pub height: Real,
    pub integral: Real,
}

/// The output of one accepted event.
///
/// Serialises to a flat object with `{channel}_position`, `{channel}_height`
/// and `{channel}_integral` for every channel of the run, then `decay_time`
/// when it was measured.
#[derive(Clone, Debug, PartialEq)]
pub struct PulseParameterRecord {
    pub channels: ChannelSet,
    pub pulses: ChannelMap<ChannelPulse>,
    /// Nanoseconds between the first two pulse groups.
    pub decay_time: Option<Real>,
}

impl Serialize for PulseParameterRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 3 * self.channels.len() + usize::from(self.decay_time.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for channel in self.channels.iter() {
            let pulse = &self.pulses[channel];
            map.serialize_entry(&format!("{channel}_position"), &pulse.position)?;
            map.serialize_entry(&format!("{channel}_height"), &pulse.height)?;
            map.serialize_entry(&format!("{channel}_integral"), &pulse.integral)?;
        }
        if let Some(decay_time) = self.decay_time {
            map.serialize_entry("decay_time", &decay_time)?;
        }
        map.end()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Extractor {
    pub sample_period_ns: Real,
    pub baseline: Real,
    pub units: UnitConversion,
}

impl Extractor {
    /// Baseline-subtracted sum of the samples between the width crossings
    /// of `peak`, converted to charge.
    pub fn integral(&self, trace: &[Real], peak: &PeakDescriptor) -> Real {
        let left = (peak.left_ips.max(0.0).floor() as usize).min(trace.len());
        let right = (peak.right_ips.max(0.0).ceil() as usize).clamp(left, trace.len());
        let sum: Real = trace
            .get(left..right)
            .unwrap_or_default()
            .iter()
            .map(|value| value - self.baseline)
            .sum();
        sum * self.sample_period_ns * 1e-9 / self.units.impedance_ohm / self.units.gain
    }

    pub fn channel_pulse(&self, trace: &[Real], pulse: &Pulse) -> ChannelPulse {
        ChannelPulse {
            position: pulse.peak.position,
            height: pulse.height,
            integral: self.integral(trace, &pulse.peak),
        }
    }

    /// Builds the record of an event from the pulse `selection` made for
    /// each of `channels`. Channels without a selection are left at zero.
    pub fn record(
        &self,
        channels: &ChannelSet,
        event: &WaveformRecord,
        pulses: &ChannelMap<Vec<Pulse>>,
        selection: &ChannelMap<Option<usize>>,
        decay_time: Option<Real>,
    ) -> Result<PulseParameterRecord, Rejection> {
        let mut parameters = ChannelMap::<ChannelPulse>::default();
        for channel in channels.iter() {
            let Some(pulse) = selection[channel].and_then(|index| pulses[channel].get(index))
            else {
                continue;
            };
            let trace = event
                .trace(channel)
                .ok_or(Rejection::MissingChannel(channel))?;
            parameters[channel] = self.channel_pulse(trace, pulse);
        }
        Ok(PulseParameterRecord {
            channels: channels.clone(),
            pulses: parameters,
            decay_time,
        })
    }

    /// Time between the anchors of the first two rows of `matrix`.
    pub fn decay_time(&self, matrix: &PeakMatrix) -> Option<Real> {
        let first = matrix.row(0)?;
        let second = matrix.row(1)?;
        Some((second.anchor - first.anchor) as Real * self.sample_period_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Channel;
    use crate::pulse_detection::{correlation::correlate_peaks, test_utils::pulses_at};
    use assert_approx_eq::assert_approx_eq;

    fn extractor(baseline: Real) -> Extractor {
        Extractor {
            sample_period_ns: 4.0,
            baseline,
            units: UnitConversion::default(),
        }
    }

    fn peak(left_ips: Real, right_ips: Real) -> PeakDescriptor {
        PeakDescriptor {
            position: 4,
            amplitude: 3.0,
            prominence: 3.0,
            width: right_ips - left_ips,
            left_ips,
            right_ips,
            left_base: 0,
            right_base: 8,
        }
    }

    const TRACE: [Real; 9] = [0.0, 0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0, 0.0];

    #[test]
    fn integral_over_crossings() {
        // Samples 2..6 sum to 8.
        let integral = extractor(0.0).integral(&TRACE, &peak(2.5, 5.5));
        assert_approx_eq!(integral, 8.0 * 4.0e-9 / 50.0 / 5.0);
    }

    #[test]
    fn integral_subtracts_baseline() {
        let integral = extractor(0.5).integral(&TRACE, &peak(2.5, 5.5));
        assert_approx_eq!(integral, 6.0 * 4.0e-9 / 50.0 / 5.0);
    }

    #[test]
    fn integral_clamped_to_trace() {
        let whole = extractor(0.0).integral(&TRACE, &peak(0.0, 100.0));
        assert_approx_eq!(whole, 9.0 * 4.0e-9 / 50.0 / 5.0);
        assert_eq!(extractor(0.0).integral(&TRACE, &peak(20.0, 30.0)), 0.0);
    }

    #[test]
    fn decay_time_between_groups() {
        let channels = ChannelSet::new(vec![Channel::Ch1, Channel::Ch2]).unwrap();
        let mut peaks = ChannelMap::default();
        peaks[Channel::Ch1] = pulses_at(&[100]);
        peaks[Channel::Ch2] = pulses_at(&[102, 650]);
        let matrix = correlate_peaks(&channels, &peaks, 5);
        assert_approx_eq!(extractor(0.0).decay_time(&matrix).unwrap(), 2200.0);

        peaks[Channel::Ch2] = pulses_at(&[102]);
        let matrix = correlate_peaks(&channels, &peaks, 5);
        assert_eq!(extractor(0.0).decay_time(&matrix), None);
    }

    #[test]
    fn record_leaves_unselected_channels_at_zero() {
        let event = WaveformRecord::new([
            (Channel::Ch1, TRACE.to_vec()),
            (Channel::Ch2, TRACE.to_vec()),
        ])
        .unwrap();
        let mut pulses = ChannelMap::default();
        pulses[Channel::Ch1] = pulses_at(&[4]);
        let mut selection = ChannelMap::default();
        selection[Channel::Ch1] = Some(0);

        let record = extractor(0.0)
            .record(event.channels(), &event, &pulses, &selection, None)
            .unwrap();
        assert_eq!(record.pulses[Channel::Ch1].position, 4);
        assert_approx_eq!(record.pulses[Channel::Ch1].height, 10.0);
        // Samples 3 and 4.
        assert_approx_eq!(
            record.pulses[Channel::Ch1].integral,
            5.0 * 4.0e-9 / 50.0 / 5.0
        );
        assert_eq!(record.pulses[Channel::Ch2], ChannelPulse::default());
    }

    #[test]
    fn flat_serialisation() {
        let mut pulses = ChannelMap::default();
        pulses[Channel::Ch2] = ChannelPulse {
            position: 12,
            height: 0.25,
            integral: 1.5,
        };
        let record = PulseParameterRecord {
            channels: ChannelSet::new(vec![Channel::Ch1, Channel::Ch2]).unwrap(),
            pulses,
            decay_time: Some(800.0),
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({
                "ch1_position": 0, "ch1_height": 0.0, "ch1_integral": 0.0,
                "ch2_position": 12, "ch2_height": 0.25, "ch2_integral": 1.5,
                "decay_time": 800.0,
            })
        );

        let record = PulseParameterRecord {
            decay_time: None,
            ..record
        };
        assert!(serde_json::to_value(&record).unwrap().get("decay_time").is_none());
    }
}
