//! Locating where a pulse starts, and measuring its height from there.
use super::{PeakDescriptor, Positioned, Real};
use itertools::Itertools;
use serde::Deserialize;
use std::iter;

/// Window of gradient values regarded as flat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradientBounds {
    pub upper: Real,
    pub lower: Real,
}

impl GradientBounds {
    fn contains(&self, gradient: Real) -> bool {
        (self.lower..=self.upper).contains(&gradient)
    }
}

/// A peak together with the start of its pulse.
#[derive(Clone, Debug, PartialEq)]
pub struct Pulse {
    pub peak: PeakDescriptor,
    pub onset: Option<usize>,
    /// Height of the peak above the onset, or above the baseline when no
    /// onset is estimated.
    pub height: Real,
}

impl Positioned for Pulse {
    fn position(&self) -> usize {
        self.peak.position
    }
}

/// How the start of a pulse, and hence its height, is determined.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OnsetStrategy {
    /// The latest sample before the rising edge whose gradient lies
    /// within the bounds.
    Gradient(GradientBounds),
    /// The latest sample before the peak at or below the baseline.
    ZeroCrossing { baseline: Real },
    /// No onset; heights are measured from the baseline.
    Baseline { baseline: Real },
}

impl OnsetStrategy {
    /// Attaches an onset and height to each peak of `trace`.
    /// Peaks for which no onset can be found are dropped.
    pub fn estimate(&self, trace: &[Real], peaks: Vec<PeakDescriptor>) -> Vec<Pulse> {
        match self {
            OnsetStrategy::Gradient(bounds) => {
                let gradient = gradient(trace);
                peaks
                    .into_iter()
                    .filter_map(|peak| {
                        let onset = find_gradient_onset(&gradient, bounds, peak.left_ips)?;
                        Some(pulse_from_onset(trace, peak, onset))
                    })
                    .collect()
            }
            OnsetStrategy::ZeroCrossing { baseline } => peaks
                .into_iter()
                .filter_map(|peak| {
                    let onset = (0..=peak.position).rev().find(|&i| trace[i] <= *baseline)?;
                    Some(pulse_from_onset(trace, peak, onset))
                })
                .collect(),
            OnsetStrategy::Baseline { baseline } => peaks
                .into_iter()
                .map(|peak| Pulse {
                    height: peak.amplitude - baseline,
                    onset: None,
                    peak,
                })
                .collect(),
        }
    }
}

fn pulse_from_onset(trace: &[Real], peak: PeakDescriptor, onset: usize) -> Pulse {
    Pulse {
        height: peak.amplitude - trace[onset],
        onset: Some(onset),
        peak,
    }
}

/// Discrete gradient of `trace`: central differences inside the trace,
/// one-sided differences at both ends.
pub fn gradient(trace: &[Real]) -> Vec<Real> {
    let len = trace.len();
    if len < 2 {
        return vec![0.0; len];
    }
    let head = trace[1] - trace[0];
    let tail = trace[len - 1] - trace[len - 2];
    iter::once(head)
        .chain(
            trace
                .iter()
                .tuple_windows()
                .map(|(before, _, after)| (after - before) / 2.0),
        )
        .chain(iter::once(tail))
        .collect()
}

/// The highest index at or before `left_ips` whose gradient lies in `bounds`.
pub fn find_gradient_onset(
    gradient: &[Real],
    bounds: &GradientBounds,
    left_ips: Real,
) -> Option<usize> {
    let last = gradient.len().checked_sub(1)?;
    let start = (left_ips.max(0.0).floor() as usize).min(last);
    (0..=start).rev().find(|&i| bounds.contains(gradient[i]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse_detection::peaks::{PeakParameters, find_peaks};
    use assert_approx_eq::assert_approx_eq;

    const FLAT: GradientBounds = GradientBounds {
        upper: 1.0,
        lower: -1.0,
    };

    /// A pulse of `amplitude` on a flat `floor`, rising over two samples from `onset`.
    fn injected_pulse(floor: Real, amplitude: Real, onset: usize, len: usize) -> Vec<Real> {
        let rise = amplitude - floor;
        (0..len)
            .map(|i| match i.checked_sub(onset) {
                None | Some(0) => floor,
                Some(1) => floor + rise / 2.0,
                Some(2) => amplitude,
                Some(n) => floor + rise * (-((n - 2) as Real) / 4.0).exp(),
            })
            .collect()
    }

    #[test]
    fn gradient_edges() {
        assert!(gradient(&[]).is_empty());
        assert_eq!(gradient(&[3.0]), [0.0]);
        assert_eq!(gradient(&[1.0, 4.0]), [3.0, 3.0]);
        assert_eq!(gradient(&[1.0, 2.0, 4.0, 7.0]), [1.0, 1.5, 2.5, 3.0]);
    }

    #[test]
    fn onset_of_injected_pulse() {
        let (floor, amplitude, onset) = (10.0, 110.0, 20);
        let trace = injected_pulse(floor, amplitude, onset, 80);
        let peaks = find_peaks(
            &trace,
            &PeakParameters {
                prominence: 50.0,
                ..Default::default()
            },
        );
        assert_eq!(peaks.len(), 1);

        let pulses = OnsetStrategy::Gradient(FLAT).estimate(&trace, peaks);
        assert_eq!(pulses.len(), 1);
        let found = pulses[0].onset.unwrap();
        assert!(onset - 1 <= found && found <= onset);
        assert_approx_eq!(pulses[0].height, amplitude - floor);
    }

    #[test]
    fn search_starts_at_left_crossing() {
        let gradient = [0.0, 0.0, 5.0, 0.5, 9.0, 9.0];
        assert_eq!(find_gradient_onset(&gradient, &FLAT, 4.7), Some(3));
        assert_eq!(find_gradient_onset(&gradient, &FLAT, 2.9), Some(1));
        assert_eq!(find_gradient_onset(&gradient, &FLAT, 100.0), Some(3));
        assert_eq!(find_gradient_onset(&[], &FLAT, 1.0), None);
    }

    #[test]
    fn peak_without_onset_is_dropped() {
        // Steadily rising until the peak, so no flat gradient before it.
        let trace = [0.0, 10.0, 20.0, 30.0, 40.0, 10.0, 0.0];
        let peaks = find_peaks(&trace, &PeakParameters::default());
        assert_eq!(peaks.len(), 1);
        assert!(OnsetStrategy::Gradient(FLAT).estimate(&trace, peaks).is_empty());
    }

    #[test]
    fn zero_crossing_onset() {
        let trace = [0.0, -1.0, 2.0, 6.0, 9.0, 4.0, 0.0];
        let peaks = find_peaks(&trace, &PeakParameters::default());
        let pulses = OnsetStrategy::ZeroCrossing { baseline: 0.0 }.estimate(&trace, peaks);
        assert_eq!(pulses[0].onset, Some(1));
        assert_approx_eq!(pulses[0].height, 10.0);
    }

    #[test]
    fn baseline_height() {
        let trace = [5.0, 5.0, 9.0, 5.0, 5.0];
        let peaks = find_peaks(&trace, &PeakParameters::default());
        let pulses = OnsetStrategy::Baseline { baseline: 4.0 }.estimate(&trace, peaks);
        assert_eq!(pulses[0].onset, None);
        assert_approx_eq!(pulses[0].height, 5.0);
    }
}
