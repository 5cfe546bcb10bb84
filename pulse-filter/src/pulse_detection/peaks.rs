//! Local-maximum peak finding with prominence, distance and width
//! constraints.
use super::{Positioned, Real};
use serde::Deserialize;

fn default_distance() -> usize {
    1
}

fn default_rel_height() -> Real {
    0.5
}

/// Encapsulates the conditions a local maximum must satisfy to count as a peak.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeakParameters {
    /// Minimum height of a peak above the higher of its two bases.
    pub prominence: Real,
    /// Minimum distance, in samples, between neighbouring peaks.
    #[serde(default = "default_distance")]
    pub distance: usize,
    /// Minimum width, in samples, measured at `rel_height`.
    #[serde(default)]
    pub width: Real,
    /// Level at which the width is measured, as a fraction of the prominence
    /// below the peak.
    #[serde(default = "default_rel_height")]
    pub rel_height: Real,
}

impl Default for PeakParameters {
    fn default() -> Self {
        Self {
            prominence: 0.0,
            distance: default_distance(),
            width: 0.0,
            rel_height: default_rel_height(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PeakDescriptor {
    pub position: usize,
    pub amplitude: Real,
    pub prominence: Real,
    pub width: Real,
    /// Interpolated position where the rising edge crosses the width level.
    pub left_ips: Real,
    /// Interpolated position where the falling edge crosses the width level.
    pub right_ips: Real,
    pub left_base: usize,
    pub right_base: usize,
}

impl Positioned for PeakDescriptor {
    fn position(&self) -> usize {
        self.position
    }
}

/// Finds the peaks of `trace` satisfying `parameters`, ordered by position.
#[tracing::instrument(skip_all, level = "trace", fields(num_samples = trace.len(), num_peaks))]
pub fn find_peaks(trace: &[Real], parameters: &PeakParameters) -> Vec<PeakDescriptor> {
    let candidates: Vec<_> = local_maxima(trace)
        .into_iter()
        .map(|position| Candidate::new(trace, position))
        .filter(|candidate| candidate.prominence >= parameters.prominence)
        .collect();

    let peaks: Vec<_> = select_by_distance(candidates, parameters.distance)
        .into_iter()
        .map(|candidate| candidate.describe(trace, parameters.rel_height))
        .filter(|peak| peak.width >= parameters.width)
        .collect();

    tracing::Span::current().record("num_peaks", peaks.len());
    peaks
}

/// Indices of samples higher than both neighbours.
/// A flat top counts once, at its middle sample (rounded down).
fn local_maxima(trace: &[Real]) -> Vec<usize> {
    let mut maxima = Vec::new();
    let last = trace.len().saturating_sub(1);
    let mut i = 1;
    while i < last {
        if trace[i - 1] < trace[i] {
            let mut ahead = i + 1;
            while ahead < last && trace[ahead] == trace[i] {
                ahead += 1;
            }
            if trace[ahead] < trace[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    maxima
}

#[derive(Clone, Debug)]
struct Candidate {
    position: usize,
    prominence: Real,
    left_base: usize,
    right_base: usize,
}

impl Candidate {
    fn new(trace: &[Real], position: usize) -> Self {
        let amplitude = trace[position];
        // Walk outwards until a higher sample, keeping the lowest sample seen.
        let lowest = |(base, min): (usize, Real), i: usize| {
            if trace[i] < min {
                (i, trace[i])
            } else {
                (base, min)
            }
        };
        let (left_base, left_min) = (0..=position)
            .rev()
            .take_while(|&i| trace[i] <= amplitude)
            .fold((position, amplitude), lowest);
        let (right_base, right_min) = (position..trace.len())
            .take_while(|&i| trace[i] <= amplitude)
            .fold((position, amplitude), lowest);

        Self {
            position,
            prominence: amplitude - left_min.max(right_min),
            left_base,
            right_base,
        }
    }

    fn describe(self, trace: &[Real], rel_height: Real) -> PeakDescriptor {
        let amplitude = trace[self.position];
        let level = amplitude - self.prominence * rel_height;

        let mut i = self.position;
        while self.left_base < i && level < trace[i] {
            i -= 1;
        }
        let mut left_ips = i as Real;
        if trace[i] < level {
            left_ips += (level - trace[i]) / (trace[i + 1] - trace[i]);
        }

        let mut i = self.position;
        while i < self.right_base && level < trace[i] {
            i += 1;
        }
        let mut right_ips = i as Real;
        if trace[i] < level {
            right_ips -= (level - trace[i]) / (trace[i - 1] - trace[i]);
        }

        let last = trace.len().saturating_sub(1) as Real;
        let left_ips = left_ips.clamp(0.0, last);
        let right_ips = right_ips.clamp(0.0, last);

        PeakDescriptor {
            position: self.position,
            amplitude,
            prominence: self.prominence,
            width: right_ips - left_ips,
            left_ips,
            right_ips,
            left_base: self.left_base,
            right_base: self.right_base,
        }
    }
}

/// Removes candidates closer than `distance` to a more prominent one.
/// Of two equally prominent candidates the earlier one is kept.
fn select_by_distance(candidates: Vec<Candidate>, distance: usize) -> Vec<Candidate> {
    if distance <= 1 {
        return candidates;
    }
    let mut priority: Vec<usize> = (0..candidates.len()).collect();
    priority.sort_by(|&a, &b| {
        candidates[b]
            .prominence
            .total_cmp(&candidates[a].prominence)
            .then(a.cmp(&b))
    });

    let mut keep = vec![true; candidates.len()];
    for j in priority {
        if !keep[j] {
            continue;
        }
        let position = candidates[j].position;
        for k in (0..j).rev() {
            if position - candidates[k].position >= distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..candidates.len() {
            if candidates[k].position - position >= distance {
                break;
            }
            keep[k] = false;
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(candidate, keep)| keep.then_some(candidate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn positions(peaks: &[PeakDescriptor]) -> Vec<usize> {
        peaks.iter().map(|peak| peak.position).collect()
    }

    #[test]
    fn zero_data() {
        assert!(find_peaks(&[], &PeakParameters::default()).is_empty());
        assert!(find_peaks(&[1.0], &PeakParameters::default()).is_empty());
        assert!(find_peaks(&[1.0, 2.0], &PeakParameters::default()).is_empty());
    }

    #[test]
    fn maxima_exclude_edges() {
        let trace = [5.0, 1.0, 2.0, 1.0, 3.0, 3.0, 3.0, 0.0, 4.0];
        assert_eq!(local_maxima(&trace), [2, 5]);
    }

    #[test]
    fn plateau_rounds_down() {
        let trace = [0.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(&trace), [1]);
    }

    #[test]
    fn rising_plateau_is_not_a_maximum() {
        let trace = [0.0, 2.0, 2.0, 3.0, 0.0];
        assert_eq!(local_maxima(&trace), [3]);
    }

    #[test]
    fn prominence_uses_higher_base() {
        //            0    1    2    3    4    5    6
        let trace = [0.0, 1.0, 5.0, 2.0, 8.0, 3.0, 0.0];
        let peaks = find_peaks(&trace, &PeakParameters::default());
        assert_eq!(positions(&peaks), [2, 4]);
        // Peak at 2: left base 0 (0.0), right base 3 (2.0) before the higher sample at 4.
        assert_approx_eq!(peaks[0].prominence, 3.0);
        assert_eq!((peaks[0].left_base, peaks[0].right_base), (0, 3));
        // Peak at 4 dominates the trace.
        assert_approx_eq!(peaks[1].prominence, 8.0);
        assert_eq!((peaks[1].left_base, peaks[1].right_base), (0, 6));
    }

    #[test]
    fn minimum_prominence() {
        let trace = [0.0, 1.0, 5.0, 2.0, 8.0, 3.0, 0.0];
        let peaks = find_peaks(
            &trace,
            &PeakParameters {
                prominence: 4.0,
                ..Default::default()
            },
        );
        assert_eq!(positions(&peaks), [4]);
    }

    #[test]
    fn minimum_distance_keeps_more_prominent() {
        let trace = [0.0, 3.0, 0.0, 6.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0];
        let parameters = PeakParameters {
            distance: 3,
            ..Default::default()
        };
        assert_eq!(positions(&find_peaks(&trace, &parameters)), [3, 8]);

        let parameters = PeakParameters {
            distance: 6,
            ..Default::default()
        };
        assert_eq!(positions(&find_peaks(&trace, &parameters)), [3]);
    }

    #[test]
    fn minimum_distance_tie_keeps_earlier() {
        let trace = [0.0, 4.0, 0.0, 4.0, 0.0];
        let parameters = PeakParameters {
            distance: 3,
            ..Default::default()
        };
        assert_eq!(positions(&find_peaks(&trace, &parameters)), [1]);
    }

    #[test]
    fn width_interpolation() {
        //            0    1    2    3     4    5    6
        let trace = [0.0, 0.0, 4.0, 8.0, 4.0, 0.0, 0.0];
        let peaks = find_peaks(&trace, &PeakParameters::default());
        assert_eq!(positions(&peaks), [3]);
        // Half height is 4.0, reached exactly at samples 2 and 4.
        assert_approx_eq!(peaks[0].left_ips, 2.0);
        assert_approx_eq!(peaks[0].right_ips, 4.0);
        assert_approx_eq!(peaks[0].width, 2.0);

        let peaks = find_peaks(
            &trace,
            &PeakParameters {
                rel_height: 0.75,
                ..Default::default()
            },
        );
        // Level 2.0 lies halfway between samples 1 and 2, and 4 and 5.
        assert_approx_eq!(peaks[0].left_ips, 1.5);
        assert_approx_eq!(peaks[0].right_ips, 4.5);
        assert_approx_eq!(peaks[0].width, 3.0);
    }

    #[test]
    fn minimum_width() {
        let trace = [0.0, 8.0, 0.0, 0.0, 4.0, 8.0, 8.0, 8.0, 4.0, 0.0];
        let parameters = PeakParameters {
            width: 2.0,
            ..Default::default()
        };
        let peaks = find_peaks(&trace, &parameters);
        assert_eq!(positions(&peaks), [6]);
        assert_approx_eq!(peaks[0].width, 4.0);
    }

    #[test]
    fn crossing_beyond_record_is_clamped() {
        let trace = [6.0, 8.0, 7.0, 0.0];
        let peaks = find_peaks(
            &trace,
            &PeakParameters {
                rel_height: 1.0,
                ..Default::default()
            },
        );
        assert_eq!(positions(&peaks), [1]);
        assert!(peaks[0].left_ips >= 0.0);
        assert!(peaks[0].right_ips <= 3.0);
    }

    #[test]
    fn positions_strictly_increase() {
        let trace: Vec<Real> = (0..200)
            .map(|i| ((i as Real) * 0.3).sin() * 10.0 + ((i as Real) * 1.7).cos())
            .collect();
        let peaks = find_peaks(
            &trace,
            &PeakParameters {
                prominence: 1.0,
                distance: 4,
                ..Default::default()
            },
        );
        assert!(!peaks.is_empty());
        assert!(peaks.windows(2).all(|w| w[0].position < w[1].position));
    }
}
