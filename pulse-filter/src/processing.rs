use crate::{
    channels::{Channel, ChannelMap, ChannelSet, WaveformRecord},
    parameters::{AnalysisConfig, ConfigError, OnsetMethod, PipelineConfig},
    pulse_detection::{
        ClippingBounds, CoincidenceMatcher, Extractor, OnsetStrategy, PeakParameters, Pulse,
        PulseParameterRecord, Real, Rejection, Selection, SignaturePattern, closest_to,
        correlate_peaks, find_clipped_channel, find_peaks,
    },
};
use metrics::counter;
use muon_lifetime_common::metrics::{
    metric_names::{EVENTS_ACCEPTED, EVENTS_RECEIVED, EVENTS_REJECTED, RECORDS_EMITTED},
    rejections,
};
use rayon::prelude::*;
use tracing::{debug, info, trace};

#[derive(Clone, Debug)]
enum Analysis {
    Coincidence(CoincidenceMatcher),
    DoublePulse {
        tolerance: usize,
        patterns: Vec<SignaturePattern>,
    },
    Spectrum {
        trigger: Option<Channel>,
        pre_trigger_samples: usize,
        tolerance: usize,
    },
}

/// A validated configuration, ready to process any number of records.
///
/// Holds no state between records, so one pipeline can be shared by all
/// worker threads.
#[derive(Clone, Debug)]
pub struct Pipeline {
    channels: ChannelSet,
    clipping: ChannelMap<Option<ClippingBounds>>,
    peaks: ChannelMap<PeakParameters>,
    onset: OnsetStrategy,
    analysis: Analysis,
    extractor: Extractor,
}

fn check_positive(name: &'static str, value: Real) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} is not positive")))
    }
}

fn check_non_negative(name: &'static str, value: Real) -> Result<(), ConfigError> {
    if value.is_nan() || value < 0.0 {
        Err(ConfigError::invalid(name, format!("{value} is negative")))
    } else {
        Ok(())
    }
}

fn check_ordered(name: &'static str, lower: Real, upper: Real) -> Result<(), ConfigError> {
    if lower <= upper {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            name,
            format!("lower bound {lower} exceeds upper bound {upper}"),
        ))
    }
}

fn check_peak_parameters(parameters: &PeakParameters) -> Result<(), ConfigError> {
    check_non_negative("prominence", parameters.prominence)?;
    check_non_negative("width", parameters.width)?;
    check_non_negative("rel_height", parameters.rel_height)?;
    if parameters.distance == 0 {
        return Err(ConfigError::invalid("distance", "must be at least 1"));
    }
    Ok(())
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        let channels = config.channel_set()?;
        check_positive("sample_period_ns", config.sample_period_ns)?;
        check_positive("impedance_ohm", config.units.impedance_ohm)?;
        check_positive("gain", config.units.gain)?;

        let clipping = match &config.clipping {
            Some(levels) => levels
                .resolve(&channels, "clipping level")?
                .map(|_, level| level.map(|level| level.bounds())),
            None => ChannelMap::default(),
        };
        for bounds in clipping.iter().filter_map(|(_, bounds)| bounds.as_ref()) {
            check_ordered("clipping level", bounds.lower, bounds.upper)?;
        }

        let peaks = config.peaks.resolve(&channels, "peak parameters")?;
        for parameters in peaks.iter().filter_map(|(_, parameters)| parameters.as_ref()) {
            check_peak_parameters(parameters)?;
        }
        let peaks = peaks.map(|_, parameters| parameters.unwrap_or_default());

        let baseline = config.analogue_offset_mv;
        let onset = match config.onset {
            OnsetMethod::Gradient { bounds } => {
                check_ordered("gradient bounds", bounds.lower, bounds.upper)?;
                OnsetStrategy::Gradient(bounds)
            }
            OnsetMethod::ZeroCrossing => OnsetStrategy::ZeroCrossing { baseline },
            OnsetMethod::None => OnsetStrategy::Baseline { baseline },
        };

        let analysis = Self::build_analysis(&config, &channels, &clipping)?;
        info!(
            channels = channels.len(),
            analysis = config.analysis.name(),
            "Pipeline configured"
        );

        Ok(Self {
            channels,
            clipping,
            peaks,
            onset,
            analysis,
            extractor: Extractor {
                sample_period_ns: config.sample_period_ns,
                baseline,
                units: config.units,
            },
        })
    }

    fn build_analysis(
        config: &PipelineConfig,
        channels: &ChannelSet,
        clipping: &ChannelMap<Option<ClippingBounds>>,
    ) -> Result<Analysis, ConfigError> {
        match &config.analysis {
            AnalysisConfig::Coincidence {
                windows,
                trigger_multiplicity,
                signal_multiplicity,
            } => {
                let trigger = config
                    .trigger_channel
                    .ok_or(ConfigError::TriggerRequired(config.analysis.name()))?;
                if let Some(&channel) = windows
                    .keys()
                    .find(|&&channel| channel == trigger || !channels.contains(channel))
                {
                    return Err(ConfigError::invalid(
                        "coincidence window",
                        format!("channel {channel} is not a configured signal channel"),
                    ));
                }

                let mut resolved = ChannelMap::default();
                for channel in channels.iter().filter(|&channel| channel != trigger) {
                    let window = windows
                        .get(&channel)
                        .copied()
                        .ok_or(ConfigError::MissingWindow(channel))?;
                    check_non_negative("coincidence window width", window.width)?;
                    resolved[channel] = Some(window);
                }

                Ok(Analysis::Coincidence(CoincidenceMatcher {
                    trigger,
                    pre_trigger_samples: config.pre_trigger_samples,
                    windows: resolved,
                    trigger_multiplicity: *trigger_multiplicity,
                    signal_multiplicity: *signal_multiplicity,
                    clipping: clipping.clone(),
                }))
            }
            AnalysisConfig::DoublePulse {
                tolerance,
                signatures,
            } => {
                if signatures.is_empty() {
                    return Err(ConfigError::invalid("signatures", "none given"));
                }
                for pattern in signatures {
                    if pattern.rows().is_empty() {
                        return Err(ConfigError::invalid("signatures", "empty pattern"));
                    }
                    if let Some(signature) = pattern
                        .rows()
                        .iter()
                        .find(|signature| signature.len() != channels.len())
                    {
                        return Err(ConfigError::SignatureLength {
                            signature: signature.to_string(),
                            expected: channels.len(),
                            found: signature.len(),
                        });
                    }
                }
                Ok(Analysis::DoublePulse {
                    tolerance: *tolerance,
                    patterns: signatures.clone(),
                })
            }
            AnalysisConfig::Spectrum {
                trigger_position_tolerance,
            } => Ok(Analysis::Spectrum {
                trigger: config.trigger_channel,
                pre_trigger_samples: config.pre_trigger_samples,
                tolerance: *trigger_position_tolerance,
            }),
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Runs one record through every stage.
    ///
    /// Returns the records to emit, or the reason the event was rejected.
    #[tracing::instrument(skip_all, level = "debug", fields(num_samples = record.num_samples()))]
    pub fn evaluate(
        &self,
        record: &WaveformRecord,
    ) -> Result<Vec<PulseParameterRecord>, Rejection> {
        if let Some(channel) = self
            .channels
            .iter()
            .find(|&channel| record.trace(channel).is_none())
        {
            return Err(Rejection::MissingChannel(channel));
        }
        if record.num_samples() == 0 {
            return Err(Rejection::EmptyRecord);
        }
        if let Some(channel) = find_clipped_channel(record, &self.channels, &self.clipping) {
            return Err(Rejection::Clipped(channel));
        }

        let pulses = self.find_pulses(record)?;

        let output = match &self.analysis {
            Analysis::Coincidence(matcher) => {
                let selection = matcher.select(&self.channels, &pulses)?;
                self.extractor
                    .record(&self.channels, record, &pulses, &selection, None)?
            }
            Analysis::DoublePulse {
                tolerance,
                patterns,
            } => {
                let matrix = correlate_peaks(&self.channels, &pulses, *tolerance);
                let pattern = patterns
                    .iter()
                    .find(|pattern| pattern.matches(&self.channels, &matrix))
                    .ok_or(Rejection::SignatureMismatch)?;
                trace!(%pattern, rows = matrix.len(), "Signature matched");
                let first = matrix.row(0).ok_or(Rejection::SignatureMismatch)?;
                // Only a pattern spanning two groups measures a decay.
                let decay_time = if pattern.rows().len() >= 2 {
                    self.extractor.decay_time(&matrix)
                } else {
                    None
                };
                self.extractor
                    .record(&self.channels, record, &pulses, &first.cells, decay_time)?
            }
            Analysis::Spectrum {
                trigger,
                pre_trigger_samples,
                tolerance,
            } => {
                let reference = match trigger {
                    Some(trigger) => {
                        let index = closest_to(&pulses[*trigger], *pre_trigger_samples as Real)
                            .ok_or(Rejection::NoTriggerPulse(*trigger))?;
                        pulses[*trigger]
                            .get(index)
                            .ok_or(Rejection::NoTriggerPulse(*trigger))?
                            .peak
                            .position
                    }
                    None => *pre_trigger_samples,
                };
                let selection = self.near_reference(&pulses, reference, *tolerance);
                if selection.iter().all(|(_, index)| index.is_none()) {
                    return Err(Rejection::NoContributingChannel);
                }
                self.extractor
                    .record(&self.channels, record, &pulses, &selection, None)?
            }
        };
        Ok(vec![output])
    }

    /// Runs [Self::evaluate] and accounts for its outcome in the metrics.
    pub fn process(&self, record: &WaveformRecord) -> Option<Vec<PulseParameterRecord>> {
        counter!(EVENTS_RECEIVED).increment(1);
        match self.evaluate(record) {
            Ok(records) => {
                counter!(EVENTS_ACCEPTED).increment(1);
                counter!(RECORDS_EMITTED).increment(records.len() as u64);
                Some(records)
            }
            Err(rejection) => {
                debug!(%rejection, "Event rejected");
                counter!(
                    EVENTS_REJECTED,
                    &[rejections::get_label(rejection.kind())]
                )
                .increment(1);
                None
            }
        }
    }

    /// Processes `records` in parallel, keeping their order.
    pub fn process_batch(
        &self,
        records: &[WaveformRecord],
    ) -> Vec<Option<Vec<PulseParameterRecord>>> {
        records.par_iter().map(|record| self.process(record)).collect()
    }

    #[tracing::instrument(skip_all, level = "trace")]
    fn find_pulses(&self, record: &WaveformRecord) -> Result<ChannelMap<Vec<Pulse>>, Rejection> {
        let mut pulses = ChannelMap::<Vec<Pulse>>::default();
        for channel in self.channels.iter() {
            let trace = record
                .trace(channel)
                .ok_or(Rejection::MissingChannel(channel))?;
            let peaks = find_peaks(trace, &self.peaks[channel]);
            pulses[channel] = self.onset.estimate(trace, peaks);
        }
        Ok(pulses)
    }

    /// For every channel, the last pulse strictly within `tolerance` of
    /// `reference`.
    fn near_reference(
        &self,
        pulses: &ChannelMap<Vec<Pulse>>,
        reference: usize,
        tolerance: usize,
    ) -> Selection {
        let mut selection = Selection::default();
        for channel in self.channels.iter() {
            selection[channel] = pulses[channel]
                .iter()
                .rposition(|pulse| pulse.peak.position.abs_diff(reference) < tolerance);
        }
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse_detection::ChannelPulse;
    use assert_approx_eq::assert_approx_eq;

    const LEN: usize = 400;

    /// Triangular pulses of half-width 4 on a zero baseline.
    fn trace(pulses: &[(usize, Real)]) -> Vec<Real> {
        (0..LEN)
            .map(|i| {
                pulses
                    .iter()
                    .map(|&(position, amplitude)| {
                        let distance = i.abs_diff(position) as Real;
                        (amplitude * (1.0 - distance / 4.0)).max(0.0)
                    })
                    .fold(0.0, Real::max)
            })
            .collect()
    }

    fn record(ch1: &[(usize, Real)], ch2: &[(usize, Real)]) -> WaveformRecord {
        WaveformRecord::new([(Channel::Ch1, trace(ch1)), (Channel::Ch2, trace(ch2))]).unwrap()
    }

    fn pipeline(analysis: &str, extra: &str) -> Result<Pipeline, ConfigError> {
        let json = format!(
            r#"{{
                "version": 1,
                "channels": ["ch1", "ch2"],
                "sample_period_ns": 4.0,
                "pre_trigger_samples": 50,
                "clipping": 100.0,
                "peaks": {{"prominence": 10.0}},
                {extra}
                "analysis": {analysis}
            }}"#
        );
        Pipeline::new(PipelineConfig::from_json(&json)?)
    }

    fn coincidence() -> Pipeline {
        pipeline(
            r#"{"kind": "coincidence", "windows": {"ch2": {"offset": 2.0, "width": 4.0}}}"#,
            r#""trigger_channel": "ch1","#,
        )
        .unwrap()
    }

    fn double_pulse() -> Pipeline {
        pipeline(
            r#"{"kind": "double_pulse", "tolerance": 5, "signatures": [["++", "+-"], ["++", "-+"]]}"#,
            "",
        )
        .unwrap()
    }

    fn spectrum(trigger: bool) -> Pipeline {
        pipeline(
            r#"{"kind": "spectrum", "trigger_position_tolerance": 5}"#,
            if trigger {
                r#""trigger_channel": "ch1","#
            } else {
                ""
            },
        )
        .unwrap()
    }

    fn single(result: Result<Vec<PulseParameterRecord>, Rejection>) -> PulseParameterRecord {
        let mut records = result.unwrap();
        assert_eq!(records.len(), 1);
        records.remove(0)
    }

    #[test]
    fn coincidence_accepts() {
        let output = single(coincidence().evaluate(&record(&[(50, 40.0)], &[(52, 30.0)])));
        assert_eq!(output.pulses[Channel::Ch1].position, 50);
        assert_eq!(output.pulses[Channel::Ch2].position, 52);
        assert_approx_eq!(output.pulses[Channel::Ch1].height, 40.0);
        assert_approx_eq!(output.pulses[Channel::Ch2].height, 30.0);
        // Half height is crossed at 48 and 52: samples 20, 30, 40, 30.
        assert_approx_eq!(output.pulses[Channel::Ch1].integral, 120.0 * 4.0e-9 / 250.0);
        assert_eq!(output.decay_time, None);
    }

    #[test]
    fn clipped_record_is_rejected() {
        assert_eq!(
            coincidence().evaluate(&record(&[(50, 40.0)], &[(52, 120.0)])),
            Err(Rejection::Clipped(Channel::Ch2))
        );
        assert_eq!(
            coincidence().process(&record(&[(50, 40.0)], &[(52, 120.0)])),
            None
        );
    }

    #[test]
    fn coincidence_window_rejects() {
        assert_eq!(
            coincidence().evaluate(&record(&[(50, 40.0)], &[(60, 30.0)])),
            Err(Rejection::OutsideCoincidenceWindow(Channel::Ch2))
        );
        assert_eq!(
            coincidence().evaluate(&record(&[], &[(52, 30.0)])),
            Err(Rejection::NoTriggerPulse(Channel::Ch1))
        );
    }

    #[test]
    fn missing_and_empty_records() {
        let partial = WaveformRecord::new([(Channel::Ch1, trace(&[(50, 40.0)]))]).unwrap();
        assert_eq!(
            coincidence().evaluate(&partial),
            Err(Rejection::MissingChannel(Channel::Ch2))
        );
        let empty = WaveformRecord::new([(Channel::Ch1, vec![]), (Channel::Ch2, vec![])]).unwrap();
        assert_eq!(coincidence().evaluate(&empty), Err(Rejection::EmptyRecord));
    }

    #[test]
    fn double_pulse_measures_decay_time() {
        let output = single(
            double_pulse().evaluate(&record(&[(50, 40.0), (300, 35.0)], &[(52, 30.0)])),
        );
        assert_eq!(output.pulses[Channel::Ch1].position, 50);
        assert_eq!(output.pulses[Channel::Ch2].position, 52);
        assert_approx_eq!(output.decay_time.unwrap(), 1000.0);

        let output = single(
            double_pulse().evaluate(&record(&[(50, 40.0)], &[(52, 30.0), (152, 30.0)])),
        );
        assert_approx_eq!(output.decay_time.unwrap(), 408.0);
    }

    #[test]
    fn single_group_pattern_has_no_decay_time() {
        let pipeline = pipeline(
            r#"{"kind": "double_pulse", "tolerance": 5, "signatures": [["++"]]}"#,
            "",
        )
        .unwrap();
        // The trailing ch1 pulse forms a second row the pattern says nothing about.
        let output =
            single(pipeline.evaluate(&record(&[(50, 40.0), (300, 35.0)], &[(52, 30.0)])));
        assert_eq!(output.pulses[Channel::Ch1].position, 50);
        assert_eq!(output.pulses[Channel::Ch2].position, 52);
        assert_eq!(output.decay_time, None);
    }

    #[test]
    fn double_pulse_needs_matching_signature() {
        assert_eq!(
            double_pulse().evaluate(&record(&[(50, 40.0)], &[(52, 30.0)])),
            Err(Rejection::SignatureMismatch)
        );
        assert_eq!(
            double_pulse().evaluate(&record(&[(50, 40.0), (300, 35.0)], &[(52, 30.0), (301, 30.0)])),
            Err(Rejection::SignatureMismatch)
        );
    }

    #[test]
    fn spectrum_with_trigger() {
        let output = single(spectrum(true).evaluate(&record(&[(48, 40.0)], &[(51, 30.0)])));
        assert_eq!(output.pulses[Channel::Ch1].position, 48);
        assert_eq!(output.pulses[Channel::Ch2].position, 51);

        let output = single(spectrum(true).evaluate(&record(&[(48, 40.0)], &[(200, 30.0)])));
        assert_eq!(output.pulses[Channel::Ch2], ChannelPulse::default());

        assert_eq!(
            spectrum(true).evaluate(&record(&[], &[(50, 30.0)])),
            Err(Rejection::NoTriggerPulse(Channel::Ch1))
        );
    }

    #[test]
    fn spectrum_without_trigger() {
        // Equally close to the nominal position 50; the later pulse is kept.
        let output = single(spectrum(false).evaluate(&record(&[], &[(47, 40.0), (53, 40.0)])));
        assert_eq!(output.pulses[Channel::Ch1], ChannelPulse::default());
        assert_eq!(output.pulses[Channel::Ch2].position, 53);

        assert_eq!(
            spectrum(false).evaluate(&record(&[(100, 40.0)], &[(200, 30.0)])),
            Err(Rejection::NoContributingChannel)
        );
    }

    #[test]
    fn processing_is_repeatable() {
        let pipeline = double_pulse();
        let event = record(&[(50, 40.0), (300, 35.0)], &[(52, 30.0)]);
        assert_eq!(pipeline.evaluate(&event), pipeline.evaluate(&event));
        assert_eq!(pipeline.process(&event), pipeline.process(&event));
    }

    #[test]
    fn batch_keeps_order() {
        let records = [
            record(&[(50, 40.0)], &[(52, 30.0)]),
            record(&[(50, 40.0)], &[(52, 120.0)]),
            record(&[(50, 40.0)], &[(51, 30.0)]),
        ];
        let outputs = coincidence().process_batch(&records);
        assert_eq!(outputs.len(), 3);
        assert!(outputs[1].is_none());
        let positions: Vec<_> = [&outputs[0], &outputs[2]]
            .iter()
            .map(|output| output.as_ref().unwrap()[0].pulses[Channel::Ch2].position)
            .collect();
        assert_eq!(positions, [52, 51]);
    }

    #[test]
    fn configuration_errors() {
        assert!(matches!(
            pipeline(
                r#"{"kind": "coincidence", "windows": {"ch2": {"offset": 2.0, "width": 4.0}}}"#,
                ""
            ),
            Err(ConfigError::TriggerRequired("coincidence"))
        ));
        assert!(matches!(
            pipeline(
                r#"{"kind": "coincidence", "windows": {}}"#,
                r#""trigger_channel": "ch1","#
            ),
            Err(ConfigError::MissingWindow(Channel::Ch2))
        ));
        assert!(matches!(
            pipeline(
                r#"{"kind": "double_pulse", "tolerance": 5, "signatures": [["+++"]]}"#,
                ""
            ),
            Err(ConfigError::SignatureLength {
                expected: 2,
                found: 3,
                ..
            })
        ));
        assert!(matches!(
            pipeline(
                r#"{"kind": "spectrum", "trigger_position_tolerance": 5}"#,
                r#""onset": {"method": "gradient", "bounds": {"upper": -1.0, "lower": 1.0}},"#
            ),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn gradient_onset_heights() {
        let pipeline = pipeline(
            r#"{"kind": "spectrum", "trigger_position_tolerance": 5}"#,
            r#""onset": {"method": "gradient", "bounds": {"upper": 1.0, "lower": -1.0}},"#,
        )
        .unwrap();
        let output = single(pipeline.evaluate(&record(&[(50, 40.0)], &[])));
        // The rising edge starts from the flat baseline.
        assert_approx_eq!(output.pulses[Channel::Ch1].height, 40.0);
    }
}
