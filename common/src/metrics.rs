use metrics::{describe_gauge, gauge};

pub fn component_info_metric(name: &'static str) {
    static NAME: &str = "muon_lifetime_component_info";

    describe_gauge!(NAME, "Basic information about the component");

    let git_rev = option_env!("GIT_VERSION").unwrap_or("unknown");
    gauge!(NAME, "component" => name, "git_version" => git_rev).set(1);
}

pub mod metric_names {
    use const_format::concatcp;

    pub const METRIC_NAME_PREFIX: &str = "muon_lifetime_";

    pub const EVENTS_RECEIVED: &str = concatcp!(METRIC_NAME_PREFIX, "events_received");
    pub const EVENTS_ACCEPTED: &str = concatcp!(METRIC_NAME_PREFIX, "events_accepted");
    pub const EVENTS_REJECTED: &str = concatcp!(METRIC_NAME_PREFIX, "events_rejected");
    pub const RECORDS_EMITTED: &str = concatcp!(METRIC_NAME_PREFIX, "records_emitted");
    pub const FAILURES: &str = concatcp!(METRIC_NAME_PREFIX, "failures");
}

pub mod rejections {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum RejectionKind {
        MissingChannel,
        EmptyRecord,
        Clipped,
        NoTriggerPulse,
        TriggerMultiplicity,
        SignalMultiplicity,
        OutsideCoincidenceWindow,
        SignatureMismatch,
        NoContributingChannel,
    }

    // Label building function
    pub fn get_label(rejection_kind: RejectionKind) -> (&'static str, &'static str) {
        (
            "rejection_kind",
            match rejection_kind {
                RejectionKind::MissingChannel => "missing_channel",
                RejectionKind::EmptyRecord => "empty_record",
                RejectionKind::Clipped => "clipped",
                RejectionKind::NoTriggerPulse => "no_trigger_pulse",
                RejectionKind::TriggerMultiplicity => "trigger_multiplicity",
                RejectionKind::SignalMultiplicity => "signal_multiplicity",
                RejectionKind::OutsideCoincidenceWindow => "outside_coincidence_window",
                RejectionKind::SignatureMismatch => "signature_mismatch",
                RejectionKind::NoContributingChannel => "no_contributing_channel",
            },
        )
    }
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        UnableToDecodeRecord,
        OutputWriteFailed,
        SimulationFailed,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::UnableToDecodeRecord => "unable_to_decode_record",
                FailureKind::OutputWriteFailed => "output_write_failed",
                FailureKind::SimulationFailed => "simulation_failed",
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            metric_names::EVENTS_RECEIVED,
            metric_names::EVENTS_ACCEPTED,
            metric_names::EVENTS_REJECTED,
            metric_names::RECORDS_EMITTED,
            metric_names::FAILURES,
        ] {
            assert!(name.starts_with(metric_names::METRIC_NAME_PREFIX));
        }
        assert_eq!(metric_names::EVENTS_REJECTED, "muon_lifetime_events_rejected");
    }

    #[test]
    fn labels() {
        assert_eq!(
            rejections::get_label(rejections::RejectionKind::OutsideCoincidenceWindow),
            ("rejection_kind", "outside_coincidence_window")
        );
        assert_eq!(
            failures::get_label(failures::FailureKind::UnableToDecodeRecord),
            ("failure_kind", "unable_to_decode_record")
        );
    }
}
