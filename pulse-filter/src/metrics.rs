use metrics::{Unit, describe_counter};
use muon_lifetime_common::metrics::{
    component_info_metric,
    metric_names::{EVENTS_ACCEPTED, EVENTS_RECEIVED, EVENTS_REJECTED, FAILURES, RECORDS_EMITTED},
};

/// Describes every metric this component emits.
/// Call once, after the recorder is installed.
pub fn register(component: &'static str) {
    component_info_metric(component);

    describe_counter!(EVENTS_RECEIVED, Unit::Count, "Number of waveform records received");
    describe_counter!(
        EVENTS_ACCEPTED,
        Unit::Count,
        "Number of events passing every filter"
    );
    describe_counter!(
        EVENTS_REJECTED,
        Unit::Count,
        "Number of events rejected, by reason"
    );
    describe_counter!(
        RECORDS_EMITTED,
        Unit::Count,
        "Number of pulse-parameter records emitted"
    );
    describe_counter!(
        FAILURES,
        Unit::Count,
        "Number of failures encountered"
    );
}
