//! Shared plumbing for the muon lifetime components: metric names and
//! labels, and the tracing subscriber set up by each binary.
pub mod metrics;
pub mod tracer;
