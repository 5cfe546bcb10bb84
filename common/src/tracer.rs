use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub struct TracerOptions {
    /// Level used when `RUST_LOG` is not set.
    pub level: LevelFilter,
    /// Colour the output, only sensible when writing to a terminal.
    pub ansi: bool,
}

impl TracerOptions {
    pub fn new(level: LevelFilter) -> Self {
        Self { level, ansi: true }
    }
}

/// Owns the global tracing subscriber of a component.
///
/// Log lines are written to stderr so that stdout stays free for the
/// records a component emits.
pub struct TracerEngine {
    service_name: String,
}

impl TracerEngine {
    /// Initialises the stderr tracer for the crate
    /// #Arguments
    /// * `options` - The caller-specified instance of TracerOptions.
    /// * `service_name` - The name of the binary, recorded in the first log line.
    /// #Returns
    /// An instance of TracerEngine, or an error if a subscriber was already set.
    pub fn new(options: TracerOptions, service_name: &str) -> Result<Self, TracerError> {
        let log_filter = EnvFilter::builder()
            .with_default_directive(options.level.into())
            .from_env_lossy();

        let stderr_tracer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(options.ansi)
            .with_filter(log_filter);

        let subscriber = tracing_subscriber::Registry::default().with(stderr_tracer);
        tracing::subscriber::set_global_default(subscriber)?;

        tracing::info!("{service_name} tracer initialised");
        Ok(Self {
            service_name: service_name.to_owned(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Should be called at the start of each component
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {
        $crate::tracer::TracerEngine::new($options, env!("CARGO_BIN_NAME"))
    };
}
