use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use muon_lifetime_common::{
    init_tracer,
    metrics::{
        failures::{self, FailureKind},
        metric_names::FAILURES,
    },
    tracer::TracerOptions,
};
use pulse_filter::{
    Pipeline, PipelineConfig, WaveformRecord,
    simulator::{MuonSimulator, RecordLayout, SimulatorParameters},
};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, IsTerminal, Write},
    net::SocketAddr,
    path::PathBuf,
};
use tracing::{debug, info, level_filters::LevelFilter, warn};

// cargo run --bin pulse-filter -- --config pipeline.json simulate --events 10000 --seed 1
// cargo run --bin pulse-filter -- --config pipeline.json replay --input records.jsonl

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Pipeline configuration, a JSON document.
    #[clap(long, env)]
    config: PathBuf,

    /// If set, Prometheus metrics are served from this address.
    #[clap(long, env)]
    observability_address: Option<SocketAddr>,

    /// Log level used when RUST_LOG is not set.
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,

    /// Number of records handed to the worker threads at once.
    #[clap(long, default_value_t = 256)]
    batch_size: usize,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    #[clap(about = "Filters events produced by the built-in muon simulator.")]
    Simulate {
        /// Number of events to generate.
        #[clap(long, default_value_t = 1000)]
        events: usize,

        #[command(flatten)]
        parameters: SimulatorParameters,
    },
    #[clap(
        about = "Filters waveform records read as JSON lines, e.g. {\"ch1\": [..], \"ch2\": [..]}."
    )]
    Replay {
        /// File to read; standard input if omitted.
        #[clap(long)]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let _tracer = init_tracer!(TracerOptions {
        level: args.log_level,
        ansi: io::stderr().is_terminal(),
    })?;

    if let Some(address) = args.observability_address {
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("Prometheus metrics exporter should be set up")?;
        info!("Serving metrics on {address}");
    }
    pulse_filter::metrics::register(env!("CARGO_BIN_NAME"));

    let config = PipelineConfig::load(&args.config)?;
    let pipeline = Pipeline::new(config.clone())?;
    let batch_size = args.batch_size.max(1);

    let mut output = BufWriter::new(io::stdout().lock());
    let emitted = match args.mode {
        Mode::Simulate { events, parameters } => {
            let layout = RecordLayout {
                channels: config.channel_set()?,
                sample_period_ns: config.sample_period_ns,
                pre_trigger_samples: config.pre_trigger_samples,
                baseline: config.analogue_offset_mv,
            };
            let mut simulator = MuonSimulator::new(layout, &parameters)?;
            simulate(&pipeline, &mut simulator, events, batch_size, &mut output)?
        }
        Mode::Replay { input } => {
            let reader: Box<dyn BufRead> = match input {
                Some(path) => Box::new(BufReader::new(
                    File::open(&path)
                        .with_context(|| format!("Cannot open {}", path.display()))?,
                )),
                None => Box::new(io::stdin().lock()),
            };
            replay(&pipeline, reader, batch_size, &mut output)?
        }
    };
    output.flush()?;

    info!(emitted, "Finished");
    Ok(())
}

fn simulate<W: Write>(
    pipeline: &Pipeline,
    simulator: &mut MuonSimulator,
    events: usize,
    batch_size: usize,
    output: &mut W,
) -> Result<usize> {
    let mut emitted = 0;
    let mut remaining = events;
    while remaining > 0 {
        let len = remaining.min(batch_size);
        let batch = (0..len)
            .map(|_| simulator.next_record())
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|_| {
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::SimulationFailed)]
                )
                .increment(1);
            })?;
        emitted += emit(pipeline, &batch, output)?;
        remaining -= len;
    }
    Ok(emitted)
}

fn replay<R: BufRead, W: Write>(
    pipeline: &Pipeline,
    reader: R,
    batch_size: usize,
    output: &mut W,
) -> Result<usize> {
    let mut emitted = 0;
    let mut batch = Vec::with_capacity(batch_size);
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Unable to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WaveformRecord>(&line) {
            Ok(record) => batch.push(record),
            Err(e) => {
                warn!(line = index + 1, "Unable to decode record: {e}");
                counter!(
                    FAILURES,
                    &[failures::get_label(FailureKind::UnableToDecodeRecord)]
                )
                .increment(1);
            }
        }
        if batch.len() >= batch_size {
            emitted += emit(pipeline, &batch, output)?;
            batch.clear();
        }
    }
    emitted += emit(pipeline, &batch, output)?;
    Ok(emitted)
}

/// Processes `records` and writes every resulting record as one JSON line.
fn emit<W: Write>(
    pipeline: &Pipeline,
    records: &[WaveformRecord],
    output: &mut W,
) -> Result<usize> {
    let mut emitted = 0;
    for record in pipeline.process_batch(records).into_iter().flatten().flatten() {
        let written = serde_json::to_writer(&mut *output, &record)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(output));
        if let Err(e) = written {
            counter!(
                FAILURES,
                &[failures::get_label(FailureKind::OutputWriteFailed)]
            )
            .increment(1);
            return Err(e).context("Unable to write pulse-parameter record");
        }
        emitted += 1;
    }
    debug!(records = records.len(), emitted, "Batch processed");
    Ok(emitted)
}
