use clap::Parser;
use ctf_reader::EventDefinition;
use ctf_reader::Trace;
use ctf_reader::TraceReader;
use eyre::Context;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

mod cli {
    use std::path::PathBuf;

    #[derive(clap_derive::Parser)]
    #[command(version, about)]
    /// Decode a CTF trace and write its events as JSON lines
    pub struct Cli {
        #[clap(short, long)]
        pub verbose: bool,
        /// The trace directory
        pub trace: PathBuf,
        /// The pre-parsed trace schema (JSON)
        #[clap(short, long)]
        pub schema: PathBuf,
        /// Keep reading as a running tracer appends to the trace
        #[clap(long)]
        pub live: bool,
        /// Start at the first event at or after this timestamp (in cycles)
        #[clap(long, conflicts_with = "rank")]
        pub seek: Option<u64>,
        /// Start at the event with this rank
        #[clap(long)]
        pub rank: Option<u64>,
        /// Stop after this many events
        #[clap(short = 'n', long)]
        pub limit: Option<u64>,
        /// Log per stream statistics at the end
        #[clap(long)]
        pub stats: bool,
        /// The name of the output file to write (default: stdout)
        #[clap(short, long)]
        pub output: Option<PathBuf>,
    }
}

/// One output line.
#[derive(serde_derive::Serialize)]
struct Record<'a> {
    timestamp_ns: u64,
    #[serde(flatten)]
    event: &'a EventDefinition,
}

/// How long to sleep between checks for new data in live mode.
const LIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = cli::Cli::parse();
    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let metadata = ctf_reader::metadata::load_schema(&cli.schema)
        .wrap_err_with(|| format!("Failed to load schema {}", cli.schema.display()))?;
    let trace = Trace::open(&cli.trace, metadata)
        .wrap_err_with(|| format!("Failed to open trace {}", cli.trace.display()))?;
    log_trace_info(&trace);
    let trace = Arc::new(trace);

    let mut reader = TraceReader::new(trace.clone())?;
    reader.set_live(cli.live);
    if let Some(timestamp) = cli.seek {
        reader
            .seek(timestamp)
            .wrap_err_with(|| format!("Failed to seek to {timestamp}"))?;
    } else if let Some(rank) = cli.rank {
        reader
            .seek_rank(rank)
            .wrap_err_with(|| format!("Failed to seek to rank {rank}"))?;
    }

    let file: &mut dyn Write = match &cli.output {
        Some(output) => &mut std::fs::File::create(output)?,
        None => &mut std::io::stdout().lock(),
    };
    let mut writer = std::io::BufWriter::new(file);

    let limit = cli.limit.unwrap_or(u64::MAX);
    let mut written = 0;
    loop {
        while written < limit {
            let Some(event) = reader.current_event() else {
                break;
            };
            let record = Record {
                timestamp_ns: trace.cycles_to_nanos(event.timestamp),
                event,
            };
            serde_json::to_writer(&mut writer, &record)?;
            writeln!(writer)?;
            written += 1;
            if !advance(&mut reader) {
                break;
            }
        }
        if !cli.live || written >= limit {
            break;
        }
        writer.flush()?;
        std::thread::sleep(LIVE_POLL_INTERVAL);
        let added = reader.update()?;
        if added > 0 {
            log::info!("Found {added} new stream files");
        }
        if reader.current_event().is_none() {
            advance(&mut reader);
        }
    }
    writer.flush()?;

    if cli.stats {
        if let (Some(start), Some(end)) = (reader.start_time(), reader.end_time()) {
            log::info!(
                "Trace spans {} to {} ns",
                trace.cycles_to_nanos(start),
                trace.cycles_to_nanos(end)
            );
        }
        reader.log_stats(60);
    }
    Ok(())
}

/// Move the reader forward. A stream that fails to decode is reported and
/// dropped, the others carry on.
fn advance(reader: &mut TraceReader) -> bool {
    match reader.advance() {
        Ok(more) => more,
        Err(e) => {
            log::error!("{e}");
            reader.current_event().is_some()
        }
    }
}

fn log_trace_info(trace: &Trace) {
    let (major, minor) = trace.version();
    log::debug!(
        "CTF {major}.{minor} trace at {}, {} streams, byte order {:?}",
        trace.path().display(),
        trace.streams().len(),
        trace.byte_order()
    );
    if let Some(uuid) = trace.uuid() {
        log::debug!("UUID {uuid}");
    }
    for (key, value) in trace.environment() {
        log::debug!("env {key} = {value}");
    }
    for clock in trace.clocks() {
        log::debug!("clock {} at {} Hz", clock.name, clock.freq);
    }
}
