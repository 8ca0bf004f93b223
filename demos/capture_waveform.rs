// Capture waveforms and save them as CSV
//
// Arms the scope (optionally single shot with a forced trigger), waits for the
// trigger, reads the requested channels window by window and writes one
// table with a time column and a voltage column per channel.

use clap::Parser;
use rigolscope_rs::waveform::write_csv;
use rigolscope_rs::{
    DiscoveryError, RunRequest, ScopeConfig, ScopeConnector, WaveMode,
};
use std::process;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "capture_waveform")]
#[command(about = "Read waveforms from a Rigol oscilloscope into a CSV file")]
struct Args {
    /// Resource name prefix, or a full ASRL/TCPIP resource name
    #[arg(default_value = rigolscope_rs::discovery::DEFAULT_PREFIX)]
    resource: String,

    /// Output file
    #[arg(short, long, default_value = "waveform.csv")]
    output: String,

    /// Channels to read (defaults to the displayed ones)
    #[arg(short = 'n', long, value_delimiter = ',')]
    channels: Vec<u8>,

    /// Window start in seconds relative to the trigger
    #[arg(long, allow_hyphen_values = true, requires = "end")]
    start: Option<f64>,

    /// Window end in seconds relative to the trigger
    #[arg(long, allow_hyphen_values = true, requires = "start")]
    end: Option<f64>,

    /// Arm a single acquisition and force a trigger before reading
    #[arg(short, long)]
    single: bool,

    /// Give up waiting for a trigger after this many milliseconds
    #[arg(short, long, default_value_t = 5000)]
    wait_ms: u64,

    /// Write sample codes and indices instead of volts and seconds
    #[arg(long)]
    raw: bool,

    /// Per-read transport timeout in milliseconds, overriding the configuration
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Abort on the first failed chunk
    #[arg(long)]
    strict: bool,

    #[arg(short, long, default_value = "rigolscope.toml")]
    config: String,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut config = ScopeConfig::load_from(&args.config)?.with_strict(args.strict);
    if let Some(ms) = args.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    let connected = if args.resource.starts_with("ASRL") || args.resource.starts_with("TCPIP") {
        ScopeConnector::connect_resource(&args.resource, &config)
    } else {
        ScopeConnector::connect(&args.resource, &config)
    };
    let mut scope = match connected {
        Ok(scope) => scope,
        Err(e @ (DiscoveryError::NoInstrument { .. } | DiscoveryError::AmbiguousInstrument { .. })) => {
            eprintln!("{}", e);
            for candidate in e.candidates() {
                eprintln!("  {}", candidate);
            }
            process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let identity = scope.identify()?;
    println!("Connected to {} {} ({})", identity.manufacturer, identity.model, identity.serial_number);

    if args.single {
        let request = RunRequest::single()
            .forced()
            .wait_up_to(Duration::from_millis(args.wait_ms));
        if !scope.run(request)? {
            eprintln!("No trigger within {} ms, reading whatever is in memory", args.wait_ms);
        }
    } else if !scope.wait_for_trigger(Some(Duration::from_millis(args.wait_ms)))? {
        eprintln!("No trigger within {} ms, reading whatever is in memory", args.wait_ms);
    }
    scope.stop()?;

    let channels = (!args.channels.is_empty()).then_some(args.channels.as_slice());
    let window = args.start.zip(args.end);
    let mode = if args.raw { WaveMode::Raw } else { WaveMode::Calibrated };

    let started = Instant::now();
    let mut table = scope.get_wave(channels, window, mode)?;
    println!(
        "Read {} samples x {} columns in {:.2?}",
        table.height(),
        table.width(),
        started.elapsed()
    );

    let error = scope.error()?;
    if error.is_error() {
        log::warn!("Instrument reported {}: {}", error.code, error.message);
    }

    write_csv(&mut table, &args.output)?;
    println!("Saved to {}", args.output);
    Ok(())
}
