// Save the scope screen, and optionally its setup, to files

use clap::Parser;
use rigolscope_rs::{DiscoveryError, ImageFormat, ScopeConfig, ScopeConnector, ScreenshotOptions};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "screenshot")]
#[command(about = "Capture the screen of a Rigol oscilloscope")]
struct Args {
    /// Output image; the extension picks the format. A temporary file when omitted.
    output: Option<PathBuf>,

    /// Resource name prefix
    #[arg(short, long, default_value = rigolscope_rs::discovery::DEFAULT_PREFIX)]
    resource: String,

    /// Image format, overriding the file extension (png, bmp, bmp8, jpg, tiff)
    #[arg(short, long)]
    format: Option<String>,

    #[arg(long)]
    monochrome: bool,

    #[arg(long)]
    invert: bool,

    /// Also save the instrument setup blob here
    #[arg(long)]
    setup: Option<PathBuf>,

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

    let mut options = ScreenshotOptions::default();
    if let Some(name) = &args.format {
        match ImageFormat::from_extension(name) {
            Some(format) => options = options.with_format(format),
            None => {
                eprintln!("Unknown image format: {}", name);
                process::exit(1);
            }
        }
    }
    if args.monochrome {
        options = options.monochrome();
    }
    if args.invert {
        options = options.inverted();
    }

    let config = ScopeConfig::load_from(&args.config)?;
    let mut scope = match ScopeConnector::connect(&args.resource, &config) {
        Ok(scope) => scope,
        Err(e @ (DiscoveryError::NoInstrument { .. } | DiscoveryError::AmbiguousInstrument { .. })) => {
            eprintln!("{}", e);
            process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let path = scope.save_screenshot(args.output.as_deref(), &options)?;
    println!("Screenshot saved to {}", path.display());

    if let Some(setup_path) = &args.setup {
        let setup = scope.setup()?;
        std::fs::write(setup_path, &setup)?;
        println!("Setup ({} bytes) saved to {}", setup.len(), setup_path.display());
    }
    Ok(())
}
