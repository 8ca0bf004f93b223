// List every instrument the client can see
//
// USBTMC devices come from udev, serial ports from the OS, and socket hosts
// from the configuration file / RIGOLSCOPE_SOCKET_HOSTS.

use clap::Parser;
use rigolscope_rs::{ScopeConfig, ScopeConnector};

#[derive(Parser)]
#[command(name = "list_instruments")]
#[command(about = "List reachable SCPI instruments")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "rigolscope.toml")]
    config: String,

    /// Ask each instrument for its identity
    #[arg(short, long)]
    identify: bool,

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

    let config = ScopeConfig::load_from(&args.config)?;
    let resources = ScopeConnector::list_resources(&config)?;
    if resources.is_empty() {
        println!("No instruments found");
        return Ok(());
    }

    for resource in &resources {
        if !args.identify {
            println!("{}", resource);
            continue;
        }
        let identity = ScopeConnector::open(resource, &config)
            .map(|transport| rigolscope_rs::Oscilloscope::new(transport, config.clone()))
            .map_err(Box::<dyn std::error::Error>::from)
            .and_then(|mut scope| Ok(scope.identify()?));
        match identity {
            Ok(id) => println!("{}  {} {} (fw {})", resource, id.manufacturer, id.model, id.firmware),
            Err(e) => println!("{}  <{}>", resource, e),
        }
    }
    Ok(())
}
