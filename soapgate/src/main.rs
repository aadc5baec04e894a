use std::path::PathBuf;

use serde_json::Value;
use structopt::StructOpt;
use thiserror::Error;

use soapgate::{logging, Adapter, BridgeConfig, BridgeError, ParamBag};
use soapgate_wsdl::{fetch::FetchOptions, Resolver};

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Invalid --json parameters: {0}")]
    InvalidParameters(String),

    #[error("Service is unhealthy")]
    Unhealthy,

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

#[derive(StructOpt)]
struct Args {
    /// TOML configuration file
    #[structopt(short, long, default_value = "soapgate.toml", parse(from_os_str))]
    config: PathBuf,

    #[structopt(short, long)]
    verbose: bool,

    #[structopt(long)]
    json_logs: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Resolve a definition and its imports into a single document
    Resolve { location: String },

    /// List the operations the service offers
    Methods,

    /// Invoke an operation
    Invoke {
        operation: String,

        /// Parameter as key=value, may be repeated
        #[structopt(short, long = "param", parse(try_from_str = parse_parameter))]
        params: Vec<(String, String)>,

        /// Parameters as a JSON object
        #[structopt(long)]
        json: Option<String>,
    },

    /// Check whether the service answers
    Health,

    /// Show the adapter configuration and state
    Info,

    /// Remove resolved definitions
    Cleanup,
}

fn parse_parameter(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected key=value, found {}", value)),
    }
}

fn parameters(params: Vec<(String, String)>, json: Option<String>) -> Result<ParamBag, Error> {
    let mut bag = match json {
        Some(json) => match serde_json::from_str::<Value>(&json).map_err(BridgeError::from)? {
            Value::Object(map) => map,
            other => return Err(Error::InvalidParameters(format!("{} is not an object", other))),
        },
        None => ParamBag::new(),
    };

    for (key, value) in params {
        bag.insert(key, Value::String(value));
    }

    Ok(bag)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Error> {
    let rendered = serde_json::to_string_pretty(value).map_err(BridgeError::from)?;
    println!("{}", rendered);
    Ok(())
}

fn adapter(config: BridgeConfig) -> Adapter {
    let adapter = Adapter::new(config);
    adapter.initialize();
    adapter
}

#[paw::main]
fn main(args: Args) -> Result<(), Error> {
    logging::init_cli_logger(args.verbose, args.json_logs);

    let config = BridgeConfig::load(Some(&args.config))?;

    match args.command {
        Command::Resolve { location } => {
            let resolver = Resolver::new(config.artifact_dir.clone()).with_options(FetchOptions {
                connect_timeout: config.connection_timeout(),
                read_timeout: config.receive_timeout(),
            });

            let resolution = resolver.resolve(&location).map_err(BridgeError::from)?;
            for reference in resolution.report.skipped() {
                eprintln!(
                    "skipped {:?} {} (from {})",
                    reference.kind, reference.location, reference.base
                );
            }

            println!("{}", resolution.location());
        }

        Command::Methods => {
            for name in adapter(config).operation_names() {
                println!("{}", name);
            }
        }

        Command::Invoke {
            operation,
            params,
            json,
        } => {
            let bag = parameters(params, json)?;
            let result = adapter(config).invoke(&operation, &bag)?;
            print_json(&result)?;
        }

        Command::Health => {
            if !adapter(config).is_healthy() {
                return Err(Error::Unhealthy);
            }

            println!("healthy");
        }

        Command::Info => print_json(&adapter(config).service_info())?,

        Command::Cleanup => {
            let removed = Adapter::new(config).cleanup_artifacts()?;
            println!("removed {} resolved definitions", removed);
        }
    }

    Ok(())
}
