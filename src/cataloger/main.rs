// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("simple-camera-cataloger requires the 'std' feature");

use asimov_module::SysexitsError::{self, *};
use clap::Parser;
use clientele::StandardOptions;
use serde_json::json;
use simple_camera::{
    cli::{self, handle_error},
    shared::{CameraConfig, CameraError, MAX_PROBED_DEVICES, default_provider, list_available_devices},
};
use std::error::Error as StdError;

#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    #[arg(
        value_name = "FORMAT",
        short = 'o',
        long = "output",
        value_enum,
        default_value = "text"
    )]
    output: OutputFormat,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Jsonl,
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(&options.flags).expect("failed to initialize logging");

    let exit_code = match run_cataloger(&options) {
        Ok(()) => EX_OK,
        Err(err) => handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_cataloger(options: &Options) -> Result<(), CameraError> {
    cli::info_user(
        &options.flags,
        &format!("probing camera devices 0..{}", MAX_PROBED_DEVICES - 1),
    );

    let config = CameraConfig::default().with_diagnostics(options.flags.debug || options.flags.verbose >= 3);
    let provider = default_provider(&config)?;

    let devices = list_available_devices(provider.as_ref());
    if devices.is_empty() {
        cli::warn_user(&options.flags, "no camera devices found");
        return Ok(());
    }

    for id in devices {
        match options.output {
            OutputFormat::Text => println!("{id}"),
            OutputFormat::Jsonl => {
                println!("{}", json!({ "id": id, "backend": format!("{:?}", provider.backend()) }));
            },
        }
    }

    Ok(())
}
