use clap::Parser;
use env_logger::Env;
use log::info;
use serde::Serialize;

use raster_pipeline::cli::{Args, Command};
use raster_pipeline::error::{RasterError, Result};
use raster_pipeline::{compute_statistics, convert, inspect, reproject};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| RasterError::invalid(format!("failed to build thread pool: {}", e)))?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    match &args.command {
        Command::Info(info_args) => {
            let raster_info = inspect(&info_args.input, info_args.band)?;
            print_json(&raster_info)
        }
        Command::Stats(stats_args) => {
            let result = compute_statistics(&stats_args.input, &stats_args.to_params())?;
            print_json(&result)
        }
        Command::Reproject(reproject_args) => {
            let params = reproject_args.to_params()?;
            let result = reproject(&reproject_args.input, &reproject_args.output, &params)?;
            print_json(&result)
        }
        Command::Convert(convert_args) => {
            let options = convert_args.to_options()?;
            let result = convert(&convert_args.input, &convert_args.output, &options)?;
            print_json(&result)
        }
    }
}
