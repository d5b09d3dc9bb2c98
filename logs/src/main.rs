use crate::commands::{Command, Runner};
use clap::Parser;
use log::error;
use query_compiler::SystemClock;
use std::process::exit;
use std::sync::Arc;

mod commands;
mod config;

#[derive(Parser, Debug)]
#[command(version, about = "Logs explorer query compiler", long_about = None)]
struct CliArgs {
    #[arg(
        short,
        long,
        help = "Config file location",
        default_value = config::DEFAULT_CONFIG_PATH
    )]
    config_file: String,

    #[arg(long, help = "Application log level", default_value_t = log::LevelFilter::Info)]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli_args = CliArgs::parse();
    env_logger::builder()
        .filter_level(cli_args.log_level)
        .init();

    let config = match config::load(&cli_args.config_file) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            exit(1);
        }
    };

    let runner = Runner::new(&config, Arc::new(SystemClock));
    match runner.run(cli_args.command, std::io::stdin().lock()) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("Failed to run command: {}", e);
            exit(1);
        }
    }
}
