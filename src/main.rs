use clap::Parser;
use tracing_subscriber::EnvFilter;

use uvc_session::cli::{self, Args, Command};
use uvc_session::config::Config;

fn main() {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Simulate(simulate) => cli::simulate(&simulate, &config),
        Command::Config { action } => cli::handle_config_action(action, args.config.as_deref()),
    }
}
