use std::error::Error as _;

use clap::Parser;
use wsm_cli::{cli::Cli, commands, error::CliError, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		handle_error(&err);
		std::process::exit(1);
	}
}

fn handle_error(err: &CliError) {
	eprintln!("error: {err}");
	let mut source = err.source();
	while let Some(cause) = source {
		eprintln!("  caused by: {cause}");
		source = cause.source();
	}
}
