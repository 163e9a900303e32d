use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "wsm")]
#[command(about = "Multi-session WhatsApp manager with an HTTP API and push channel")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to <config dir>/wsm/config.json when present)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the management API, push channel and session supervisors
	Serve(ServeArgs),

	/// Print the effective configuration (secrets redacted)
	Config(ServeArgs),
}

/// Flags that override the configuration file and environment.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Address to bind
	#[arg(long)]
	pub host: Option<String>,

	/// Port to bind
	#[arg(short, long)]
	pub port: Option<u16>,

	/// Root directory for per-session credentials
	#[arg(long, value_name = "DIR")]
	pub sessions_dir: Option<PathBuf>,

	/// Do not restore sessions from existing credential directories
	#[arg(long)]
	pub no_restore: bool,
}
