use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;
use crate::server;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = AppConfig::load(cli.config.as_deref())?;

	match cli.command {
		Commands::Serve(args) => {
			config.apply_overrides(&args);
			config.validate()?;
			server::run(config).await
		}
		Commands::Config(args) => {
			config.apply_overrides(&args);
			println!("{}", serde_json::to_string_pretty(&config.redacted())?);
			Ok(())
		}
	}
}
