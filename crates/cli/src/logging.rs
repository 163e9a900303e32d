use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. `RUST_LOG` wins over `verbosity` and
/// accepts the dotted component targets, e.g. `wsm.reconnect=debug`.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings only (failed deliveries, mirror and auto-reply errors)
	// 1 (-v) = session lifecycle and HTTP requests
	// 2+ (-vv) = debug for everything, including webhook payload routing
	let filter = match verbosity {
		0 => "warn",
		1 => "info,tower_http=info",
		_ => "debug,hyper=info,reqwest=info",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
