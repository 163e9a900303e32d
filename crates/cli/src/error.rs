use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config file {}", path.display())]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config file {}", path.display())]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid value for {name}: {value:?}")]
	InvalidEnv { name: &'static str, value: String },

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("failed to bind {addr}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Session(#[from] wsm::Error),

	#[error(transparent)]
	Runtime(#[from] wsm_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}
