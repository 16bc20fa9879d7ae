use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// The run ended with an error reported by the session.
	#[error("run failed: {0}")]
	RunFailed(String),

	#[error(transparent)]
	Runtime(#[from] runlink::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}
