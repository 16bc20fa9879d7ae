//! Error types for the run session client.

use runlink_protocol::{ProtocolError, RunStatus};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the run channel backend.
#[derive(Debug, Error)]
pub enum Error {
	/// The socket could not be opened.
	#[error("Failed to connect to {url}: {reason}")]
	ConnectionFailed { url: String, reason: String },

	/// Transport-level failure on an open socket.
	#[error("Transport error: {0}")]
	Transport(String),

	/// A frame could not be encoded or decoded.
	#[error("Protocol error: {0}")]
	Protocol(#[from] ProtocolError),

	/// The server refused the channel join.
	#[error("Join of {topic} rejected: {reason}")]
	JoinRejected { topic: String, reason: String },

	/// Timeout waiting for a server acknowledgment.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// The channel or its connection is gone.
	#[error("Channel closed")]
	ChannelClosed,

	/// A push was attempted outside the `running` state.
	#[error("Run is {0}, start the run before pushing inputs")]
	NotRunning(RunStatus),

	/// A push was attempted with no channel behind the session.
	#[error("No run channel is open")]
	MissingChannel,

	/// Fetching a channel token failed.
	#[error("Channel authorization failed: {0}")]
	Auth(String),

	/// Uploading a file input over REST failed.
	#[error("File upload failed: {0}")]
	Upload(String),

	/// Configuration rejected at construction time.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if the error ends the current run attempt.
	///
	/// Block-level and misuse errors leave the run untouched.
	pub fn is_terminal_for_run(&self) -> bool {
		matches!(
			self,
			Error::ConnectionFailed { .. } | Error::Transport(_) | Error::JoinRejected { .. } | Error::Timeout(_) | Error::ChannelClosed | Error::Auth(_)
		)
	}
}
