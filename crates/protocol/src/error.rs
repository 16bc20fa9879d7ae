use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding channel frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("malformed frame: {0}")]
	Malformed(String),

	#[error("unknown binary frame kind {0}")]
	UnknownKind(u8),

	/// Binary headers store each field length in a single byte.
	#[error("{field} is {len} bytes, binary frames allow at most 255")]
	FieldTooLong { field: &'static str, len: usize },

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
