use thiserror::Error;

/// Errors surfaced by the session core. Transport failures recover via
/// reconnection; authentication failures end the session; request failures
/// are handled locally by the caller (rollback or silent no-op).
#[derive(Debug, Error)]
pub enum ClientError {
	/// Connection-level failure (drop, send failure).
	#[error("transport error: {0}")]
	Transport(String),

	/// Bad or expired credential. Fatal to the session.
	#[error("authentication failed: {0}")]
	Auth(String),

	/// A specific request was rejected with a non-success status.
	#[error("request failed (status={status}): {body}")]
	Request { status: u16, body: String },

	/// HTTP client error (connect, timeout, body decode).
	#[error(transparent)]
	Http(#[from] reqwest::Error),

	/// Malformed url or unexpected payload.
	#[error("protocol error: {0}")]
	Protocol(String),
}

impl ClientError {
	/// True for failures below the request level (the server was never
	/// reached or the connection broke mid-flight).
	pub fn is_transport_level(&self) -> bool {
		matches!(self, ClientError::Transport(_) | ClientError::Http(_))
	}
}
