#![forbid(unsafe_code)]

//! Wire types for the Ermine gateway and REST API.
//!
//! Every gateway frame is a JSON object with a `type` discriminant; unknown
//! discriminants decode to [`ServerEvent::Unknown`] so new server event kinds
//! never break older clients.

mod events;
mod rest;

pub use events::{ClientEvent, ServerEvent};
pub use rest::{
	ApiFeatures, ApiInfo, CdnFeature, CreateServerBody, EditMessageBody, LoginBody, LoginResponse, MembersResponse,
	MessagesPage, MfaResponse, ReplyIntent, SendMessageBody,
};

use thiserror::Error;

/// Errors for decoding gateway frames.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("invalid event json: {0}")]
	Json(#[from] serde_json::Error),
}

/// Decode one gateway text frame into a [`ServerEvent`].
pub fn decode_event(frame: &str) -> Result<ServerEvent, DecodeError> {
	Ok(serde_json::from_str(frame)?)
}

/// Encode one client→server message as a JSON text frame.
pub fn encode_client_event(event: &ClientEvent) -> String {
	// ClientEvent serialization cannot fail: no maps with non-string keys.
	serde_json::to_string(event).expect("client event serializes")
}
