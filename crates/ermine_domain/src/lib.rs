#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod entity;
mod patch;

pub use entity::{
	AuthorRef, Channel, ChannelKind, CustomEmoji, FileRef, Member, Message, Presence, Profile, RelationshipStatus,
	Role, Server, User, UserStatus, resolve_author,
};
pub use patch::{
	ChannelField, ChannelPatch, MemberField, MemberPatch, MessagePatch, ServerField, ServerPatch, UserField, UserPatch,
};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
}

macro_rules! id_newtype {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty identifier.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				$name::new(s.to_string())
			}
		}
	};
}

id_newtype!(
	/// User identifier (lexically sortable, ULID-shaped).
	UserId
);
id_newtype!(
	/// Server (community/space) identifier.
	ServerId
);
id_newtype!(
	/// Channel identifier.
	ChannelId
);

/// Message identifier. Lexically sortable and time-ordered; also serves as an
/// implicit timestamp source when the message carries no explicit timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}

	/// Decode the 48-bit millisecond timestamp prefix of a ULID identifier.
	///
	/// Returns `None` for identifiers that are not ULID-shaped (e.g. local
	/// provisional ids).
	pub fn timestamp_ms(&self) -> Option<u64> {
		if self.0.len() != 26 {
			return None;
		}
		// get() fails when byte 10 is not a char boundary, i.e. the id is
		// not plain base32 to begin with.
		let prefix = self.0.get(..10)?;

		let mut ms: u64 = 0;
		for c in prefix.chars() {
			ms = ms.checked_mul(32)?.checked_add(crockford_value(c)? as u64)?;
		}
		Some(ms)
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for MessageId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		MessageId::new(s.to_string())
	}
}

fn crockford_value(c: char) -> Option<u8> {
	// Crockford base32: I, L, O and U are excluded.
	const ALPHABET: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";
	ALPHABET.find(c.to_ascii_uppercase()).map(|i| i as u8)
}

/// Composite member identity: `(server, user)` is the durable key, unique and
/// distinct from the `User` record it decorates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberKey {
	pub server: ServerId,
	pub user: UserId,
}

impl MemberKey {
	pub fn new(server: ServerId, user: UserId) -> Self {
		Self { server, user }
	}
}

impl fmt::Display for MemberKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.server, self.user)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_empty_ids() {
		assert!(UserId::new("").is_err());
		assert!(MessageId::new("   ").is_err());
		assert!("".parse::<ChannelId>().is_err());
	}

	#[test]
	fn id_ordering_is_lexical() {
		let a = MessageId::new("01AAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
		let b = MessageId::new("01BBBBBBBBBBBBBBBBBBBBBBBB").unwrap();
		assert!(a < b);
	}

	#[test]
	fn ulid_timestamp_prefix_decodes() {
		// 01ARZ3NDEKTSV4RRFFQ69G5FAV is the canonical ULID example; its time
		// prefix 01ARZ3NDEK decodes to 1469918176385 ms.
		let id = MessageId::new("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
		assert_eq!(id.timestamp_ms(), Some(1_469_918_176_385));
	}

	#[test]
	fn non_ulid_ids_have_no_timestamp() {
		let id = MessageId::new("local:abc").unwrap();
		assert_eq!(id.timestamp_ms(), None);
	}

	#[test]
	fn multibyte_ids_have_no_timestamp() {
		// 26 bytes long, but byte 10 falls inside the two-byte "é".
		let id = MessageId::new("012345678é0123456789ABCDE").unwrap();
		assert_eq!(id.timestamp_ms(), None);
	}

	#[test]
	fn member_key_display() {
		let key = MemberKey::new(ServerId::new("s1").unwrap(), UserId::new("u1").unwrap());
		assert_eq!(key.to_string(), "s1:u1");
	}
}
