use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{ChannelId, MemberKey, MessageId, ServerId, UserId};

/// Reference to an uploaded file on the CDN (avatar, icon, attachment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
	#[serde(rename = "_id")]
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filename: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_type: Option<String>,
}

impl FileRef {
	/// CDN url for an avatar file, bounded to 256px.
	pub fn avatar_url(&self, cdn_base: &str) -> String {
		format!("{}/avatars/{}?max_side=256", cdn_base.trim_end_matches('/'), self.id)
	}

	/// CDN url for a server icon file.
	pub fn icon_url(&self, cdn_base: &str) -> String {
		format!("{}/icons/{}", cdn_base.trim_end_matches('/'), self.id)
	}
}

/// Presence indicator attached to a user's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
	Online,
	Idle,
	Busy,
	Focus,
	Invisible,
	Offline,
}

/// User-set status: presence plus an optional free-text note.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserStatus {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub presence: Option<Presence>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
}

/// Profile metadata (bio and banner).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub background: Option<FileRef>,
}

/// Relationship of a user to the session user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipStatus {
	None,
	User,
	Friend,
	Outgoing,
	Incoming,
	Blocked,
	BlockedOther,
}

/// A user record. Users accumulate for the whole session; they go stale but
/// are never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	#[serde(rename = "_id")]
	pub id: UserId,
	pub username: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub discriminator: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub display_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub avatar: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<UserStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub profile: Option<Profile>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub badges: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub relationship: Option<RelationshipStatus>,
}

impl User {
	pub fn new(id: UserId, username: impl Into<String>) -> Self {
		Self {
			id,
			username: username.into(),
			discriminator: None,
			display_name: None,
			avatar: None,
			status: None,
			profile: None,
			badges: None,
			relationship: None,
		}
	}
}

/// Role definition inside a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub colour: Option<String>,
	#[serde(default)]
	pub rank: i64,
	/// Hoisted roles form their own visible grouping in member listings.
	#[serde(default)]
	pub hoist: bool,
}

/// Server-scoped custom emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmoji {
	#[serde(rename = "_id")]
	pub id: String,
	pub name: String,
}

/// A community/space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
	#[serde(rename = "_id")]
	pub id: ServerId,
	pub name: String,
	pub owner: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub banner: Option<FileRef>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub roles: BTreeMap<String, Role>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub emojis: Vec<CustomEmoji>,
}

/// Channel kind tag. Absent tags decode as text channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelKind {
	#[default]
	TextChannel,
	VoiceChannel,
	DirectMessage,
	Group,
	SavedMessages,
}

/// A channel. `server` is absent for direct/group/saved-note channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
	#[serde(rename = "_id")]
	pub id: ChannelId,
	#[serde(default)]
	pub channel_type: ChannelKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server: Option<ServerId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub recipients: Vec<UserId>,
}

/// Server membership record, keyed by `(server, user)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
	#[serde(rename = "_id")]
	pub id: MemberKey,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nickname: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub avatar: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub roles: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub joined_at: Option<String>,
}

impl Member {
	pub fn new(id: MemberKey) -> Self {
		Self {
			id,
			nickname: None,
			avatar: None,
			roles: Vec::new(),
			joined_at: None,
		}
	}
}

/// Message author on the wire: either a bare user id or an embedded partial
/// user snapshot. Resolved once at read time via [`resolve_author`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorRef {
	Id(UserId),
	Embedded(User),
}

impl AuthorRef {
	pub fn user_id(&self) -> &UserId {
		match self {
			AuthorRef::Id(id) => id,
			AuthorRef::Embedded(user) => &user.id,
		}
	}

	/// Embedded user snapshot, if the wire carried one.
	pub fn embedded(&self) -> Option<&User> {
		match self {
			AuthorRef::Id(_) => None,
			AuthorRef::Embedded(user) => Some(user),
		}
	}
}

/// Resolve an author reference against a user lookup, preferring the user
/// table over the embedded snapshot.
pub fn resolve_author<'a>(author: &'a AuthorRef, lookup: impl Fn(&UserId) -> Option<&'a User>) -> Option<&'a User> {
	lookup(author.user_id()).or_else(|| author.embedded())
}

/// A chat message. Identifiers are unique per channel and define insertion
/// order within a channel's working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	#[serde(rename = "_id")]
	pub id: MessageId,
	pub channel: ChannelId,
	pub author: AuthorRef,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub attachments: Vec<FileRef>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub reactions: BTreeMap<String, BTreeSet<UserId>>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub replies: Vec<MessageId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub edited: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nonce: Option<String>,
	/// Local-only marker for optimistic records awaiting server confirmation.
	#[serde(skip)]
	pub pending: bool,
}

impl Message {
	/// First reply pointer, if any. The working set tracks a single
	/// reply-preview target per message.
	pub fn reply_to(&self) -> Option<&MessageId> {
		self.replies.first()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn uid(s: &str) -> UserId {
		UserId::new(s).unwrap()
	}

	#[test]
	fn author_ref_decodes_both_shapes() {
		let bare: AuthorRef = serde_json::from_str("\"u1\"").unwrap();
		assert_eq!(bare.user_id().as_str(), "u1");
		assert!(bare.embedded().is_none());

		let embedded: AuthorRef = serde_json::from_str(r#"{"_id":"u2","username":"Ann"}"#).unwrap();
		assert_eq!(embedded.user_id().as_str(), "u2");
		assert_eq!(embedded.embedded().unwrap().username, "Ann");
	}

	#[test]
	fn resolve_author_prefers_user_table() {
		let table_user = User::new(uid("u1"), "fresh");
		let stale = User::new(uid("u1"), "stale");
		let author = AuthorRef::Embedded(stale);

		let resolved = resolve_author(&author, |_| Some(&table_user)).unwrap();
		assert_eq!(resolved.username, "fresh");

		let fallback = resolve_author(&author, |_| None).unwrap();
		assert_eq!(fallback.username, "stale");
	}

	#[test]
	fn channel_kind_defaults_to_text() {
		let ch: Channel = serde_json::from_str(r#"{"_id":"c1"}"#).unwrap();
		assert_eq!(ch.channel_type, ChannelKind::TextChannel);
		assert!(ch.server.is_none());
	}

	#[test]
	fn message_tolerates_sparse_payloads() {
		let msg: Message = serde_json::from_str(r#"{"_id":"m1","channel":"c1","author":"u1"}"#).unwrap();
		assert!(msg.content.is_none());
		assert!(msg.reactions.is_empty());
		assert!(msg.reply_to().is_none());
		assert!(!msg.pending);
	}

	#[test]
	fn cdn_urls() {
		let file = FileRef {
			id: "f1".into(),
			filename: None,
			content_type: None,
		};
		assert_eq!(file.avatar_url("https://cdn.example/"), "https://cdn.example/avatars/f1?max_side=256");
		assert_eq!(file.icon_url("https://cdn.example"), "https://cdn.example/icons/f1");
	}
}
