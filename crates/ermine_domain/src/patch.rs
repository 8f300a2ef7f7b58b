//! Partial-record patches with explicit clear lists.
//!
//! A patch merges the fields it carries, then deletes every field named in the
//! clear list. Clearing is always an explicit field name, never a sentinel
//! value inside the patch payload.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::{Channel, CustomEmoji, FileRef, Member, Message, Profile, RelationshipStatus, Role, Server, User, UserStatus};
use crate::{MessageId, UserId};

/// Clearable fields of a [`User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserField {
	Avatar,
	StatusText,
	StatusPresence,
	ProfileContent,
	ProfileBackground,
	DisplayName,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
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
	/// Merge the patch, then delete each cleared field.
	pub fn apply(&mut self, patch: UserPatch, clear: &[UserField]) {
		if let Some(v) = patch.username {
			self.username = v;
		}
		if let Some(v) = patch.discriminator {
			self.discriminator = Some(v);
		}
		if let Some(v) = patch.display_name {
			self.display_name = Some(v);
		}
		if let Some(v) = patch.avatar {
			self.avatar = Some(v);
		}
		if let Some(v) = patch.status {
			self.status = Some(v);
		}
		if let Some(v) = patch.profile {
			self.profile = Some(v);
		}
		if let Some(v) = patch.badges {
			self.badges = Some(v);
		}
		if let Some(v) = patch.relationship {
			self.relationship = Some(v);
		}

		for field in clear {
			match field {
				UserField::Avatar => self.avatar = None,
				UserField::StatusText => {
					if let Some(status) = self.status.as_mut() {
						status.text = None;
					}
				}
				UserField::StatusPresence => {
					if let Some(status) = self.status.as_mut() {
						status.presence = None;
					}
				}
				UserField::ProfileContent => {
					if let Some(profile) = self.profile.as_mut() {
						profile.content = None;
					}
				}
				UserField::ProfileBackground => {
					if let Some(profile) = self.profile.as_mut() {
						profile.background = None;
					}
				}
				UserField::DisplayName => self.display_name = None,
			}
		}
	}
}

/// Clearable fields of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerField {
	Icon,
	Banner,
	Description,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerPatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub owner: Option<crate::UserId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub banner: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub roles: Option<BTreeMap<String, Role>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub emojis: Option<Vec<CustomEmoji>>,
}

impl Server {
	pub fn apply(&mut self, patch: ServerPatch, clear: &[ServerField]) {
		if let Some(v) = patch.name {
			self.name = v;
		}
		if let Some(v) = patch.owner {
			self.owner = v;
		}
		if let Some(v) = patch.description {
			self.description = Some(v);
		}
		if let Some(v) = patch.icon {
			self.icon = Some(v);
		}
		if let Some(v) = patch.banner {
			self.banner = Some(v);
		}
		if let Some(v) = patch.roles {
			self.roles = v;
		}
		if let Some(v) = patch.emojis {
			self.emojis = v;
		}

		for field in clear {
			match field {
				ServerField::Icon => self.icon = None,
				ServerField::Banner => self.banner = None,
				ServerField::Description => self.description = None,
			}
		}
	}
}

/// Clearable fields of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelField {
	Icon,
	Description,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub recipients: Option<Vec<crate::UserId>>,
}

impl Channel {
	pub fn apply(&mut self, patch: ChannelPatch, clear: &[ChannelField]) {
		if let Some(v) = patch.name {
			self.name = Some(v);
		}
		if let Some(v) = patch.description {
			self.description = Some(v);
		}
		if let Some(v) = patch.icon {
			self.icon = Some(v);
		}
		if let Some(v) = patch.recipients {
			self.recipients = v;
		}

		for field in clear {
			match field {
				ChannelField::Icon => self.icon = None,
				ChannelField::Description => self.description = None,
			}
		}
	}
}

/// Clearable fields of a [`Member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberField {
	Nickname,
	Avatar,
	Roles,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nickname: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub avatar: Option<FileRef>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub roles: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub joined_at: Option<String>,
}

impl Member {
	pub fn apply(&mut self, patch: MemberPatch, clear: &[MemberField]) {
		if let Some(v) = patch.nickname {
			self.nickname = Some(v);
		}
		if let Some(v) = patch.avatar {
			self.avatar = Some(v);
		}
		if let Some(v) = patch.roles {
			self.roles = v;
		}
		if let Some(v) = patch.joined_at {
			self.joined_at = Some(v);
		}

		for field in clear {
			match field {
				MemberField::Nickname => self.nickname = None,
				MemberField::Avatar => self.avatar = None,
				MemberField::Roles => self.roles.clear(),
			}
		}
	}
}

/// Fields a `MessageUpdate` may carry. The edited marker is set by the store
/// at application time, not taken from the patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub attachments: Option<Vec<FileRef>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reactions: Option<BTreeMap<String, BTreeSet<UserId>>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub replies: Option<Vec<MessageId>>,
}

impl Message {
	pub fn apply(&mut self, patch: MessagePatch) {
		if let Some(v) = patch.content {
			self.content = Some(v);
		}
		if let Some(v) = patch.attachments {
			self.attachments = v;
		}
		if let Some(v) = patch.reactions {
			self.reactions = v;
		}
		if let Some(v) = patch.replies {
			self.replies = v;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{ServerId, UserId};

	#[test]
	fn clear_removes_field_even_when_patch_sets_it() {
		let mut server = Server {
			id: ServerId::new("s1").unwrap(),
			name: "home".into(),
			owner: UserId::new("u1").unwrap(),
			description: None,
			icon: Some(FileRef {
				id: "old".into(),
				filename: None,
				content_type: None,
			}),
			banner: None,
			roles: BTreeMap::new(),
			emojis: Vec::new(),
		};

		let patch = ServerPatch {
			name: Some("renamed".into()),
			icon: Some(FileRef {
				id: "new".into(),
				filename: None,
				content_type: None,
			}),
			..Default::default()
		};

		server.apply(patch, &[ServerField::Icon]);

		assert_eq!(server.name, "renamed");
		assert!(server.icon.is_none());
	}

	#[test]
	fn absent_fields_stay_untouched() {
		let mut user = User::new(UserId::new("u1").unwrap(), "ann");
		user.display_name = Some("Ann".into());

		user.apply(UserPatch::default(), &[]);

		assert_eq!(user.username, "ann");
		assert_eq!(user.display_name.as_deref(), Some("Ann"));
	}

	#[test]
	fn message_patch_applies_beyond_content() {
		use crate::entity::AuthorRef;
		use crate::{ChannelId, MessageId};

		let mut msg = Message {
			id: MessageId::new("m1").unwrap(),
			channel: ChannelId::new("c1").unwrap(),
			author: AuthorRef::Id(UserId::new("u1").unwrap()),
			content: Some("hi".into()),
			attachments: Vec::new(),
			reactions: BTreeMap::new(),
			replies: Vec::new(),
			edited: None,
			nonce: None,
			pending: false,
		};

		let mut reactions = BTreeMap::new();
		reactions.insert("👍".to_string(), BTreeSet::from([UserId::new("u2").unwrap()]));

		msg.apply(MessagePatch {
			reactions: Some(reactions),
			attachments: Some(vec![FileRef {
				id: "f1".into(),
				filename: None,
				content_type: None,
			}]),
			..Default::default()
		});

		assert_eq!(msg.content.as_deref(), Some("hi"));
		assert_eq!(msg.attachments.len(), 1);
		assert!(msg.reactions.contains_key("👍"));
	}

	#[test]
	fn member_clear_roles() {
		let key = crate::MemberKey::new(ServerId::new("s1").unwrap(), UserId::new("u1").unwrap());
		let mut member = Member::new(key);
		member.roles = vec!["r1".into(), "r2".into()];

		member.apply(MemberPatch::default(), &[MemberField::Roles]);
		assert!(member.roles.is_empty());
	}
}
