use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ermine_domain::{AuthorRef, ChannelId, Message, MessageId, MessagePatch, UserId};
use ermine_protocol::{EditMessageBody, ReplyIntent, SendMessageBody};
use ermine_store::StateStore;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::ClientError;
use crate::rest::RestClient;

/// A send that was rolled back. Carries the original input so the caller can
/// restore it for retry.
#[derive(Debug, Error)]
#[error("send failed: {source}")]
pub struct SendFailed {
	pub content: String,
	#[source]
	pub source: ClientError,
}

/// User-initiated mutations with an optimistic local projection. Sends roll
/// back on failure; edits, deletes and reaction toggles are left to the live
/// stream to self-heal.
#[derive(Clone)]
pub struct Outbox {
	rest: RestClient,
	store: Arc<StateStore>,
	self_id: UserId,
}

impl Outbox {
	pub fn new(rest: RestClient, store: Arc<StateStore>, self_id: UserId) -> Self {
		Self { rest, store, self_id }
	}

	/// Insert a provisional pending record, issue the create request, then
	/// replace the provisional record with the authoritative one. On failure
	/// the provisional record is removed and the input is handed back.
	pub async fn send(
		&self,
		channel: &ChannelId,
		content: String,
		reply_to: Option<MessageId>,
		attachments: Option<Vec<String>>,
	) -> Result<Message, SendFailed> {
		let nonce = Uuid::new_v4().simple().to_string();
		let provisional = provisional_message(channel, self.self_id.clone(), &content, reply_to.as_ref(), &nonce);
		let temp_id = provisional.id.clone();
		self.store.insert_optimistic(provisional);

		let body = SendMessageBody {
			content: content.clone(),
			nonce,
			replies: reply_to.map(|id| vec![ReplyIntent { id, mention: false }]),
			attachments,
		};

		match self.rest.send_message(channel, &body).await {
			Ok(authoritative) => {
				self.store.resolve_optimistic(channel, &temp_id, authoritative.clone());
				Ok(authoritative)
			}
			Err(source) => {
				self.store.remove_message(channel, &temp_id);
				warn!(channel = %channel, error = %source, "send failed; provisional record rolled back");
				Err(SendFailed { content, source })
			}
		}
	}

	pub async fn edit(&self, channel: &ChannelId, id: &MessageId, content: String) {
		self.store.patch_message(
			channel,
			id,
			MessagePatch {
				content: Some(content.clone()),
				..Default::default()
			},
			Utc::now().to_rfc3339(),
		);

		if let Err(err) = self.rest.edit_message(channel, id, &EditMessageBody { content }).await {
			warn!(message = %id, error = %err, "edit failed; awaiting stream self-heal");
		}
	}

	pub async fn delete(&self, channel: &ChannelId, id: &MessageId) {
		self.store.remove_message(channel, id);

		if let Err(err) = self.rest.delete_message(channel, id).await {
			warn!(message = %id, error = %err, "delete failed; awaiting stream self-heal");
		}
	}

	/// Toggle the caller's own reaction: remove when currently reacted, add
	/// otherwise.
	pub async fn toggle_reaction(&self, channel: &ChannelId, id: &MessageId, emoji: &str, currently_reacted: bool) {
		self.store.toggle_reaction(channel, id, emoji, &self.self_id, currently_reacted);

		let result = if currently_reacted {
			self.rest.remove_reaction(channel, id, emoji).await
		} else {
			self.rest.add_reaction(channel, id, emoji).await
		};

		if let Err(err) = result {
			warn!(message = %id, error = %err, "reaction toggle failed; awaiting stream self-heal");
		}
	}
}

/// Local provisional record. The `local:` prefix sorts after ULID
/// identifiers, keeping unconfirmed sends at the tail of the working set.
fn provisional_message(
	channel: &ChannelId,
	author: UserId,
	content: &str,
	reply_to: Option<&MessageId>,
	nonce: &str,
) -> Message {
	Message {
		id: MessageId::new(format!("local:{nonce}")).expect("nonce id is non-empty"),
		channel: channel.clone(),
		author: AuthorRef::Id(author),
		content: Some(content.to_string()),
		attachments: Vec::new(),
		reactions: BTreeMap::new(),
		replies: reply_to.cloned().into_iter().collect(),
		edited: None,
		nonce: Some(nonce.to_string()),
		pending: true,
	}
}
