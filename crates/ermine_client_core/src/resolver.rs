use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ermine_domain::{ChannelId, Message, MessageId, UserId, resolve_author};
use ermine_store::StateStore;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::rest::RestClient;

/// Concurrent user lookups per batch.
const MAX_USER_LOOKUPS: usize = 6;
/// Concurrent reply-target lookups per pass.
const MAX_REPLY_LOOKUPS: usize = 10;
/// Transport-level failures before lookups are suppressed for the session.
const BREAKER_THRESHOLD: u32 = 3;

const UNKNOWN_AUTHOR: &str = "Unknown user";
const EMPTY_CONTENT: &str = "Attachment / embed";

/// Resolved reply target for display: "Replying to {author}: {content}".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPreview {
	pub author: String,
	pub content: String,
}

impl fmt::Display for ReplyPreview {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Replying to {}: {}", self.author, self.content)
	}
}

/// On-demand resolution of identifiers referenced by content but absent from
/// the store. In-flight lookups are deduplicated; repeated transport-level
/// failures trip a per-session circuit breaker that suppresses all further
/// lookups. Lookup failures never surface to the caller.
#[derive(Clone)]
pub struct ReferenceResolver {
	rest: RestClient,
	store: Arc<StateStore>,
	pending_users: Arc<Mutex<HashSet<UserId>>>,
	pending_replies: Arc<Mutex<HashSet<MessageId>>>,
	reply_cache: Arc<Mutex<HashMap<MessageId, Message>>>,
	transport_failures: Arc<AtomicU32>,
	tripped: Arc<AtomicBool>,
}

impl ReferenceResolver {
	pub fn new(rest: RestClient, store: Arc<StateStore>) -> Self {
		Self {
			rest,
			store,
			pending_users: Arc::new(Mutex::new(HashSet::new())),
			pending_replies: Arc::new(Mutex::new(HashSet::new())),
			reply_cache: Arc::new(Mutex::new(HashMap::new())),
			transport_failures: Arc::new(AtomicU32::new(0)),
			tripped: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn is_tripped(&self) -> bool {
		self.tripped.load(Ordering::Relaxed)
	}

	/// Look up authors referenced by the batch that are neither in the user
	/// table nor already in flight.
	pub async fn resolve_authors(&self, messages: &[Message]) {
		if self.is_tripped() {
			return;
		}

		let wanted = {
			let ids: BTreeSet<&UserId> = messages.iter().map(|m| m.author.user_id()).collect();
			let missing = self.store.missing_users(ids);
			let mut pending = self.pending_users.lock();

			let mut wanted = Vec::new();
			for id in missing {
				if wanted.len() == MAX_USER_LOOKUPS {
					break;
				}
				if pending.insert(id.clone()) {
					wanted.push(id);
				}
			}
			wanted
		};

		if wanted.is_empty() {
			return;
		}

		futures_util::future::join_all(wanted.iter().map(|id| self.lookup_user(id))).await;

		let mut pending = self.pending_users.lock();
		for id in &wanted {
			pending.remove(id);
		}
	}

	async fn lookup_user(&self, id: &UserId) {
		match self.rest.fetch_user(id).await {
			Ok(user) => self.store.upsert_users([user]),
			Err(err) => self.record_failure(id.as_str(), &err),
		}
	}

	/// Fetch reply targets that are absent from the working set and the
	/// fetched-message cache.
	pub async fn resolve_replies(&self, channel: &ChannelId, messages: &[Message]) {
		if self.is_tripped() {
			return;
		}

		let wanted = {
			let cache = self.reply_cache.lock();
			let mut pending = self.pending_replies.lock();

			let mut wanted: Vec<MessageId> = Vec::new();
			for target in messages.iter().filter_map(|m| m.reply_to()) {
				if wanted.len() == MAX_REPLY_LOOKUPS {
					break;
				}
				if cache.contains_key(target) || self.store.message(channel, target).is_some() {
					continue;
				}
				if pending.insert(target.clone()) {
					wanted.push(target.clone());
				}
			}
			wanted
		};

		if wanted.is_empty() {
			return;
		}

		futures_util::future::join_all(wanted.iter().map(|id| self.lookup_reply(channel, id))).await;

		let mut pending = self.pending_replies.lock();
		for id in &wanted {
			pending.remove(id);
		}
	}

	async fn lookup_reply(&self, channel: &ChannelId, id: &MessageId) {
		match self.rest.fetch_message(channel, id).await {
			Ok(message) => {
				self.reply_cache.lock().insert(id.clone(), message);
			}
			Err(err) => self.record_failure(id.as_str(), &err),
		}
	}

	fn record_failure(&self, subject: &str, err: &ClientError) {
		debug!(subject, error = %err, "reference lookup failed");

		if err.is_transport_level() {
			let failures = self.transport_failures.fetch_add(1, Ordering::Relaxed) + 1;
			if failures >= BREAKER_THRESHOLD && !self.tripped.swap(true, Ordering::Relaxed) {
				warn!(failures, "reference lookups suppressed for the rest of the session");
			}
		}
	}

	/// Reply projection for a message: working set first, then the
	/// fetched-message cache, then the unresolved placeholder. `None` when
	/// the message carries no reply pointer.
	pub fn reply_preview(&self, channel: &ChannelId, message: &Message) -> Option<ReplyPreview> {
		let target = message.reply_to()?;

		let resolved = self
			.store
			.message(channel, target)
			.or_else(|| self.reply_cache.lock().get(target).cloned());

		let Some(target_msg) = resolved else {
			return Some(ReplyPreview {
				author: UNKNOWN_AUTHOR.to_string(),
				content: EMPTY_CONTENT.to_string(),
			});
		};

		let table_user = self.store.user(target_msg.author.user_id());
		let author = resolve_author(&target_msg.author, |_| table_user.as_ref())
			.map(|user| user.username.clone())
			.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

		let content = match target_msg.content {
			Some(content) if !content.is_empty() => content,
			_ => EMPTY_CONTENT.to_string(),
		};

		Some(ReplyPreview { author, content })
	}

	/// Drop caches and re-arm the breaker. Called on session teardown.
	pub fn reset(&self) {
		self.pending_users.lock().clear();
		self.pending_replies.lock().clear();
		self.reply_cache.lock().clear();
		self.transport_failures.store(0, Ordering::Relaxed);
		self.tripped.store(false, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use ermine_domain::AuthorRef;

	use super::*;
	use crate::config::ApiConfig;

	fn resolver() -> ReferenceResolver {
		let rest = RestClient::new(&ApiConfig::with_api_url("https://api.example"), "tok".into()).unwrap();
		ReferenceResolver::new(rest, Arc::new(StateStore::new()))
	}

	fn msg(id: &str, reply_to: Option<&str>) -> Message {
		Message {
			id: MessageId::new(id).unwrap(),
			channel: ChannelId::new("c1").unwrap(),
			author: AuthorRef::Id(UserId::new("u1").unwrap()),
			content: Some("hello".into()),
			attachments: Vec::new(),
			reactions: BTreeMap::new(),
			replies: reply_to.map(|r| vec![MessageId::new(r).unwrap()]).unwrap_or_default(),
			edited: None,
			nonce: None,
			pending: false,
		}
	}

	#[test]
	fn no_reply_pointer_yields_no_preview() {
		let resolver = resolver();
		let preview = resolver.reply_preview(&ChannelId::new("c1").unwrap(), &msg("m2", None));
		assert!(preview.is_none());
	}

	#[test]
	fn unresolved_target_yields_placeholder() {
		let resolver = resolver();
		let preview = resolver.reply_preview(&ChannelId::new("c1").unwrap(), &msg("m2", Some("m1"))).unwrap();
		assert_eq!(preview.to_string(), "Replying to Unknown user: Attachment / embed");
	}

	#[test]
	fn working_set_target_resolves_author_and_content() {
		let resolver = resolver();
		let channel = ChannelId::new("c1").unwrap();
		resolver.store.insert_live_message(msg("m1", None));
		resolver
			.store
			.upsert_users([ermine_domain::User::new(UserId::new("u1").unwrap(), "Ann")]);

		let preview = resolver.reply_preview(&channel, &msg("m2", Some("m1"))).unwrap();
		assert_eq!(preview.author, "Ann");
		assert_eq!(preview.content, "hello");
	}

	#[test]
	fn cached_target_with_empty_content_uses_placeholder_content() {
		let resolver = resolver();
		let channel = ChannelId::new("c1").unwrap();
		let mut cached = msg("m1", None);
		cached.content = None;
		resolver.reply_cache.lock().insert(cached.id.clone(), cached);

		let preview = resolver.reply_preview(&channel, &msg("m2", Some("m1"))).unwrap();
		assert_eq!(preview.content, "Attachment / embed");
	}

	#[test]
	fn tripped_breaker_is_terminal_until_reset() {
		let resolver = resolver();
		let err = ClientError::Transport("boom".into());
		for _ in 0..BREAKER_THRESHOLD {
			resolver.record_failure("u1", &err);
		}
		assert!(resolver.is_tripped());

		resolver.reset();
		assert!(!resolver.is_tripped());
	}

	#[test]
	fn request_failures_never_trip_the_breaker() {
		let resolver = resolver();
		let err = ClientError::Request {
			status: 404,
			body: String::new(),
		};
		for _ in 0..10 {
			resolver.record_failure("u1", &err);
		}
		assert!(!resolver.is_tripped());
	}
}
