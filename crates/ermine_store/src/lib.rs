#![forbid(unsafe_code)]

//! In-memory normalized mirror of server-side chat state.
//!
//! The [`StateStore`] is the single shared mutable resource of the client
//! core: gateway events, paginated history fetches, optimistic writes and
//! reference lookups all merge into it. Every public operation takes the
//! write lock exactly once, so each call is one complete atomic transition
//! from one consistent snapshot to the next. All operations are total:
//! patching or removing a missing key is a no-op.

use std::collections::BTreeMap;

use ermine_domain::{
	Channel, ChannelField, ChannelId, ChannelKind, ChannelPatch, Member, MemberField, MemberKey, MemberPatch, Message,
	MessageId, MessagePatch, RelationshipStatus, Server, ServerField, ServerId, ServerPatch, User, UserField, UserId,
	UserPatch,
};
use parking_lot::RwLock;

mod reducer;

pub use reducer::Applied;

/// Per-channel working-set cap. Applies to live-stream growth only; explicit
/// pagination merges are never trimmed.
pub const MESSAGE_CAP: usize = 200;

/// Stream synchronization phase, driven by the reducer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncPhase {
	#[default]
	Idle,
	Authenticated,
	Ready,
	Errored(String),
}

/// The active context: the home ("me") surface or one server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveContext {
	#[default]
	Home,
	Server(ServerId),
}

/// Current selection. `channel == None` is the home friends surface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
	pub context: ActiveContext,
	pub channel: Option<ChannelId>,
}

#[derive(Debug, Default)]
struct StoreInner {
	users: BTreeMap<UserId, User>,
	servers: BTreeMap<ServerId, Server>,
	channels: BTreeMap<ChannelId, Channel>,
	members: BTreeMap<MemberKey, Member>,
	messages: BTreeMap<ChannelId, Vec<Message>>,
	phase: SyncPhase,
	selection: Selection,
}

/// Normalized entity store. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct StateStore {
	inner: RwLock<StoreInner>,
}

impl StateStore {
	pub fn new() -> Self {
		Self::default()
	}

	// --- reads (cloned snapshots) ---

	pub fn user(&self, id: &UserId) -> Option<User> {
		self.inner.read().users.get(id).cloned()
	}

	pub fn server(&self, id: &ServerId) -> Option<Server> {
		self.inner.read().servers.get(id).cloned()
	}

	pub fn channel(&self, id: &ChannelId) -> Option<Channel> {
		self.inner.read().channels.get(id).cloned()
	}

	pub fn member(&self, key: &MemberKey) -> Option<Member> {
		self.inner.read().members.get(key).cloned()
	}

	pub fn list_servers(&self) -> Vec<Server> {
		self.inner.read().servers.values().cloned().collect()
	}

	/// Channels belonging to one server.
	pub fn server_channels(&self, server: &ServerId) -> Vec<Channel> {
		self.inner
			.read()
			.channels
			.values()
			.filter(|ch| ch.server.as_ref() == Some(server))
			.cloned()
			.collect()
	}

	/// Text channels across all servers, in id order (warm-up candidates).
	pub fn text_channels(&self) -> Vec<Channel> {
		self.inner
			.read()
			.channels
			.values()
			.filter(|ch| ch.channel_type == ChannelKind::TextChannel)
			.cloned()
			.collect()
	}

	/// A channel's working set, ascending by identifier.
	pub fn messages(&self, channel: &ChannelId) -> Vec<Message> {
		self.inner.read().messages.get(channel).cloned().unwrap_or_default()
	}

	/// One message by id.
	pub fn message(&self, channel: &ChannelId, id: &MessageId) -> Option<Message> {
		let inner = self.inner.read();
		let list = inner.messages.get(channel)?;
		list.iter().find(|m| &m.id == id).cloned()
	}

	/// True when the channel already has any loaded working set.
	pub fn has_messages(&self, channel: &ChannelId) -> bool {
		self.inner.read().messages.get(channel).is_some_and(|l| !l.is_empty())
	}

	/// Users related to self as friends.
	pub fn friends(&self) -> Vec<User> {
		self.inner
			.read()
			.users
			.values()
			.filter(|u| u.relationship == Some(RelationshipStatus::Friend))
			.cloned()
			.collect()
	}

	/// Members of a server joined with their user records. A member whose
	/// user has not resolved yet is incomplete and is excluded.
	pub fn members_with_users(&self, server: &ServerId) -> Vec<(Member, User)> {
		let inner = self.inner.read();
		inner
			.members
			.iter()
			.filter(|(key, _)| &key.server == server)
			.filter_map(|(key, member)| inner.users.get(&key.user).map(|user| (member.clone(), user.clone())))
			.collect()
	}

	/// Identifiers of users not present in the user table.
	pub fn missing_users<'a>(&self, ids: impl IntoIterator<Item = &'a UserId>) -> Vec<UserId> {
		let inner = self.inner.read();
		ids.into_iter().filter(|id| !inner.users.contains_key(id)).cloned().collect()
	}

	pub fn phase(&self) -> SyncPhase {
		self.inner.read().phase.clone()
	}

	pub fn selection(&self) -> Selection {
		self.inner.read().selection.clone()
	}

	pub fn set_selection(&self, selection: Selection) {
		self.inner.write().selection = selection;
	}

	// --- writes ---

	/// Keyed merge: the incoming record's identifier wins, unknown keys are
	/// preserved.
	pub fn upsert_users(&self, users: impl IntoIterator<Item = User>) {
		let mut inner = self.inner.write();
		inner.upsert_users(users);
	}

	pub fn upsert_servers(&self, servers: impl IntoIterator<Item = Server>) {
		let mut inner = self.inner.write();
		for server in servers {
			inner.servers.insert(server.id.clone(), server);
		}
	}

	pub fn upsert_channels(&self, channels: impl IntoIterator<Item = Channel>) {
		let mut inner = self.inner.write();
		for channel in channels {
			inner.channels.insert(channel.id.clone(), channel);
		}
	}

	pub fn upsert_members(&self, members: impl IntoIterator<Item = Member>) {
		let mut inner = self.inner.write();
		for member in members {
			inner.members.insert(member.id.clone(), member);
		}
	}

	pub fn patch_user(&self, id: &UserId, patch: UserPatch, clear: &[UserField]) {
		if let Some(user) = self.inner.write().users.get_mut(id) {
			user.apply(patch, clear);
		}
	}

	pub fn patch_server(&self, id: &ServerId, patch: ServerPatch, clear: &[ServerField]) {
		if let Some(server) = self.inner.write().servers.get_mut(id) {
			server.apply(patch, clear);
		}
	}

	pub fn patch_channel(&self, id: &ChannelId, patch: ChannelPatch, clear: &[ChannelField]) {
		if let Some(channel) = self.inner.write().channels.get_mut(id) {
			channel.apply(patch, clear);
		}
	}

	pub fn patch_member(&self, key: &MemberKey, patch: MemberPatch, clear: &[MemberField]) {
		if let Some(member) = self.inner.write().members.get_mut(key) {
			member.apply(patch, clear);
		}
	}

	pub fn remove_member(&self, key: &MemberKey) {
		self.inner.write().members.remove(key);
	}

	/// Replace a channel's working set with a freshly fetched page (already
	/// ascending). Used for the initial page of a channel.
	pub fn replace_messages(&self, channel: &ChannelId, page: Vec<Message>) {
		let mut inner = self.inner.write();
		inner.harvest_authors(&page);
		inner.messages.insert(channel.clone(), page);
	}

	/// Merge an older page in front of the working set. Records already
	/// present are dropped from the page; existing records keep their order.
	/// The cap is not applied here: backfill never discards just-fetched
	/// history.
	pub fn prepend_older_messages(&self, channel: &ChannelId, older: Vec<Message>) {
		let mut inner = self.inner.write();
		inner.harvest_authors(&older);
		let list = inner.messages.entry(channel.clone()).or_default();
		let mut merged: Vec<Message> = older.into_iter().filter(|m| !list.iter().any(|e| e.id == m.id)).collect();
		merged.append(list);
		*list = merged;
	}

	/// Insert one live-stream message: dedup by identifier, reconcile a
	/// pending optimistic record by nonce, keep ascending id order, evict the
	/// oldest entries beyond [`MESSAGE_CAP`]. Returns false for duplicates.
	pub fn insert_live_message(&self, message: Message) -> bool {
		let mut inner = self.inner.write();
		inner.harvest_authors(std::slice::from_ref(&message));
		inner.insert_live(message)
	}

	/// Insert a local provisional record (author = self, pending) without
	/// touching the cap.
	pub fn insert_optimistic(&self, message: Message) {
		let mut inner = self.inner.write();
		let list = inner.messages.entry(message.channel.clone()).or_default();
		insert_sorted(list, message);
	}

	/// Replace a provisional record (matched by temporary id, falling back to
	/// nonce) with the authoritative one, preserving ascending order.
	pub fn resolve_optimistic(&self, channel: &ChannelId, temp_id: &MessageId, authoritative: Message) {
		let mut inner = self.inner.write();
		inner.harvest_authors(std::slice::from_ref(&authoritative));
		let Some(list) = inner.messages.get_mut(channel) else {
			return;
		};

		// The live stream may have delivered the authoritative record first.
		list.retain(|m| {
			&m.id != temp_id
				&& m.id != authoritative.id
				&& !(m.pending && m.nonce.is_some() && m.nonce == authoritative.nonce)
		});
		insert_sorted(list, authoritative);
	}

	pub fn remove_message(&self, channel: &ChannelId, id: &MessageId) {
		if let Some(list) = self.inner.write().messages.get_mut(channel) {
			list.retain(|m| &m.id != id);
		}
	}

	pub fn patch_message(&self, channel: &ChannelId, id: &MessageId, patch: MessagePatch, edited_at: String) {
		if let Some(list) = self.inner.write().messages.get_mut(channel)
			&& let Some(message) = list.iter_mut().find(|m| &m.id == id)
		{
			message.apply(patch);
			message.edited = Some(edited_at);
		}
	}

	/// Toggle the caller's reaction on a message in place (optimistic path).
	pub fn toggle_reaction(&self, channel: &ChannelId, id: &MessageId, emoji: &str, user: &UserId, reacted: bool) {
		if let Some(list) = self.inner.write().messages.get_mut(channel)
			&& let Some(message) = list.iter_mut().find(|m| &m.id == id)
		{
			let set = message.reactions.entry(emoji.to_string()).or_default();
			if reacted {
				set.remove(user);
			} else {
				set.insert(user.clone());
			}
			if set.is_empty() {
				message.reactions.remove(emoji);
			}
		}
	}

	/// Drop all state. The empty store is a valid initial state, equivalent
	/// to pre-first-Ready.
	pub fn purge(&self) {
		*self.inner.write() = StoreInner::default();
	}
}

impl StoreInner {
	fn upsert_users(&mut self, users: impl IntoIterator<Item = User>) {
		for user in users {
			self.users.insert(user.id.clone(), user);
		}
	}

	/// Harvest embedded author snapshots into the user table.
	fn harvest_authors(&mut self, messages: &[Message]) {
		for message in messages {
			if let Some(user) = message.author.embedded() {
				self.users.insert(user.id.clone(), user.clone());
			}
		}
	}

	fn insert_live(&mut self, message: Message) -> bool {
		let list = self.messages.entry(message.channel.clone()).or_default();

		if list.iter().any(|m| m.id == message.id) {
			return false;
		}

		if message.nonce.is_some()
			&& let Some(pending) = list.iter_mut().find(|m| m.pending && m.nonce == message.nonce)
		{
			*pending = message;
			list.sort_by(|a, b| a.id.cmp(&b.id));
			return true;
		}

		insert_sorted(list, message);
		if list.len() > MESSAGE_CAP {
			let excess = list.len() - MESSAGE_CAP;
			list.drain(..excess);
		}
		true
	}
}

/// Insert keeping ascending id order; arrival order never decides position.
fn insert_sorted(list: &mut Vec<Message>, message: Message) {
	let at = list.partition_point(|m| m.id < message.id);
	list.insert(at, message);
}

#[cfg(test)]
mod tests {
	use super::*;
	use ermine_domain::AuthorRef;

	fn cid(s: &str) -> ChannelId {
		ChannelId::new(s).unwrap()
	}

	fn uid(s: &str) -> UserId {
		UserId::new(s).unwrap()
	}

	fn msg(id: &str, channel: &str) -> Message {
		Message {
			id: MessageId::new(id).unwrap(),
			channel: cid(channel),
			author: AuthorRef::Id(uid("u1")),
			content: Some(format!("msg {id}")),
			attachments: Vec::new(),
			reactions: BTreeMap::new(),
			replies: Vec::new(),
			edited: None,
			nonce: None,
			pending: false,
		}
	}

	#[test]
	fn live_insert_dedups_by_identifier() {
		let store = StateStore::new();
		assert!(store.insert_live_message(msg("m1", "c1")));
		assert!(!store.insert_live_message(msg("m1", "c1")));
		assert_eq!(store.messages(&cid("c1")).len(), 1);
	}

	#[test]
	fn live_insert_keeps_ascending_id_order() {
		let store = StateStore::new();
		store.insert_live_message(msg("m3", "c1"));
		store.insert_live_message(msg("m1", "c1"));
		store.insert_live_message(msg("m2", "c1"));

		let ids: Vec<String> = store.messages(&cid("c1")).iter().map(|m| m.id.to_string()).collect();
		assert_eq!(ids, vec!["m1", "m2", "m3"]);
	}

	#[test]
	fn cap_eviction_keeps_most_recent() {
		let store = StateStore::new();
		for i in 0..MESSAGE_CAP + 25 {
			store.insert_live_message(msg(&format!("m{i:04}"), "c1"));
		}

		let list = store.messages(&cid("c1"));
		assert_eq!(list.len(), MESSAGE_CAP);
		assert_eq!(list.first().unwrap().id.as_str(), "m0025");
		assert_eq!(list.last().unwrap().id.as_str(), format!("m{:04}", MESSAGE_CAP + 24));
	}

	#[test]
	fn prepend_older_never_duplicates_or_reorders() {
		let store = StateStore::new();
		store.replace_messages(&cid("c1"), vec![msg("m5", "c1"), msg("m6", "c1")]);

		// Overlap on m5 must be dropped; existing records keep their order.
		store.prepend_older_messages(&cid("c1"), vec![msg("m3", "c1"), msg("m4", "c1"), msg("m5", "c1")]);

		let ids: Vec<String> = store.messages(&cid("c1")).iter().map(|m| m.id.to_string()).collect();
		assert_eq!(ids, vec!["m3", "m4", "m5", "m6"]);
	}

	#[test]
	fn prepend_older_is_not_capped() {
		let store = StateStore::new();
		let live: Vec<Message> = (500..500 + MESSAGE_CAP).map(|i| msg(&format!("m{i}"), "c1")).collect();
		store.replace_messages(&cid("c1"), live);

		let older: Vec<Message> = (400..450).map(|i| msg(&format!("m{i}"), "c1")).collect();
		store.prepend_older_messages(&cid("c1"), older);

		assert_eq!(store.messages(&cid("c1")).len(), MESSAGE_CAP + 50);
		assert_eq!(store.messages(&cid("c1")).first().unwrap().id.as_str(), "m400");
	}

	#[test]
	fn nonce_reconciliation_replaces_pending_record() {
		let store = StateStore::new();
		let mut provisional = msg("local:n1", "c1");
		provisional.nonce = Some("n1".into());
		provisional.pending = true;
		store.insert_optimistic(provisional);

		let mut authoritative = msg("m1", "c1");
		authoritative.nonce = Some("n1".into());
		assert!(store.insert_live_message(authoritative));

		let list = store.messages(&cid("c1"));
		assert_eq!(list.len(), 1);
		assert_eq!(list[0].id.as_str(), "m1");
		assert!(!list[0].pending);
	}

	#[test]
	fn resolve_optimistic_replaces_by_temp_id() {
		let store = StateStore::new();
		let mut provisional = msg("local:n1", "c1");
		provisional.nonce = Some("n1".into());
		provisional.pending = true;
		store.insert_optimistic(provisional);

		let mut authoritative = msg("m1", "c1");
		authoritative.nonce = Some("n1".into());
		store.resolve_optimistic(&cid("c1"), &MessageId::new("local:n1").unwrap(), authoritative);

		let list = store.messages(&cid("c1"));
		assert_eq!(list.len(), 1);
		assert_eq!(list[0].id.as_str(), "m1");
	}

	#[test]
	fn resolve_optimistic_tolerates_stream_winning_the_race() {
		let store = StateStore::new();
		let mut provisional = msg("local:n1", "c1");
		provisional.nonce = Some("n1".into());
		provisional.pending = true;
		store.insert_optimistic(provisional);

		// Live stream delivers the authoritative record first.
		let mut live = msg("m1", "c1");
		live.nonce = Some("n1".into());
		store.insert_live_message(live.clone());

		// The response path then resolves the same logical message.
		store.resolve_optimistic(&cid("c1"), &MessageId::new("local:n1").unwrap(), live);

		assert_eq!(store.messages(&cid("c1")).len(), 1);
	}

	#[test]
	fn remove_and_patch_missing_keys_are_noops() {
		let store = StateStore::new();
		store.remove_message(&cid("c1"), &MessageId::new("m1").unwrap());
		store.patch_message(&cid("c1"), &MessageId::new("m1").unwrap(), MessagePatch::default(), "now".into());
		store.remove_member(&MemberKey::new(ServerId::new("s1").unwrap(), uid("u1")));
		store.patch_user(&uid("u1"), UserPatch::default(), &[]);
		assert!(store.messages(&cid("c1")).is_empty());
	}

	#[test]
	fn members_without_users_are_excluded() {
		let store = StateStore::new();
		let server = ServerId::new("s1").unwrap();
		store.upsert_members(vec![
			Member::new(MemberKey::new(server.clone(), uid("u1"))),
			Member::new(MemberKey::new(server.clone(), uid("u2"))),
		]);
		store.upsert_users(vec![User::new(uid("u2"), "bea")]);

		let listed = store.members_with_users(&server);
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0].1.username, "bea");
	}

	#[test]
	fn toggle_reaction_adds_and_removes_self() {
		let store = StateStore::new();
		store.insert_live_message(msg("m1", "c1"));

		store.toggle_reaction(&cid("c1"), &MessageId::new("m1").unwrap(), "👍", &uid("me"), false);
		let list = store.messages(&cid("c1"));
		assert!(list[0].reactions["👍"].contains(&uid("me")));

		store.toggle_reaction(&cid("c1"), &MessageId::new("m1").unwrap(), "👍", &uid("me"), true);
		let list = store.messages(&cid("c1"));
		assert!(list[0].reactions.is_empty());
	}

	#[test]
	fn friends_listing_filters_by_relationship() {
		let store = StateStore::new();
		let mut friend = User::new(uid("u1"), "ann");
		friend.relationship = Some(RelationshipStatus::Friend);
		let mut blocked = User::new(uid("u2"), "bea");
		blocked.relationship = Some(RelationshipStatus::Blocked);
		store.upsert_users(vec![friend, blocked, User::new(uid("u3"), "cal")]);

		let friends = store.friends();
		assert_eq!(friends.len(), 1);
		assert_eq!(friends[0].username, "ann");
	}

	#[test]
	fn purge_resets_to_pre_ready_state() {
		let store = StateStore::new();
		store.upsert_users(vec![User::new(uid("u1"), "ann")]);
		store.insert_live_message(msg("m1", "c1"));
		store.purge();

		assert!(store.user(&uid("u1")).is_none());
		assert!(store.messages(&cid("c1")).is_empty());
		assert_eq!(store.phase(), SyncPhase::Idle);
	}
}
