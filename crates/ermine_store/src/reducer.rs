//! Event reducer: one decoded gateway event in, one atomic store transition
//! out.

use chrono::{DateTime, Utc};
use ermine_domain::{Member, MemberKey};
use ermine_protocol::ServerEvent;
use tracing::debug;

use crate::{ActiveContext, Selection, StateStore, StoreInner, SyncPhase};

/// Side effects of applying an event that the owning session must act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
	/// The session was invalidated server-side; tear down the connection and
	/// return to credential entry.
	pub logged_out: bool,
	/// The active selection referenced a deleted entity and fell back to the
	/// home context.
	pub selection_reset: bool,
}

impl StateStore {
	/// Apply one gateway event. Takes the write lock once, so the whole
	/// transition is atomic with respect to every other store operation.
	pub fn apply(&self, event: ServerEvent) -> Applied {
		self.apply_at(event, Utc::now())
	}

	/// [`StateStore::apply`] with an explicit application time, which stamps
	/// edited markers.
	pub fn apply_at(&self, event: ServerEvent, now: DateTime<Utc>) -> Applied {
		let mut applied = Applied::default();
		let mut inner = self.inner.write();
		apply_inner(&mut inner, event, now, &mut applied);
		applied
	}
}

fn apply_inner(inner: &mut StoreInner, event: ServerEvent, now: DateTime<Utc>, applied: &mut Applied) {
	match event {
		ServerEvent::Ready {
			users,
			servers,
			channels,
			members,
		} => {
			debug!(
				users = users.len(),
				servers = servers.len(),
				channels = channels.len(),
				members = members.len(),
				"applying ready snapshot"
			);
			inner.upsert_users(users);
			for server in servers {
				inner.servers.insert(server.id.clone(), server);
			}
			for channel in channels {
				inner.channels.insert(channel.id.clone(), channel);
			}
			for member in members {
				inner.members.insert(member.id.clone(), member);
			}
			inner.phase = SyncPhase::Ready;
		}

		ServerEvent::Bulk { v } => {
			for nested in v {
				apply_inner(inner, nested, now, applied);
			}
		}

		ServerEvent::Authenticated => {
			inner.phase = SyncPhase::Authenticated;
		}

		ServerEvent::Error { error } => {
			// Connection-level error code; entities stay untouched.
			inner.phase = SyncPhase::Errored(error);
		}

		ServerEvent::Pong { .. } => {}

		ServerEvent::Logout => {
			*inner = StoreInner::default();
			applied.logged_out = true;
		}

		ServerEvent::Message(message) => {
			inner.harvest_authors(std::slice::from_ref(&message));
			inner.insert_live(message);
		}

		ServerEvent::MessageUpdate { id, channel, data } => {
			if let Some(list) = inner.messages.get_mut(&channel)
				&& let Some(message) = list.iter_mut().find(|m| m.id == id)
			{
				message.apply(data);
				message.edited = Some(now.to_rfc3339());
			}
		}

		ServerEvent::MessageDelete { id, channel } => {
			if let Some(list) = inner.messages.get_mut(&channel) {
				list.retain(|m| m.id != id);
			}
		}

		ServerEvent::ChannelCreate(channel) => {
			inner.channels.insert(channel.id.clone(), channel);
		}

		ServerEvent::ChannelUpdate { id, data, clear } => {
			if let Some(channel) = inner.channels.get_mut(&id) {
				channel.apply(data, &clear);
			}
		}

		ServerEvent::ChannelDelete { id } => {
			inner.channels.remove(&id);
			if inner.selection.channel.as_ref() == Some(&id) {
				inner.selection.channel = None;
				applied.selection_reset = true;
			}
		}

		ServerEvent::ServerCreate(server) => {
			inner.servers.insert(server.id.clone(), server);
		}

		ServerEvent::ServerUpdate { id, data, clear } => {
			if let Some(server) = inner.servers.get_mut(&id) {
				server.apply(data, &clear);
			}
		}

		ServerEvent::ServerDelete { id } => {
			inner.servers.remove(&id);
			if inner.selection.context == ActiveContext::Server(id) {
				inner.selection = Selection::default();
				applied.selection_reset = true;
			}
		}

		ServerEvent::ServerMemberJoin { id, user, member } => {
			let key = MemberKey::new(id, user);
			let mut record = Member::new(key.clone());
			record.apply(member, &[]);
			inner.members.insert(key, record);
		}

		ServerEvent::ServerMemberUpdate { id, data, clear } => {
			if let Some(member) = inner.members.get_mut(&id) {
				member.apply(data, &clear);
			}
		}

		ServerEvent::ServerMemberLeave { id, user } => {
			inner.members.remove(&MemberKey::new(id, user));
		}

		ServerEvent::UserUpdate { id, data, clear } => {
			if let Some(user) = inner.users.get_mut(&id) {
				user.apply(data, &clear);
			}
		}

		ServerEvent::Unknown => {
			debug!("dropping unrecognized gateway event");
		}
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;
	use ermine_domain::{ChannelId, ServerId, UserId};
	use ermine_protocol::decode_event;

	use super::*;
	use crate::MESSAGE_CAP;

	fn apply_json(store: &StateStore, frame: &str) -> Applied {
		store.apply(decode_event(frame).unwrap())
	}

	fn cid(s: &str) -> ChannelId {
		ChannelId::new(s).unwrap()
	}

	#[test]
	fn ready_then_message_scenario() {
		let store = StateStore::new();
		apply_json(
			&store,
			r#"{"type":"Ready","users":[{"_id":"u1","username":"Ann"}],"servers":[],"channels":[],"members":[]}"#,
		);
		apply_json(&store, r#"{"type":"Message","_id":"m1","channel":"c1","author":"u1","content":"hi"}"#);

		assert_eq!(store.phase(), SyncPhase::Ready);
		let list = store.messages(&cid("c1"));
		assert_eq!(list.len(), 1);
		assert_eq!(list[0].id.as_str(), "m1");
		assert_eq!(store.user(&UserId::new("u1").unwrap()).unwrap().username, "Ann");
	}

	#[test]
	fn message_event_is_idempotent() {
		let store = StateStore::new();
		let frame = r#"{"type":"Message","_id":"m1","channel":"c1","author":"u1","content":"hi"}"#;
		apply_json(&store, frame);
		apply_json(&store, frame);
		assert_eq!(store.messages(&cid("c1")).len(), 1);
	}

	#[test]
	fn message_update_sets_content_and_edited_marker() {
		let store = StateStore::new();
		apply_json(&store, r#"{"type":"Message","_id":"m1","channel":"c1","author":"u1","content":"hi"}"#);

		let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
		store.apply_at(
			decode_event(r#"{"type":"MessageUpdate","channel":"c1","id":"m1","data":{"content":"edited"}}"#).unwrap(),
			now,
		);

		let list = store.messages(&cid("c1"));
		assert_eq!(list[0].content.as_deref(), Some("edited"));
		assert_eq!(list[0].edited, Some(now.to_rfc3339()));
	}

	#[test]
	fn message_update_applies_reaction_state() {
		let store = StateStore::new();
		apply_json(&store, r#"{"type":"Message","_id":"m1","channel":"c1","author":"u1","content":"hi"}"#);
		apply_json(
			&store,
			r#"{"type":"MessageUpdate","channel":"c1","id":"m1","data":{"reactions":{"👍":["u2"]}}}"#,
		);

		let list = store.messages(&cid("c1"));
		assert_eq!(list[0].content.as_deref(), Some("hi"));
		assert!(list[0].reactions.get("👍").is_some_and(|who| who.len() == 1));
	}

	#[test]
	fn server_update_clear_list_removes_icon() {
		let store = StateStore::new();
		apply_json(
			&store,
			r#"{"type":"ServerCreate","_id":"s1","name":"home","owner":"u1","icon":{"_id":"f1"}}"#,
		);
		apply_json(
			&store,
			r#"{"type":"ServerUpdate","id":"s1","data":{"name":"renamed","icon":{"_id":"f2"}},"clear":["Icon"]}"#,
		);

		let server = store.server(&ServerId::new("s1").unwrap()).unwrap();
		assert_eq!(server.name, "renamed");
		assert!(server.icon.is_none());
	}

	#[test]
	fn member_leave_is_idempotent() {
		let store = StateStore::new();
		apply_json(&store, r#"{"type":"ServerMemberJoin","id":"s1","user":"u1"}"#);

		let key = MemberKey::new(ServerId::new("s1").unwrap(), UserId::new("u1").unwrap());
		assert!(store.member(&key).is_some());

		let leave = r#"{"type":"ServerMemberLeave","id":"s1","user":"u1"}"#;
		apply_json(&store, leave);
		assert!(store.member(&key).is_none());
		apply_json(&store, leave);
		assert!(store.member(&key).is_none());
	}

	#[test]
	fn member_update_on_missing_key_is_noop() {
		let store = StateStore::new();
		apply_json(
			&store,
			r#"{"type":"ServerMemberUpdate","id":{"server":"s1","user":"u1"},"data":{"nickname":"nick"},"clear":[]}"#,
		);
		let key = MemberKey::new(ServerId::new("s1").unwrap(), UserId::new("u1").unwrap());
		assert!(store.member(&key).is_none());
	}

	#[test]
	fn server_delete_resets_active_selection() {
		let store = StateStore::new();
		apply_json(&store, r#"{"type":"ServerCreate","_id":"s1","name":"home","owner":"u1"}"#);
		store.set_selection(Selection {
			context: ActiveContext::Server(ServerId::new("s1").unwrap()),
			channel: Some(cid("c1")),
		});

		let applied = apply_json(&store, r#"{"type":"ServerDelete","id":"s1"}"#);
		assert!(applied.selection_reset);
		assert_eq!(store.selection(), Selection::default());
	}

	#[test]
	fn server_delete_of_other_server_keeps_selection() {
		let store = StateStore::new();
		store.set_selection(Selection {
			context: ActiveContext::Server(ServerId::new("s1").unwrap()),
			channel: Some(cid("c1")),
		});

		let applied = apply_json(&store, r#"{"type":"ServerDelete","id":"s2"}"#);
		assert!(!applied.selection_reset);
		assert_eq!(store.selection().context, ActiveContext::Server(ServerId::new("s1").unwrap()));
	}

	#[test]
	fn logout_purges_everything() {
		let store = StateStore::new();
		apply_json(&store, r#"{"type":"Message","_id":"m1","channel":"c1","author":"u1"}"#);

		let applied = apply_json(&store, r#"{"type":"Logout"}"#);
		assert!(applied.logged_out);
		assert!(store.messages(&cid("c1")).is_empty());
		assert_eq!(store.phase(), SyncPhase::Idle);
	}

	#[test]
	fn bulk_applies_in_listed_order() {
		let store = StateStore::new();
		apply_json(
			&store,
			r#"{"type":"Bulk","v":[
				{"type":"ServerCreate","_id":"s1","name":"first","owner":"u1"},
				{"type":"ServerUpdate","id":"s1","data":{"name":"second"},"clear":[]}
			]}"#,
		);
		assert_eq!(store.server(&ServerId::new("s1").unwrap()).unwrap().name, "second");
	}

	#[test]
	fn error_event_records_code_without_touching_entities() {
		let store = StateStore::new();
		apply_json(&store, r#"{"type":"Message","_id":"m1","channel":"c1","author":"u1"}"#);
		apply_json(&store, r#"{"type":"Error","error":"LabelMe"}"#);

		assert_eq!(store.phase(), SyncPhase::Errored("LabelMe".into()));
		assert_eq!(store.messages(&cid("c1")).len(), 1);
	}

	#[test]
	fn live_cap_applies_to_stream_growth() {
		let store = StateStore::new();
		for i in 0..MESSAGE_CAP + 10 {
			apply_json(
				&store,
				&format!(r#"{{"type":"Message","_id":"m{i:04}","channel":"c1","author":"u1"}}"#),
			);
		}
		let list = store.messages(&cid("c1"));
		assert_eq!(list.len(), MESSAGE_CAP);
		assert!(list.windows(2).all(|w| w[0].id < w[1].id));
	}

	#[test]
	fn message_event_harvests_embedded_author() {
		let store = StateStore::new();
		apply_json(
			&store,
			r#"{"type":"Message","_id":"m1","channel":"c1","author":{"_id":"u9","username":"Embedded"}}"#,
		);
		assert_eq!(store.user(&UserId::new("u9").unwrap()).unwrap().username, "Embedded");
	}

	proptest::proptest! {
		/// Events touching disjoint channels are confluent: any interleaving
		/// of two channels' live streams produces the same per-channel lists.
		#[test]
		fn disjoint_channel_events_are_confluent(seed in proptest::collection::vec(0usize..2, 4..24)) {
			let sequential = StateStore::new();
			let interleaved = StateStore::new();

			let mut per_channel: Vec<Vec<String>> = vec![Vec::new(), Vec::new()];
			for (i, channel) in seed.iter().enumerate() {
				per_channel[*channel].push(format!(
					r#"{{"type":"Message","_id":"m{i:03}","channel":"c{channel}","author":"u1"}}"#
				));
			}

			for frames in &per_channel {
				for frame in frames {
					sequential.apply(decode_event(frame).unwrap());
				}
			}
			for (i, channel) in seed.iter().enumerate() {
				let frame = format!(
					r#"{{"type":"Message","_id":"m{i:03}","channel":"c{channel}","author":"u1"}}"#
				);
				interleaved.apply(decode_event(&frame).unwrap());
			}

			for channel in ["c0", "c1"] {
				let a: Vec<String> = sequential.messages(&cid(channel)).iter().map(|m| m.id.to_string()).collect();
				let b: Vec<String> = interleaved.messages(&cid(channel)).iter().map(|m| m.id.to_string()).collect();
				proptest::prop_assert_eq!(a, b);
			}
		}
	}

	#[test]
	fn unknown_events_are_dropped() {
		let store = StateStore::new();
		let applied = apply_json(&store, r#"{"type":"SomethingNew","id":"x"}"#);
		assert_eq!(applied, Applied::default());
	}
}
