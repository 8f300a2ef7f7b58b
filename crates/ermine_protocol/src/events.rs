use ermine_domain::{
	Channel, ChannelField, ChannelId, ChannelPatch, Member, MemberField, MemberKey, MemberPatch, MessageId,
	MessagePatch, Server, ServerField, ServerId, ServerPatch, User, UserField, UserId, UserPatch,
};
use ermine_domain::Message;
use serde::{Deserialize, Serialize};

/// Server→client gateway event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
	/// Handshake acknowledged; no data change.
	Authenticated,

	/// Connection-level error code.
	Error {
		error: String,
	},

	/// Heartbeat echo.
	Pong {
		data: i64,
	},

	/// One-time bulk snapshot establishing initial state. Every array is
	/// optional on the wire.
	Ready {
		#[serde(default)]
		users: Vec<User>,
		#[serde(default)]
		servers: Vec<Server>,
		#[serde(default)]
		channels: Vec<Channel>,
		#[serde(default)]
		members: Vec<Member>,
	},

	/// Wrapper around an embedded list of events, applied in listed order.
	Bulk {
		v: Vec<ServerEvent>,
	},

	/// Server-initiated session invalidation.
	Logout,

	Message(Message),

	MessageUpdate {
		id: MessageId,
		channel: ChannelId,
		#[serde(default)]
		data: MessagePatch,
	},

	MessageDelete {
		id: MessageId,
		channel: ChannelId,
	},

	ChannelCreate(Channel),

	ChannelUpdate {
		id: ChannelId,
		#[serde(default)]
		data: ChannelPatch,
		#[serde(default)]
		clear: Vec<ChannelField>,
	},

	ChannelDelete {
		id: ChannelId,
	},

	ServerCreate(Server),

	ServerUpdate {
		id: ServerId,
		#[serde(default)]
		data: ServerPatch,
		#[serde(default)]
		clear: Vec<ServerField>,
	},

	ServerDelete {
		id: ServerId,
	},

	ServerMemberJoin {
		id: ServerId,
		user: UserId,
		#[serde(default)]
		member: MemberPatch,
	},

	ServerMemberUpdate {
		id: MemberKey,
		#[serde(default)]
		data: MemberPatch,
		#[serde(default)]
		clear: Vec<MemberField>,
	},

	ServerMemberLeave {
		id: ServerId,
		user: UserId,
	},

	UserUpdate {
		id: UserId,
		#[serde(default)]
		data: UserPatch,
		#[serde(default)]
		clear: Vec<UserField>,
	},

	/// Forward-compatibility: unrecognized event kinds are dropped, never
	/// fatal.
	#[serde(other)]
	Unknown,
}

/// Client→server gateway message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
	Authenticate { token: String },
	Ping { data: i64 },
	Subscribe { server_id: ServerId },
}
