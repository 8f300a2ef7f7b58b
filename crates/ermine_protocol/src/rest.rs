use ermine_domain::{Member, Message, MessageId, User, UserId};
use serde::{Deserialize, Serialize};

/// Paginated message fetch response. Some deployments return a bare message
/// array, others wrap it with the users referenced by the page.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessagesPage {
	WithUsers {
		messages: Vec<Message>,
		#[serde(default)]
		users: Vec<User>,
	},
	Bare(Vec<Message>),
}

impl MessagesPage {
	/// Split into `(messages, embedded users)`.
	pub fn into_parts(self) -> (Vec<Message>, Vec<User>) {
		match self {
			MessagesPage::Bare(messages) => (messages, Vec::new()),
			MessagesPage::WithUsers { messages, users } => (messages, users),
		}
	}
}

/// Member fetch response: the member list plus the users it references.
#[derive(Debug, Clone, Deserialize)]
pub struct MembersResponse {
	pub members: Vec<Member>,
	#[serde(default)]
	pub users: Vec<User>,
}

/// Reply pointer attached to an outgoing message.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyIntent {
	pub id: MessageId,
	pub mention: bool,
}

/// Body of `POST /channels/{id}/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageBody {
	pub content: String,
	pub nonce: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub replies: Option<Vec<ReplyIntent>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub attachments: Option<Vec<String>>,
}

/// Body of `PATCH /channels/{id}/messages/{message}`.
#[derive(Debug, Clone, Serialize)]
pub struct EditMessageBody {
	pub content: String,
}

/// Body of `POST /servers/create`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateServerBody {
	pub name: String,
}

/// Optional MFA answer attached to a credential login.
#[derive(Debug, Clone, Serialize)]
pub struct MfaResponse {
	pub totp_code: String,
}

/// Body of `POST /auth/session/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginBody {
	pub email: String,
	pub password: String,
	pub friendly_name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mfa_response: Option<MfaResponse>,
}

/// Response of a successful credential login. Older deployments name the
/// token field `session_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
	#[serde(default)]
	pub token: Option<String>,
	#[serde(default)]
	pub session_token: Option<String>,
	pub user_id: UserId,
}

impl LoginResponse {
	pub fn token(self) -> Option<String> {
		self.token.or(self.session_token)
	}
}

/// API root discovery payload: gateway url and CDN feature url.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiInfo {
	#[serde(default)]
	pub ws: Option<String>,
	#[serde(default)]
	pub features: ApiFeatures,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiFeatures {
	#[serde(default)]
	pub autumn: Option<CdnFeature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdnFeature {
	pub url: String,
}
