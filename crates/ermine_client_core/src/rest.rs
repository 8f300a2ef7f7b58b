use ermine_domain::{ChannelId, Message, MessageId, Server, ServerId, User, UserId};
use ermine_protocol::{
	CreateServerBody, EditMessageBody, LoginBody, LoginResponse, MembersResponse, MessagesPage, MfaResponse,
	SendMessageBody,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ClientError;
use crate::session::Credentials;

pub(crate) const USER_AGENT: &str = concat!("ermine/", env!("CARGO_PKG_VERSION"));

/// Page size for message history fetches.
pub const MESSAGE_PAGE_LIMIT: usize = 100;

/// Authenticated REST access. Every call carries the session token in the
/// `x-session-token` header. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RestClient {
	http: reqwest::Client,
	base: Url,
	token: String,
}

impl RestClient {
	pub fn new(config: &ApiConfig, token: String) -> Result<Self, ClientError> {
		let base = Url::parse(&config.api_url)
			.map_err(|e| ClientError::Protocol(format!("invalid api url {}: {e}", config.api_url)))?;
		let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

		Ok(Self { http, base, token })
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		req.header("x-session-token", &self.token)
	}

	fn url(&self, path: &str) -> Result<Url, ClientError> {
		self.base
			.join(path)
			.map_err(|e| ClientError::Protocol(format!("invalid request path {path}: {e}")))
	}

	async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
		let resp = self.authed(self.http.get(url)).send().await?;
		Ok(check_status(resp).await?.json().await?)
	}

	/// Fetch up to [`MESSAGE_PAGE_LIMIT`] messages, newest first, strictly
	/// older than `before` when given. Returns the page plus any embedded
	/// user snapshots.
	pub async fn fetch_messages(
		&self,
		channel: &ChannelId,
		before: Option<&MessageId>,
	) -> Result<(Vec<Message>, Vec<User>), ClientError> {
		let mut url = self.url(&format!("/channels/{channel}/messages"))?;
		{
			let mut query = url.query_pairs_mut();
			query.append_pair("limit", &MESSAGE_PAGE_LIMIT.to_string());
			if let Some(before) = before {
				query.append_pair("before", before.as_str());
			}
		}

		let page: MessagesPage = self.get_json(url).await?;
		Ok(page.into_parts())
	}

	pub async fn fetch_members(&self, server: &ServerId) -> Result<MembersResponse, ClientError> {
		self.get_json(self.url(&format!("/servers/{server}/members"))?).await
	}

	pub async fn fetch_user(&self, id: &UserId) -> Result<User, ClientError> {
		self.get_json(self.url(&format!("/users/{id}"))?).await
	}

	pub async fn fetch_self(&self) -> Result<User, ClientError> {
		self.get_json(self.url("/users/@me")?).await
	}

	pub async fn fetch_message(&self, channel: &ChannelId, id: &MessageId) -> Result<Message, ClientError> {
		self.get_json(self.url(&format!("/channels/{channel}/messages/{id}"))?).await
	}

	pub async fn send_message(&self, channel: &ChannelId, body: &SendMessageBody) -> Result<Message, ClientError> {
		let url = self.url(&format!("/channels/{channel}/messages"))?;
		let resp = self.authed(self.http.post(url)).json(body).send().await?;
		Ok(check_status(resp).await?.json().await?)
	}

	pub async fn edit_message(
		&self,
		channel: &ChannelId,
		id: &MessageId,
		body: &EditMessageBody,
	) -> Result<Message, ClientError> {
		let url = self.url(&format!("/channels/{channel}/messages/{id}"))?;
		let resp = self.authed(self.http.patch(url)).json(body).send().await?;
		Ok(check_status(resp).await?.json().await?)
	}

	pub async fn delete_message(&self, channel: &ChannelId, id: &MessageId) -> Result<(), ClientError> {
		let url = self.url(&format!("/channels/{channel}/messages/{id}"))?;
		let resp = self.authed(self.http.delete(url)).send().await?;
		check_status(resp).await?;
		Ok(())
	}

	pub async fn add_reaction(&self, channel: &ChannelId, id: &MessageId, emoji: &str) -> Result<(), ClientError> {
		let url = self.reaction_url(channel, id, emoji)?;
		let resp = self.authed(self.http.put(url)).send().await?;
		check_status(resp).await?;
		Ok(())
	}

	pub async fn remove_reaction(&self, channel: &ChannelId, id: &MessageId, emoji: &str) -> Result<(), ClientError> {
		let url = self.reaction_url(channel, id, emoji)?;
		let resp = self.authed(self.http.delete(url)).send().await?;
		check_status(resp).await?;
		Ok(())
	}

	fn reaction_url(&self, channel: &ChannelId, id: &MessageId, emoji: &str) -> Result<Url, ClientError> {
		let encoded = urlencoding::encode(emoji);
		self.url(&format!("/channels/{channel}/messages/{id}/reactions/{encoded}"))
	}

	pub async fn create_server(&self, name: &str) -> Result<Server, ClientError> {
		let url = self.url("/servers/create")?;
		let body = CreateServerBody { name: name.to_string() };
		let resp = self.authed(self.http.post(url)).json(&body).send().await?;
		Ok(check_status(resp).await?.json().await?)
	}
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
	let status = resp.status();
	if status.is_success() {
		return Ok(resp);
	}

	let body = resp.text().await.unwrap_or_default();
	Err(classify_error(status, body))
}

/// 401 means the session itself is dead. Anything else, 403 included, is a
/// per-request failure: a permission denial on one channel must not tear the
/// session down.
fn classify_error(status: StatusCode, body: String) -> ClientError {
	if status == StatusCode::UNAUTHORIZED {
		return ClientError::Auth(format!("status={status} body={body}"));
	}

	ClientError::Request {
		status: status.as_u16(),
		body,
	}
}

/// Exchange email/password (plus an optional TOTP answer) for a session.
pub async fn login_with_credentials(
	config: &ApiConfig,
	email: &str,
	password: &str,
	totp: Option<&str>,
) -> Result<Credentials, ClientError> {
	let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
	let url = Url::parse(&config.api_url)
		.and_then(|base| base.join("/auth/session/login"))
		.map_err(|e| ClientError::Protocol(format!("invalid api url {}: {e}", config.api_url)))?;

	let body = LoginBody {
		email: email.to_string(),
		password: password.to_string(),
		friendly_name: "ermine".to_string(),
		mfa_response: totp.map(|code| MfaResponse {
			totp_code: code.to_string(),
		}),
	};

	let resp = http.post(url).json(&body).send().await?;
	let login: LoginResponse = check_status(resp).await?.json().await?;

	let user_id = login.user_id.clone();
	let token = login
		.token()
		.ok_or_else(|| ClientError::Auth("login response carried no session token".to_string()))?;

	Ok(Credentials { token, user_id })
}

/// Validate a raw session token by fetching the owning user.
pub async fn login_with_token(config: &ApiConfig, token: String) -> Result<Credentials, ClientError> {
	let rest = RestClient::new(config, token.clone())?;
	let me = rest.fetch_self().await?;

	Ok(Credentials { token, user_id: me.id })
}
