use ermine_protocol::ApiInfo;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.stoat.chat";
pub const DEFAULT_WS_URL: &str = "wss://stoat.chat/events";
pub const DEFAULT_CDN_URL: &str = "https://autumn.revolt.chat";

/// Endpoint configuration for one deployment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
	/// REST API root.
	pub api_url: String,

	/// Gateway websocket endpoint.
	pub ws_url: String,

	/// CDN base for avatars, icons and attachments.
	pub cdn_url: String,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			api_url: DEFAULT_API_URL.to_string(),
			ws_url: DEFAULT_WS_URL.to_string(),
			cdn_url: DEFAULT_CDN_URL.to_string(),
		}
	}
}

impl ApiConfig {
	pub fn with_api_url(api_url: impl Into<String>) -> Self {
		Self {
			api_url: api_url.into(),
			..Self::default()
		}
	}

	/// Refine the gateway and CDN endpoints from the API root payload.
	/// Any failure keeps the configured values.
	pub async fn discover(mut self) -> Self {
		let http = match reqwest::Client::builder().user_agent(crate::rest::USER_AGENT).build() {
			Ok(http) => http,
			Err(err) => {
				warn!(error = %err, "api discovery skipped: http client build failed");
				return self;
			}
		};

		match http.get(&self.api_url).send().await {
			Ok(resp) if resp.status().is_success() => match resp.json::<ApiInfo>().await {
				Ok(info) => {
					if let Some(ws) = info.ws {
						self.ws_url = ws;
					}
					if let Some(autumn) = info.features.autumn {
						self.cdn_url = autumn.url;
					}
					debug!(ws = %self.ws_url, cdn = %self.cdn_url, "api discovery complete");
				}
				Err(err) => warn!(error = %err, "api discovery payload invalid"),
			},
			Ok(resp) => warn!(status = %resp.status(), "api discovery rejected"),
			Err(err) => warn!(error = %err, "api root unreachable"),
		}

		self
	}
}
