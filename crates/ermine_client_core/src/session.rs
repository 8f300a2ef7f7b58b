use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ermine_domain::UserId;
use ermine_store::{ActiveContext, Selection, StateStore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ApiConfig;
use crate::error::ClientError;
use crate::gateway::{ConnectionStatus, Gateway};
use crate::history::HistoryFetcher;
use crate::outbox::Outbox;
use crate::resolver::ReferenceResolver;
use crate::rest::RestClient;
use crate::subscriptions::{self, SubscriptionTracker};

/// Output of the credential exchange: the session token plus the owning
/// user. The core stores nothing else about the login.
#[derive(Debug, Clone)]
pub struct Credentials {
	pub token: String,
	pub user_id: UserId,
}

/// One logged-in session: the shared store plus every component wired to it.
/// All session-scoped caches live here and are purged by
/// [`SessionContext::teardown`].
pub struct SessionContext {
	pub store: Arc<StateStore>,
	pub rest: RestClient,
	pub gateway: Gateway,
	pub history: HistoryFetcher,
	pub outbox: Outbox,
	pub resolver: ReferenceResolver,
	pub subscriptions: Arc<SubscriptionTracker>,
	foreground: Arc<AtomicBool>,
	refresh_task: JoinHandle<()>,
	warmup_task: JoinHandle<()>,
}

impl SessionContext {
	/// Wire up a session. Must run inside a tokio runtime: the gateway and
	/// subscription refresh tasks are spawned here.
	pub fn start(config: &ApiConfig, credentials: Credentials) -> Result<Self, ClientError> {
		let store = Arc::new(StateStore::new());
		let rest = RestClient::new(config, credentials.token.clone())?;
		let gateway = Gateway::spawn(&config.ws_url, credentials.token, store.clone());

		let foreground = Arc::new(AtomicBool::new(true));
		let subscriptions = Arc::new(SubscriptionTracker::new(gateway.sender(), foreground.clone()));
		let refresh_task = subscriptions::spawn_refresh(subscriptions.clone(), store.clone(), gateway.status());

		let history = HistoryFetcher::new(rest.clone(), store.clone(), foreground.clone());
		let outbox = Outbox::new(rest.clone(), store.clone(), credentials.user_id);
		let resolver = ReferenceResolver::new(rest.clone(), store.clone());

		// Warm a handful of channels every time the stream comes (back) up.
		let warmup_task = {
			let history = history.clone();
			let mut status = gateway.status();
			tokio::spawn(async move {
				while status.changed().await.is_ok() {
					if *status.borrow() == ConnectionStatus::Ready {
						history.warm_up().await;
					}
				}
			})
		};

		Ok(Self {
			store,
			rest,
			gateway,
			history,
			outbox,
			resolver,
			subscriptions,
			foreground,
			refresh_task,
			warmup_task,
		})
	}

	/// Switch the active context. Selecting a server sends a subscribe
	/// intent immediately (window permitting).
	pub fn select(&self, selection: Selection) {
		self.store.set_selection(selection.clone());
		if let ActiveContext::Server(server) = &selection.context {
			self.subscriptions.maybe_subscribe(server);
		}
	}

	/// Foreground/visibility signal from the consuming surface. Regaining
	/// focus opportunistically resubscribes the active server.
	pub fn set_foreground(&self, visible: bool) {
		self.foreground.store(visible, Ordering::Relaxed);
		if visible {
			self.subscriptions.notify_foreground(&self.store.selection());
		}
	}

	/// Full local teardown: stop the connection and timers, drop every
	/// session cache, purge the store. The empty store that remains is a
	/// valid pre-Ready initial state.
	pub fn teardown(self) {
		info!("tearing down session");
		self.refresh_task.abort();
		self.warmup_task.abort();
		self.gateway.shutdown();
		self.resolver.reset();
		self.subscriptions.reset();
		self.history.reset();
		self.store.purge();
	}
}
