use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ermine_domain::ServerId;
use ermine_protocol::ClientEvent;
use ermine_store::{ActiveContext, Selection, StateStore};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::gateway::ConnectionStatus;

/// Minimum gap between subscribe intents for the same server.
const SUBSCRIBE_WINDOW: Duration = Duration::from_secs(600);
const SUBSCRIBE_TICK: Duration = Duration::from_secs(60);

/// Bounds redundant subscribe traffic: at most one Subscribe per server per
/// ten minutes while foreground, re-sent opportunistically on foreground
/// regain and on reconnect.
pub struct SubscriptionTracker {
	outbound: mpsc::UnboundedSender<ClientEvent>,
	foreground: Arc<AtomicBool>,
	last_sent: Mutex<HashMap<ServerId, Instant>>,
}

impl SubscriptionTracker {
	pub fn new(outbound: mpsc::UnboundedSender<ClientEvent>, foreground: Arc<AtomicBool>) -> Self {
		Self {
			outbound,
			foreground,
			last_sent: Mutex::new(HashMap::new()),
		}
	}

	/// Send a Subscribe for the server unless one went out within the
	/// window or the surface is backgrounded.
	pub fn maybe_subscribe(&self, server: &ServerId) {
		if !self.foreground.load(Ordering::Relaxed) {
			return;
		}

		let mut last_sent = self.last_sent.lock();
		let now = Instant::now();
		if last_sent.get(server).is_some_and(|sent| now.duration_since(*sent) < SUBSCRIBE_WINDOW) {
			return;
		}
		last_sent.insert(server.clone(), now);

		debug!(server = %server, "subscribe sent");
		let _ = self.outbound.send(ClientEvent::Subscribe {
			server_id: server.clone(),
		});
	}

	/// Opportunistic resubscribe on focus/visibility regain.
	pub fn notify_foreground(&self, selection: &Selection) {
		if let ActiveContext::Server(server) = &selection.context {
			self.maybe_subscribe(server);
		}
	}

	/// Forget send times so the next check subscribes immediately.
	pub fn reset(&self) {
		self.last_sent.lock().clear();
	}
}

/// Periodic refresh: re-check the active selection every 60s, and reset the
/// window whenever the gateway comes back up so the new connection gets a
/// subscribe straight away.
pub fn spawn_refresh(
	tracker: Arc<SubscriptionTracker>,
	store: Arc<StateStore>,
	mut status: watch::Receiver<ConnectionStatus>,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut tick = tokio::time::interval(SUBSCRIBE_TICK);
		tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				_ = tick.tick() => {}
				changed = status.changed() => {
					if changed.is_err() {
						return;
					}
					if *status.borrow() == ConnectionStatus::Ready {
						tracker.reset();
					} else {
						continue;
					}
				}
			}

			if let ActiveContext::Server(server) = store.selection().context {
				tracker.maybe_subscribe(&server);
			}
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tracker() -> (SubscriptionTracker, mpsc::UnboundedReceiver<ClientEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(SubscriptionTracker::new(tx, Arc::new(AtomicBool::new(true))), rx)
	}

	#[test]
	fn second_subscribe_within_window_is_suppressed() {
		let (tracker, mut rx) = tracker();
		let server = ServerId::new("s1").unwrap();

		tracker.maybe_subscribe(&server);
		tracker.maybe_subscribe(&server);

		assert!(matches!(rx.try_recv(), Ok(ClientEvent::Subscribe { .. })));
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn reset_allows_immediate_resubscribe() {
		let (tracker, mut rx) = tracker();
		let server = ServerId::new("s1").unwrap();

		tracker.maybe_subscribe(&server);
		tracker.reset();
		tracker.maybe_subscribe(&server);

		assert!(rx.try_recv().is_ok());
		assert!(rx.try_recv().is_ok());
	}

	#[test]
	fn backgrounded_surface_never_subscribes() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let tracker = SubscriptionTracker::new(tx, Arc::new(AtomicBool::new(false)));

		tracker.maybe_subscribe(&ServerId::new("s1").unwrap());
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn distinct_servers_track_separate_windows() {
		let (tracker, mut rx) = tracker();

		tracker.maybe_subscribe(&ServerId::new("s1").unwrap());
		tracker.maybe_subscribe(&ServerId::new("s2").unwrap());

		assert!(rx.try_recv().is_ok());
		assert!(rx.try_recv().is_ok());
	}
}
