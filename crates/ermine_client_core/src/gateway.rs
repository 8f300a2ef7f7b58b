use std::sync::Arc;
use std::time::Duration;

use ermine_protocol::{ClientEvent, ServerEvent, decode_event, encode_client_event};
use ermine_store::{StateStore, SyncPhase};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const RECONNECT_DELAY: Duration = Duration::from_millis(2500);
const EVENT_TAP_CAPACITY: usize = 256;

/// Transport-level connection state. Entity-level sync phase lives in the
/// store; this only tracks the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
	Disconnected,
	Connecting,
	/// Socket open, handshake in flight.
	Connected,
	/// First Ready applied; the store mirrors server state.
	Ready,
	/// Transport failed; a reconnect is scheduled.
	Errored,
}

/// Handle to the gateway task. Owns the single live-stream connection:
/// authenticates on open, heartbeats, applies every inbound event to the
/// store in arrival order, and reconnects after a fixed delay until shut
/// down or logged out.
pub struct Gateway {
	outbound: mpsc::UnboundedSender<ClientEvent>,
	events: broadcast::Sender<ServerEvent>,
	status: watch::Receiver<ConnectionStatus>,
	shutdown: Option<oneshot::Sender<()>>,
}

impl Gateway {
	pub fn spawn(ws_url: &str, token: String, store: Arc<StateStore>) -> Self {
		let url = gateway_url(ws_url);
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (events_tx, _) = broadcast::channel(EVENT_TAP_CAPACITY);
		let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
		let (shutdown_tx, shutdown_rx) = oneshot::channel();

		tokio::spawn(run_gateway(url, token, store, outbound_rx, events_tx.clone(), status_tx, shutdown_rx));

		Self {
			outbound: outbound_tx,
			events: events_tx,
			status: status_rx,
			shutdown: Some(shutdown_tx),
		}
	}

	/// Queue one client event for the current (or next) connection.
	pub fn send(&self, event: ClientEvent) {
		let _ = self.outbound.send(event);
	}

	pub fn sender(&self) -> mpsc::UnboundedSender<ClientEvent> {
		self.outbound.clone()
	}

	pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
		self.status.clone()
	}

	/// Tap of every decoded event, delivered in the same order they are
	/// applied to the store.
	pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
		self.events.subscribe()
	}

	/// Stop the connection task. No reconnect is attempted afterwards.
	pub fn shutdown(mut self) {
		if let Some(tx) = self.shutdown.take() {
			let _ = tx.send(());
		}
	}
}

fn gateway_url(ws_url: &str) -> String {
	format!("{}?version=1&format=json", ws_url.trim_end_matches('/'))
}

async fn run_gateway(
	url: String,
	token: String,
	store: Arc<StateStore>,
	mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
	events_tx: broadcast::Sender<ServerEvent>,
	status_tx: watch::Sender<ConnectionStatus>,
	mut shutdown_rx: oneshot::Receiver<()>,
) {
	let mut attempt: u64 = 0;

	loop {
		attempt += 1;
		status_tx.send_replace(ConnectionStatus::Connecting);
		info!(attempt, url = %url, "connecting to gateway");

		let connect = tokio_tungstenite::connect_async(url.as_str());
		let mut ws = tokio::select! {
			_ = &mut shutdown_rx => {
				status_tx.send_replace(ConnectionStatus::Disconnected);
				return;
			}
			result = connect => match result {
				Ok((ws, _)) => ws,
				Err(err) => {
					warn!(error = %err, "gateway connect failed");
					status_tx.send_replace(ConnectionStatus::Errored);
					if sleep_or_shutdown(&mut shutdown_rx).await {
						status_tx.send_replace(ConnectionStatus::Disconnected);
						return;
					}
					continue;
				}
			}
		};

		status_tx.send_replace(ConnectionStatus::Connected);

		let frame = encode_client_event(&ClientEvent::Authenticate { token: token.clone() });
		if let Err(err) = ws.send(WsMessage::Text(frame.into())).await {
			warn!(error = %err, "authenticate send failed");
			status_tx.send_replace(ConnectionStatus::Errored);
			if sleep_or_shutdown(&mut shutdown_rx).await {
				status_tx.send_replace(ConnectionStatus::Disconnected);
				return;
			}
			continue;
		}

		let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
		heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

		let mut logged_out = false;

		loop {
			tokio::select! {
				_ = &mut shutdown_rx => {
					let _ = ws.close(None).await;
					status_tx.send_replace(ConnectionStatus::Disconnected);
					return;
				}
				_ = heartbeat.tick() => {
					let ping = encode_client_event(&ClientEvent::Ping {
						data: chrono::Utc::now().timestamp_millis(),
					});
					if let Err(err) = ws.send(WsMessage::Text(ping.into())).await {
						warn!(error = %err, "heartbeat send failed");
						break;
					}
				}
				outbound = outbound_rx.recv() => {
					let Some(event) = outbound else {
						status_tx.send_replace(ConnectionStatus::Disconnected);
						return;
					};
					let frame = encode_client_event(&event);
					if let Err(err) = ws.send(WsMessage::Text(frame.into())).await {
						warn!(error = %err, "outbound send failed");
						break;
					}
				}
				inbound = ws.next() => {
					let Some(inbound) = inbound else {
						warn!("gateway stream ended");
						break;
					};
					match inbound {
						Ok(WsMessage::Text(text)) => match decode_event(&text) {
							Ok(event) => {
								let _ = events_tx.send(event.clone());
								let applied = store.apply(event);
								if applied.logged_out {
									info!("session invalidated by server");
									logged_out = true;
									break;
								}
								if applied.selection_reset {
									debug!("active selection reset to home");
								}
								if store.phase() == SyncPhase::Ready {
									status_tx.send_if_modified(|status| {
										let changed = *status != ConnectionStatus::Ready;
										*status = ConnectionStatus::Ready;
										changed
									});
								}
							}
							Err(err) => debug!(error = %err, "undecodable gateway frame dropped"),
						},
						Ok(WsMessage::Close(frame)) => {
							info!(?frame, "gateway closed by server");
							break;
						}
						Ok(_) => {}
						Err(err) => {
							warn!(error = %err, "gateway transport error");
							break;
						}
					}
				}
			}
		}

		if logged_out {
			status_tx.send_replace(ConnectionStatus::Disconnected);
			return;
		}

		// Every other way out of the inner loop is an abnormal break.
		status_tx.send_replace(ConnectionStatus::Errored);

		if sleep_or_shutdown(&mut shutdown_rx).await {
			status_tx.send_replace(ConnectionStatus::Disconnected);
			return;
		}
	}
}

/// Wait out the reconnect delay. Returns true when shutdown arrived first.
async fn sleep_or_shutdown(shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
	tokio::select! {
		_ = shutdown_rx => true,
		_ = tokio::time::sleep(RECONNECT_DELAY) => false,
	}
}
