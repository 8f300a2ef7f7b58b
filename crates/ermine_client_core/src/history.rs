use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ermine_domain::{ChannelId, MessageId, ServerId};
use ermine_store::{StateStore, SyncPhase};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::rest::RestClient;

/// Member hydration batch size. Large servers upsert in chunks with a
/// cooperative yield in between so the consuming surface stays responsive.
const HYDRATE_CHUNK: usize = 400;

const WARMUP_MIN: usize = 3;
const WARMUP_MAX: usize = 8;
const WARMUP_STAGGER: Duration = Duration::from_millis(350);

/// Paginated history retrieval. Cheap to clone; clones share the preloaded
/// flags and the member-load generation counter.
#[derive(Clone)]
pub struct HistoryFetcher {
	rest: RestClient,
	store: Arc<StateStore>,
	foreground: Arc<AtomicBool>,
	preloaded: Arc<Mutex<HashSet<ChannelId>>>,
	member_generation: Arc<AtomicU64>,
}

impl HistoryFetcher {
	pub fn new(rest: RestClient, store: Arc<StateStore>, foreground: Arc<AtomicBool>) -> Self {
		Self {
			rest,
			store,
			foreground,
			preloaded: Arc::new(Mutex::new(HashSet::new())),
			member_generation: Arc::new(AtomicU64::new(0)),
		}
	}

	fn is_preloaded(&self, channel: &ChannelId) -> bool {
		self.preloaded.lock().contains(channel)
	}

	/// Load a channel's initial page once. Later calls are no-ops; explicit
	/// backward paging stays available through [`HistoryFetcher::fetch_older`].
	pub async fn preload_channel(&self, channel: &ChannelId) -> Result<(), ClientError> {
		if !self.preloaded.lock().insert(channel.clone()) {
			return Ok(());
		}

		let (mut messages, users) = match self.rest.fetch_messages(channel, None).await {
			Ok(page) => page,
			Err(err) => {
				// Allow a retry on the next trigger.
				self.preloaded.lock().remove(channel);
				return Err(err);
			}
		};

		// Pages arrive newest first.
		messages.reverse();
		debug!(channel = %channel, count = messages.len(), "initial page loaded");

		self.store.upsert_users(users);
		self.store.replace_messages(channel, messages);
		Ok(())
	}

	/// Page backward: fetch messages strictly older than `before` and merge
	/// them in front of the working set. Returns how many the page carried.
	pub async fn fetch_older(&self, channel: &ChannelId, before: &MessageId) -> Result<usize, ClientError> {
		let (mut messages, users) = self.rest.fetch_messages(channel, Some(before)).await?;
		messages.reverse();
		let count = messages.len();
		debug!(channel = %channel, count, "older page loaded");

		self.store.upsert_users(users);
		self.store.prepend_older_messages(channel, messages);
		Ok(count)
	}

	/// Fetch and hydrate a server's member list. Hydration is chunked with a
	/// yield between chunks; a newer call (for any server) supersedes this
	/// one and stops its remaining chunks from applying.
	pub async fn load_members(&self, server: &ServerId) -> Result<(), ClientError> {
		let generation = self.member_generation.fetch_add(1, Ordering::SeqCst) + 1;

		let response = self.rest.fetch_members(server).await?;
		info!(server = %server, members = response.members.len(), "hydrating member list");

		self.store.upsert_users(response.users);

		let mut members = response.members;
		while !members.is_empty() {
			if self.member_generation.load(Ordering::SeqCst) != generation {
				debug!(server = %server, "member hydration superseded");
				return Ok(());
			}

			let rest = members.split_off(members.len().min(HYDRATE_CHUNK));
			self.store.upsert_members(members);
			members = rest;

			tokio::task::yield_now().await;
		}

		Ok(())
	}

	/// Opportunistically preload a handful of text channels, staggered, while
	/// the stream is ready and the surface is foreground. Voice channels are
	/// never warmed.
	pub async fn warm_up(&self) {
		let budget = warmup_budget(
			std::thread::available_parallelism().map(|n| n.get()).unwrap_or(WARMUP_MIN),
		);

		let mut warmed = 0;
		for channel in self.store.text_channels() {
			if warmed >= budget {
				break;
			}
			if self.store.phase() != SyncPhase::Ready || !self.foreground.load(Ordering::Relaxed) {
				break;
			}
			if self.is_preloaded(&channel.id) || self.store.has_messages(&channel.id) {
				continue;
			}

			tokio::time::sleep(WARMUP_STAGGER).await;
			match self.preload_channel(&channel.id).await {
				Ok(()) => warmed += 1,
				Err(err) => debug!(channel = %channel.id, error = %err, "warm-up fetch failed"),
			}
		}

		if warmed > 0 {
			debug!(warmed, "channel warm-up complete");
		}
	}

	/// Forget per-channel flags and invalidate in-flight hydration.
	pub fn reset(&self) {
		self.preloaded.lock().clear();
		self.member_generation.fetch_add(1, Ordering::SeqCst);
	}
}

fn warmup_budget(parallelism: usize) -> usize {
	parallelism.clamp(WARMUP_MIN, WARMUP_MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn warmup_budget_is_clamped() {
		assert_eq!(warmup_budget(1), 3);
		assert_eq!(warmup_budget(4), 4);
		assert_eq!(warmup_budget(64), 8);
	}
}
