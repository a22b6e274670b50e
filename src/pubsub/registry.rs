//! Channel registry keyed by execution id
//!
//! Released channels linger for an idle grace period so a UI that drops and
//! reconnects (panel reload, navigation) picks up the same channel and its
//! replay buffer.

use super::channel::ScopedEventChannel;
use crate::config::ChannelConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    /// Live channels
    pub channels: usize,
    /// Channels scheduled for destruction
    pub pending_cleanups: usize,
}

/// Scheduled destruction; `token` tells a stale timer from the current one
struct PendingCleanup {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryInner {
    channels: HashMap<String, Arc<ScopedEventChannel>>,
    pending: HashMap<String, PendingCleanup>,
    next_token: u64,
}

/// Multiplexes scoped channels by execution id
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChannelRegistry {
    config: ChannelConfig,
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl ChannelRegistry {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live channel for `execution_id`, creating it if needed
    ///
    /// Cancels a pending delayed destruction for that id.
    pub fn get_or_create(&self, execution_id: &str) -> Arc<ScopedEventChannel> {
        let mut inner = self.lock();

        if let Some(pending) = inner.pending.remove(execution_id) {
            pending.handle.abort();
            tracing::debug!(execution_id = %execution_id, "Pending channel cleanup cancelled");
        }

        if let Some(channel) = inner.channels.get(execution_id) {
            return channel.clone();
        }

        let channel = ScopedEventChannel::new(execution_id, self.config.replay_capacity);
        inner
            .channels
            .insert(execution_id.to_string(), channel.clone());
        tracing::debug!(execution_id = %execution_id, "Channel created");
        channel
    }

    /// Live channel for `execution_id`, without creating one
    pub fn get(&self, execution_id: &str) -> Option<Arc<ScopedEventChannel>> {
        self.lock().channels.get(execution_id).cloned()
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.lock().channels.contains_key(execution_id)
    }

    /// Release a channel
    ///
    /// With `immediate` the channel is destroyed now; otherwise destruction
    /// runs after the configured idle grace period unless `get_or_create`
    /// reclaims the id first. Delayed deletion needs a tokio runtime.
    pub fn delete(&self, execution_id: &str, immediate: bool) {
        if immediate {
            self.destroy_now(execution_id);
        } else {
            self.schedule_delete(execution_id, self.config.idle_grace());
        }
    }

    fn destroy_now(&self, execution_id: &str) {
        let channel = {
            let mut inner = self.lock();
            if let Some(pending) = inner.pending.remove(execution_id) {
                pending.handle.abort();
            }
            inner.channels.remove(execution_id)
        };

        if let Some(channel) = channel {
            channel.destroy();
            tracing::debug!(execution_id = %execution_id, "Channel deleted");
        }
    }

    fn schedule_delete(&self, execution_id: &str, grace: Duration) {
        let mut inner = self.lock();
        if !inner.channels.contains_key(execution_id) {
            return;
        }

        inner.next_token += 1;
        let token = inner.next_token;
        let registry = self.clone();
        let id = execution_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.expire(&id, token);
        });

        let pending = PendingCleanup { token, handle };
        if let Some(previous) = inner.pending.insert(execution_id.to_string(), pending) {
            previous.handle.abort();
        }
        tracing::debug!(
            execution_id = %execution_id,
            grace_ms = grace.as_millis() as u64,
            "Channel cleanup scheduled"
        );
    }

    /// Destroy the channel if `token` is still its current pending cleanup
    ///
    /// A timer that already woke cannot be aborted, so a reclaim or a newer
    /// delete may have replaced it by the time it gets here.
    fn expire(&self, execution_id: &str, token: u64) {
        let channel = {
            let mut inner = self.lock();
            if inner.pending.get(execution_id).map(|p| p.token) != Some(token) {
                tracing::debug!(execution_id = %execution_id, "Stale channel cleanup ignored");
                return;
            }
            inner.pending.remove(execution_id);
            inner.channels.remove(execution_id)
        };
        if let Some(channel) = channel {
            channel.destroy();
            tracing::debug!(execution_id = %execution_id, "Idle channel destroyed");
        }
    }

    /// Destroy every channel and cancel all pending cleanups
    pub fn destroy_all(&self) {
        let channels: Vec<_> = {
            let mut inner = self.lock();
            for (_, pending) in inner.pending.drain() {
                pending.handle.abort();
            }
            inner.channels.drain().map(|(_, c)| c).collect()
        };
        for channel in channels {
            channel.destroy();
        }
    }

    pub fn stats(&self) -> ChannelStats {
        let inner = self.lock();
        ChannelStats {
            channels: inner.channels.len(),
            pending_cleanups: inner.pending.len(),
        }
    }
}
