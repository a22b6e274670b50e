//! Execution index with capacity limits and delayed disposal

use super::{AgentDeps, Execution, ExecutionInfo, ExecutionOptions, ExecutionState};
use crate::config::RuntimeConfig;
use crate::error::{AgentError, Result};
use crate::pubsub::ChannelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// Manager statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total: usize,
    pub running: usize,
    pub pending_disposal: usize,
}

/// Scheduled disposal; `token` tells a stale timer from the current one
struct PendingDisposal {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerInner {
    executions: HashMap<String, Arc<Execution>>,
    pending: HashMap<String, PendingDisposal>,
    next_token: u64,
}

fn lock(inner: &Mutex<ManagerInner>) -> MutexGuard<'_, ManagerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every live execution
///
/// Cheap to clone; clones share state. Pass one instance to whatever needs
/// it rather than keeping a global.
#[derive(Clone)]
pub struct ExecutionManager {
    config: Arc<RuntimeConfig>,
    deps: AgentDeps,
    channels: ChannelRegistry,
    inner: Arc<Mutex<ManagerInner>>,
}

impl ExecutionManager {
    pub fn new(config: RuntimeConfig, deps: AgentDeps) -> Self {
        let channels = ChannelRegistry::new(config.channel.clone());
        Self {
            config: Arc::new(config),
            deps,
            channels,
            inner: Arc::new(Mutex::new(ManagerInner::default())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Create an execution
    ///
    /// Fails with `AlreadyExists` for a known id. At the concurrency ceiling,
    /// finished executions and those awaiting disposal are reaped first;
    /// `CapacityExceeded` is returned if that frees nothing.
    pub async fn create(&self, id: &str, options: ExecutionOptions) -> Result<Arc<Execution>> {
        let limit = self.config.execution.max_concurrent;

        let reaped = {
            let mut inner = lock(&self.inner);
            if inner.executions.contains_key(id) {
                return Err(AgentError::AlreadyExists(id.to_string()));
            }
            if inner.executions.len() < limit {
                return Ok(self.insert(&mut inner, id, options));
            }
            Self::take_reapable(&mut inner)
        };

        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "Reaping idle executions");
        }
        for execution in reaped {
            execution.dispose().await;
        }

        let mut inner = lock(&self.inner);
        if inner.executions.contains_key(id) {
            return Err(AgentError::AlreadyExists(id.to_string()));
        }
        if inner.executions.len() >= limit {
            tracing::warn!(execution_id = %id, limit, "Execution limit reached");
            return Err(AgentError::CapacityExceeded { limit });
        }
        Ok(self.insert(&mut inner, id, options))
    }

    /// Existing execution for `id`, or a new one
    ///
    /// Reclaiming an id cancels its pending disposal.
    pub async fn get_or_create(&self, id: &str, options: ExecutionOptions) -> Result<Arc<Execution>> {
        {
            let mut inner = lock(&self.inner);
            if let Some(execution) = inner.executions.get(id).cloned() {
                if let Some(pending) = inner.pending.remove(id) {
                    pending.handle.abort();
                    tracing::debug!(execution_id = %id, "Pending disposal cancelled");
                }
                return Ok(execution);
            }
        }
        self.create(id, options).await
    }

    fn insert(&self, inner: &mut ManagerInner, id: &str, options: ExecutionOptions) -> Arc<Execution> {
        let execution = Arc::new(Execution::new(
            id,
            options,
            self.config.clone(),
            self.deps.clone(),
            self.channels.clone(),
        ));
        inner.executions.insert(id.to_string(), execution.clone());
        tracing::info!(
            execution_id = %id,
            mode = %execution.mode(),
            total = inner.executions.len(),
            "Execution created"
        );
        execution
    }

    /// Remove executions that are finished or awaiting disposal
    fn take_reapable(inner: &mut ManagerInner) -> Vec<Arc<Execution>> {
        let ids: Vec<String> = inner
            .executions
            .iter()
            .filter(|(id, execution)| {
                let state = execution.state();
                inner.pending.contains_key(*id)
                    || state.is_finished()
                    || state == ExecutionState::Disposed
            })
            .map(|(id, _)| id.clone())
            .collect();

        ids.iter()
            .filter_map(|id| {
                if let Some(pending) = inner.pending.remove(id) {
                    pending.handle.abort();
                }
                inner.executions.remove(id)
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Execution>> {
        lock(&self.inner).executions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.inner).executions.contains_key(id)
    }

    /// Info for every execution, oldest first
    pub fn list(&self) -> Vec<ExecutionInfo> {
        let executions: Vec<_> = lock(&self.inner).executions.values().cloned().collect();
        let mut infos: Vec<_> = executions.iter().map(|e| e.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Dispose an execution now, or after the idle grace period
    ///
    /// A delayed disposal is cancelled if `get_or_create` reclaims the id
    /// before it fires.
    pub async fn delete(&self, id: &str, immediate: bool) -> Result<()> {
        if immediate {
            let execution = {
                let mut inner = lock(&self.inner);
                if let Some(pending) = inner.pending.remove(id) {
                    pending.handle.abort();
                }
                inner.executions.remove(id)
            };
            let execution = execution.ok_or_else(|| AgentError::NotFound(id.to_string()))?;
            execution.dispose().await;
            tracing::info!(execution_id = %id, "Execution deleted");
            return Ok(());
        }

        let grace = self.config.execution.idle_grace();
        let mut inner = lock(&self.inner);
        if !inner.executions.contains_key(id) {
            return Err(AgentError::NotFound(id.to_string()));
        }

        inner.next_token += 1;
        let token = inner.next_token;
        let shared = self.inner.clone();
        let owned_id = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(execution) = Self::take_expired(&shared, &owned_id, token) {
                execution.dispose().await;
                tracing::info!(execution_id = %owned_id, "Idle execution disposed");
            }
        });

        let pending = PendingDisposal { token, handle };
        if let Some(previous) = inner.pending.insert(id.to_string(), pending) {
            previous.handle.abort();
        }
        tracing::debug!(
            execution_id = %id,
            grace_ms = grace.as_millis() as u64,
            "Execution disposal scheduled"
        );
        Ok(())
    }

    /// Remove the execution if `token` is still its current pending disposal
    ///
    /// A timer that already woke cannot be aborted, so a reclaim or a newer
    /// delete may have replaced it by the time it gets here.
    fn take_expired(shared: &Mutex<ManagerInner>, id: &str, token: u64) -> Option<Arc<Execution>> {
        let mut inner = lock(shared);
        if inner.pending.get(id).map(|p| p.token) != Some(token) {
            tracing::debug!(execution_id = %id, "Stale disposal timer ignored");
            return None;
        }
        inner.pending.remove(id);
        inner.executions.remove(id)
    }

    /// Pause the run in flight for `id`
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let execution = self
            .get(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        Ok(execution.cancel())
    }

    /// Pause every run in flight; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let executions: Vec<_> = lock(&self.inner).executions.values().cloned().collect();
        executions.iter().filter(|e| e.cancel()).count()
    }

    /// Dispose every execution and channel
    pub async fn dispose_all(&self) {
        let executions: Vec<_> = {
            let mut inner = lock(&self.inner);
            for (_, pending) in inner.pending.drain() {
                pending.handle.abort();
            }
            inner.executions.drain().map(|(_, e)| e).collect()
        };
        let count = executions.len();
        for execution in executions {
            execution.dispose().await;
        }
        self.channels.destroy_all();
        tracing::info!(count, "All executions disposed");
    }

    pub fn stats(&self) -> ExecutionStats {
        let inner = lock(&self.inner);
        ExecutionStats {
            total: inner.executions.len(),
            running: inner
                .executions
                .values()
                .filter(|e| e.is_running())
                .count(),
            pending_disposal: inner.pending.len(),
        }
    }
}
