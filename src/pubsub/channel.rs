//! Per-execution event channel with replay
//!
//! Each subscriber owns an unbounded queue. `publish` appends to the replay
//! buffer and pushes into every queue while holding the channel lock, so all
//! subscribers observe the same order, and a subscriber created between two
//! publishes receives the full replay before anything newer.

use super::types::{Event, HumanAction, HumanInputRequest, HumanInputResponse, MessageRole, UiMessage};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct ChannelInner {
    subscribers: HashMap<u64, mpsc::UnboundedSender<Event>>,
    next_subscriber_id: u64,
    buffer: VecDeque<Event>,
    destroyed: bool,
}

/// Publish/subscribe bus scoped to one execution
pub struct ScopedEventChannel {
    execution_id: String,
    capacity: usize,
    inner: Mutex<ChannelInner>,
}

impl std::fmt::Debug for ScopedEventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ScopedEventChannel")
            .field("execution_id", &self.execution_id)
            .field("capacity", &self.capacity)
            .field("subscribers", &inner.subscribers.len())
            .field("buffered", &inner.buffer.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

impl ScopedEventChannel {
    /// Create a channel retaining up to `capacity` events for replay
    pub fn new(execution_id: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            execution_id: execution_id.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(ChannelInner {
                subscribers: HashMap::new(),
                next_subscriber_id: 1,
                buffer: VecDeque::new(),
                destroyed: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Append to the replay buffer and deliver to every live subscriber
    ///
    /// No-op once the channel is destroyed.
    pub fn publish(&self, event: Event) {
        let mut inner = self.lock();
        if inner.destroyed {
            tracing::trace!(execution_id = %self.execution_id, "Publish on destroyed channel ignored");
            return;
        }

        inner.buffer.push_back(event.clone());
        while inner.buffer.len() > self.capacity {
            inner.buffer.pop_front();
        }

        // Closed receivers are pruned here rather than on drop
        inner
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Subscribe, receiving the replay buffer first and live events after
    ///
    /// Returns an already-closed subscription if the channel is destroyed.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let mut inner = self.lock();
        if inner.destroyed {
            return Subscription::closed();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for event in &inner.buffer {
            // Receiver is alive in this scope
            let _ = tx.send(event.clone());
        }

        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.insert(id, tx);

        tracing::debug!(
            execution_id = %self.execution_id,
            subscriber = id,
            replayed = inner.buffer.len(),
            "Subscriber attached"
        );

        Subscription {
            id,
            rx,
            channel: Arc::downgrade(self),
        }
    }

    /// Subscribe with a synchronous callback run on a background task
    ///
    /// A panicking callback is logged and skipped; the subscription stays
    /// attached and other subscribers are unaffected. Dropping the handle
    /// detaches the callback. Must be called within a tokio runtime.
    pub fn subscribe_fn<F>(self: &Arc<Self>, callback: F) -> CallbackSubscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe();
        let execution_id = self.execution_id.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                    tracing::warn!(
                        execution_id = %execution_id,
                        event_type = event.event_type(),
                        "Subscriber callback panicked"
                    );
                }
            }
        });
        CallbackSubscription { task }
    }

    fn remove_subscriber(&self, id: u64) {
        let mut inner = self.lock();
        if inner.subscribers.remove(&id).is_some() {
            tracing::debug!(execution_id = %self.execution_id, subscriber = id, "Subscriber detached");
        }
    }

    /// Destroy permanently: drop all subscribers and the replay buffer
    ///
    /// Idempotent. Open subscriptions observe end-of-stream.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        inner.subscribers.clear();
        inner.buffer.clear();
        tracing::debug!(execution_id = %self.execution_id, "Channel destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Drop buffered events without touching subscribers
    pub fn clear_buffer(&self) {
        self.lock().buffer.clear();
    }

    /// Snapshot of the replay buffer, oldest first
    pub fn buffer(&self) -> Vec<Event> {
        self.lock().buffer.iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    // ------------------------------------------------------------------
    // Convenience publishers
    // ------------------------------------------------------------------

    /// Publish a UI message with a fresh id, returning the id
    pub fn publish_message(&self, content: impl Into<String>, role: MessageRole) -> String {
        let message = UiMessage::new(content, role);
        let msg_id = message.msg_id.clone();
        self.publish(Event::Message(message));
        msg_id
    }

    /// Publish (or replace) the UI message with the given id
    pub fn publish_message_with_id(
        &self,
        msg_id: impl Into<String>,
        content: impl Into<String>,
        role: MessageRole,
    ) {
        self.publish(Event::Message(UiMessage::with_id(msg_id, content, role)));
    }

    pub fn publish_human_input_request(
        &self,
        request_id: impl Into<String>,
        prompt: impl Into<String>,
    ) {
        self.publish(Event::HumanInputRequest(HumanInputRequest {
            request_id: request_id.into(),
            prompt: prompt.into(),
        }));
    }

    pub fn publish_human_input_response(&self, request_id: impl Into<String>, action: HumanAction) {
        self.publish(Event::HumanInputResponse(HumanInputResponse {
            request_id: request_id.into(),
            action,
        }));
    }
}

/// Queue-backed subscription handle
///
/// Detaches from the channel on `unsubscribe` or drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
    channel: Weak<ScopedEventChannel>,
}

impl Subscription {
    fn closed() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self {
            id: 0,
            rx,
            channel: Weak::new(),
        }
    }

    /// Wait for the next event; `None` once the channel is destroyed or detached
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain every event delivered so far
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Detach from the channel
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.remove_subscriber(self.id);
        }
        self.channel = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl futures::Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Handle for a callback subscription; dropping it detaches the callback
pub struct CallbackSubscription {
    task: JoinHandle<()>,
}

impl CallbackSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for CallbackSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
