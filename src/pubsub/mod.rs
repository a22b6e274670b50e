//! Scoped publish/subscribe
//!
//! Every execution streams its progress through its own
//! [`ScopedEventChannel`]; the [`ChannelRegistry`] hands channels out by
//! execution id and delays their destruction so a reconnecting UI can
//! replay what it missed.

pub mod channel;
pub mod registry;
pub mod types;

pub use channel::{CallbackSubscription, ScopedEventChannel, Subscription};
pub use registry::{ChannelRegistry, ChannelStats};
pub use types::{
    generate_msg_id, Event, HumanAction, HumanInputRequest, HumanInputResponse, MessageRole,
    UiMessage,
};
