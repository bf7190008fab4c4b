//! Event bus for workflow lifecycle events.
//!
//! Provides an `EventBus` that dispatches `WorkflowEvent` values to named
//! handlers and to `tokio::sync::broadcast` subscribers.

pub mod bus;

pub use bus::{EventBus, SubscriptionId};
