//! In-process event fan-out for the relay runtime
//!
//! The bus streams structured [`RunEvent`]s to observers (tracing backends,
//! the HTTP SSE endpoint). Publishers never block on slow consumers: each
//! subscriber owns a bounded channel and overflowing events are dropped for
//! that subscriber only.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventSink, SubscriberId};
pub use event::{EventKind, EventStatus, RunEvent};
