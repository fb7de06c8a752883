//! # kapsel-events
//!
//! Event system and output streaming for the kapsel sandbox SDK.
//!
//! The [`EventBus`] is a single-process publish/subscribe hub scoped to one
//! sandbox, with typed subscriptions and both async fan-out and synchronous
//! delivery. The stream types carry per-chunk output of a running program
//! from a backend's pipes to the caller's handler.
//!
//! ## Example
//!
//! ```rust
//! use kapsel_events::{Event, EventBus, EventType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::new();
//!     let sub = bus.subscribe(EventType::ExecutionComplete, |event| {
//!         println!("done: {:?}", event.data);
//!     });
//!
//!     bus.emit_sync(&Event::new(EventType::ExecutionComplete, "sb-1"));
//!     sub.unsubscribe();
//! }
//! ```

mod bus;
mod event;
mod stream;

pub use bus::{EventBus, Subscription};
pub use event::{
    Event, EventHandler, EventType, ExecutionCompleteData, ExecutionStartedData, FileEventData,
    OutputData, PortEventData,
};
pub use stream::{
    MultiStreamWriter, OutputStream, StreamError, StreamEvent, StreamEventType, StreamHandler,
};
