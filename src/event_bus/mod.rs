//! Fan-out of structured run events to pluggable sinks.
//!
//! Nodes emit [`Event`]s through their context; the runner owns an
//! [`EventBus`] that broadcasts each event to every configured
//! [`EventSink`].

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{DiagnosticEvent, Event, NodeEvent};
pub use sink::{ChannelSink, CollectorSink, EventSink, StdOutSink};
