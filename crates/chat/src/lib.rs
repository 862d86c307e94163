//! Chat transport integration for perch.
//!
//! - **Transport** (`transport`) - the collaborator contract a concrete chat network implements
//! - **Routing** (`router`) - subscriptions per event kind, each run through the serialized dispatcher
//! - **Recording** (`recorder`) - persistence of every transport event against the entity store
//! - **Clients** (`client`) - the start/stop/send/subscribe capability, backed by a transport or a fake
//! - **Console** (`console`) - a line-oriented local transport for running the bot from a terminal
//!
//! # Architecture
//!
//! ```text
//! ChatTransport → TransportClient → EventRouter → SerializedDispatcher → EntityRecorder → Store
//!                                                                              ↓
//!                                                              public messages → bot intake
//! ```

pub mod client;
pub mod console;
pub mod recorder;
pub mod router;
pub mod transport;

pub use client::{Client, FakeClient, TransportClient};
pub use console::ConsoleTransport;
pub use recorder::EntityRecorder;
pub use router::{EventContext, EventHandler, EventHandlerError, EventRouter, RouteReport};
pub use transport::{ChatTransport, OutboundMessage, ReconnectPolicy, TransportError};
