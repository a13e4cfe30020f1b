//! GPU Microcontroller Command Queue
//!
//! The command/response channel between a host GPU driver and the firmware
//! on the GPU's embedded controller. Everything crosses one shared-memory
//! window; head/tail cursors live in per-ring registers.
//!
//! Layers, leaves first:
//! - [`window`]: host offset <-> local address translation over the window
//! - [`queue`] + [`sweep`]: inbound ring decode and tail reclaim
//! - [`dispatcher`] + [`notify`]: wake handling and routing to unit inboxes
//! - [`unit`] + [`router`]: per-subsystem task loop and class-indexed objects
//! - [`transport`]: assembly of the above into running threads

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hal;
pub mod host;
pub mod inbox;
pub mod notify;
pub mod queue;
pub mod response;
mod ring;
pub mod router;
pub mod stats;
pub mod sweep;
pub mod transport;
pub mod types;
pub mod unit;
pub mod window;

pub use config::{RingConfig, TransportConfig, WindowConfig};
pub use dispatcher::{AdminReason, Dispatcher, Route, RouteTable, WakeOutcome};
pub use error::TransportError;
pub use hal::fake::FakeQueueRegisters;
pub use hal::QueueRegisters;
pub use host::{loopback, HostEndpoint, Response};
pub use inbox::{unit_inbox, InboxReceiver, UnitInbox};
pub use notify::{Notifier, StartupGate, Wake};
pub use queue::{CommandQueue, Decoded, QueueDescriptor};
pub use response::ResponseQueue;
pub use stats::{StatsSnapshot, TransportStats};
pub use transport::{RunningTransport, Transport};
pub use types::{CommandHeader, CtrlFlags, DispatchEnvelope, EventKind, QueueId, UnitId};
pub use unit::{UnitHandler, UnitTask};
pub use window::{LocalAddr, OffsetTranslator, SharedWindow};
