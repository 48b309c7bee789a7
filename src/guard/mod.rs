//! Transaction delay guard
//!
//! Gates a multisig wallet's outbound calls behind a fixed cooldown. A
//! transaction must be presented twice: once to queue it, and again after
//! the cooldown to receive a [`Permit`].
//!
//! # Architecture
//!
//! ```text
//! SafeTransaction → fingerprint → DelayGuard → GuardStore
//!                                     │
//!                         AuthorizationGate / Clock
//!                                     │
//!                                 EventSink → forensic log
//! ```
//!
//! # Guarantees
//!
//! - At most one queue entry per fingerprint
//! - Unauthorized callers never reach the store
//! - Every outcome is emitted as an event; no state change without one

pub mod auth;
pub mod clock;
pub mod engine;
pub mod events;
pub mod fingerprint;
pub mod monitor;
pub mod store;
pub mod types;

pub use auth::{AuthorizationGate, Unauthorized};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{DelayGuard, GuardConfig, GuardError, PendingEntry, Permit, DEFAULT_DELAY_SECS};
pub use events::{
    EventSink, FanoutSink, GuardEvent, GuardEventKind, GuardOperation, JsonlSink, MemorySink,
    SinkError, TracingSink,
};
pub use fingerprint::fingerprint;
pub use monitor::{GuardMonitor, MonitorRecord, MonitorStatus};
pub use store::{DirectoryStore, GuardStore, MemoryStore, StoreError};
pub use types::{Address, CheckContext, Fingerprint, Operation, ParseError, SafeTransaction};
