//! # tether-target
//!
//! A single controllable execution target: one emulator- or
//! debugger-controlled process or device, driven through a uniform action
//! surface no matter which backends implement each capability.
//!
//! A [`Target`] holds its lifecycle [`TargetState`], an auxiliary status map
//! and at most one protocol of each [`ProtocolKind`]. Every state-sensitive
//! action passes an [`ActionGuard`] before it is forwarded to the attached
//! protocol.
//!
//! ## Key components
//!
//! - [`Target`]: the guarded facade (cont, stop, step, memory, registers,
//!   breakpoints) plus `update_state` / `wait` synchronization
//! - [`StateReporter`]: handle backends use to report state changes
//! - [`ExecutionProtocol`], [`MemoryProtocol`], [`RegisterProtocol`], ...:
//!   the capability interfaces backends implement
//! - [`TargetEvent`] / [`TransitionSink`]: transition auditing
//! - [`TargetConfig`]: TOML configuration
//!
//! ## Key invariants
//!
//! - A guarded action fails with a [`PreconditionError`] before touching any
//!   backend if its protocol is missing or the target is in the wrong state.
//! - `update_state` is the only writer of the state.
//! - `shutdown` releases each attached protocol exactly once.

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod protocol;
pub mod state;
pub mod status;
pub mod target;

pub use config::TargetConfig;
pub use error::{PreconditionError, PreconditionFailure, ProtocolError, TargetError};
pub use events::{EventDispatcher, JsonlSink, TargetEvent, TextLogSink, TransitionSink};
pub use guard::ActionGuard;
pub use protocol::{
    BreakpointId, BreakpointOptions, ExecutionProtocol, MemoryProtocol, MemoryValue,
    MonitorProtocol, Protocol, ProtocolKind, ProtocolSlot, ProtocolTable, RegisterProtocol,
    RemoteMemoryProtocol, SignalProtocol,
};
pub use state::TargetState;
pub use status::TargetStatus;
pub use target::{StateReporter, Target, TargetInitializer};
