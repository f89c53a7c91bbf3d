//! # tether-mock
//!
//! In-memory protocol backends for exercising a [`tether_target::Target`]
//! without an emulator or debugger attached.
//!
//! - [`MockExecution`] records requests and reports state changes through a
//!   [`tether_target::StateReporter`], either deferred or inline.
//! - [`MockMemory`] is a sparse little-endian byte store.
//! - [`MockRegisters`] is a fixed named register file.
//! - [`MockAuxiliary`] covers signal, monitor and remote-memory slots.

pub mod auxiliary;
pub mod execution;
pub mod memory;
pub mod registers;

pub use auxiliary::MockAuxiliary;
pub use execution::{ExecutionCall, Inserted, MockExecution};
pub use memory::MockMemory;
pub use registers::MockRegisters;
