// protocol.rs: Capability interfaces a target delegates to.
//
// A protocol is one backend's implementation of a functional area
// (execution control, memory, registers, ...). The target never implements
// these; it holds at most one of each kind in a `ProtocolTable` and forwards
// guarded calls to them.
//
// Methods take `&self`: backends usually talk to a remote process and keep
// their own interior state, and the target must be able to call them
// without holding any of its locks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Identifies one protocol slot of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Execution,
    Memory,
    Register,
    Signal,
    Monitor,
    RemoteMemory,
}

impl ProtocolKind {
    /// Every slot, in teardown order.
    pub const ALL: [ProtocolKind; 6] = [
        ProtocolKind::Execution,
        ProtocolKind::Memory,
        ProtocolKind::Register,
        ProtocolKind::Signal,
        ProtocolKind::Monitor,
        ProtocolKind::RemoteMemory,
    ];
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Execution => write!(f, "execution"),
            ProtocolKind::Memory => write!(f, "memory"),
            ProtocolKind::Register => write!(f, "register"),
            ProtocolKind::Signal => write!(f, "signal"),
            ProtocolKind::Monitor => write!(f, "monitor"),
            ProtocolKind::RemoteMemory => write!(f, "remote_memory"),
        }
    }
}

/// Behavior shared by every protocol: release of backend resources.
pub trait Protocol: Send + Sync {
    /// Tear the backend down. Called at most once by the owning target.
    fn shutdown(&self) -> Result<(), ProtocolError>;
}

/// Identifier a backend hands out for a breakpoint or watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Options for inserting a breakpoint.
///
/// `Default` gives a plain, permanent software breakpoint on all threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointOptions {
    /// Request a hardware breakpoint.
    pub hardware: bool,
    /// Remove the breakpoint after its first hit.
    pub temporary: bool,
    /// Treat the location as a regex and insert on every match.
    pub regex: bool,
    /// Only break when this expression holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Number of hits to ignore before breaking.
    pub ignore_count: u32,
    /// Thread number to restrict the breakpoint to; 0 means all threads.
    pub thread: u32,
}

impl BreakpointOptions {
    /// Use a hardware breakpoint.
    pub fn hardware(mut self) -> Self {
        self.hardware = true;
        self
    }

    /// Remove the breakpoint after its first hit.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Treat the location as a regular expression over function names.
    pub fn regex(mut self) -> Self {
        self.regex = true;
        self
    }

    /// Only stop when `condition` holds.
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Skip the first `count` hits.
    pub fn ignore_count(mut self, count: u32) -> Self {
        self.ignore_count = count;
        self
    }

    /// Only stop in `thread`.
    pub fn thread(mut self, thread: u32) -> Self {
        self.thread = thread;
        self
    }
}

/// A value read from or written to target memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MemoryValue {
    /// A single word of the requested size.
    Word(u64),
    /// Several consecutive words.
    Words(Vec<u64>),
    /// Unprocessed bytes (raw mode).
    Raw(Vec<u8>),
}

impl MemoryValue {
    /// The single word, if this is a `Word`.
    pub fn as_word(&self) -> Option<u64> {
        match self {
            MemoryValue::Word(w) => Some(*w),
            _ => None,
        }
    }

    /// The words, if this is `Words`.
    pub fn as_words(&self) -> Option<&[u64]> {
        match self {
            MemoryValue::Words(ws) => Some(ws),
            _ => None,
        }
    }

    /// The bytes, if this is `Raw`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MemoryValue::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Execution control: resume, halt, single-step and breakpoints.
///
/// `cont`, `stop` and `step` only issue the request. The backend reports
/// the resulting state later through the target's `StateReporter`.
pub trait ExecutionProtocol: Protocol {
    fn cont(&self) -> Result<(), ProtocolError>;
    fn stop(&self) -> Result<(), ProtocolError>;
    fn step(&self) -> Result<(), ProtocolError>;

    /// Insert a breakpoint at `location` (source line, symbol or address).
    fn set_breakpoint(
        &self,
        location: &str,
        options: &BreakpointOptions,
    ) -> Result<BreakpointId, ProtocolError>;

    /// Insert a watchpoint on a variable name or address expression.
    fn set_watchpoint(
        &self,
        variable: &str,
        write: bool,
        read: bool,
    ) -> Result<BreakpointId, ProtocolError>;

    fn remove_breakpoint(&self, id: BreakpointId) -> Result<bool, ProtocolError>;
}

/// Word- and byte-level access to target memory.
pub trait MemoryProtocol: Protocol {
    /// Read `words` words of `size` bytes starting at `address`.
    /// With `raw`, the bytes are returned unprocessed.
    fn read_memory(
        &self,
        address: u64,
        size: usize,
        words: usize,
        raw: bool,
    ) -> Result<MemoryValue, ProtocolError>;

    fn write_memory(
        &self,
        address: u64,
        size: usize,
        value: &MemoryValue,
        words: usize,
        raw: bool,
    ) -> Result<bool, ProtocolError>;
}

/// Access to named CPU registers.
pub trait RegisterProtocol: Protocol {
    fn read_register(&self, name: &str) -> Result<u64, ProtocolError>;
    fn write_register(&self, name: &str, value: u64) -> Result<bool, ProtocolError>;
}

/// Signal delivery. Its domain operations live with the orchestrator.
pub trait SignalProtocol: Protocol {}

/// Backend monitoring. Its domain operations live with the orchestrator.
pub trait MonitorProtocol: Protocol {}

/// Memory forwarded from other targets. Its domain operations live with the
/// orchestrator.
pub trait RemoteMemoryProtocol: Protocol {}

/// The protocol slots of one target. Each is empty or holds one backend.
#[derive(Clone, Default)]
pub struct ProtocolTable {
    pub execution: Option<Arc<dyn ExecutionProtocol>>,
    pub memory: Option<Arc<dyn MemoryProtocol>>,
    pub register: Option<Arc<dyn RegisterProtocol>>,
    pub signal: Option<Arc<dyn SignalProtocol>>,
    pub monitor: Option<Arc<dyn MonitorProtocol>>,
    pub remote_memory: Option<Arc<dyn RemoteMemoryProtocol>>,
}

impl ProtocolTable {
    /// Whether the slot for `kind` is occupied.
    pub fn is_attached(&self, kind: ProtocolKind) -> bool {
        match kind {
            ProtocolKind::Execution => self.execution.is_some(),
            ProtocolKind::Memory => self.memory.is_some(),
            ProtocolKind::Register => self.register.is_some(),
            ProtocolKind::Signal => self.signal.is_some(),
            ProtocolKind::Monitor => self.monitor.is_some(),
            ProtocolKind::RemoteMemory => self.remote_memory.is_some(),
        }
    }

    /// Kinds with a protocol attached, in `ProtocolKind::ALL` order.
    pub fn attached(&self) -> Vec<ProtocolKind> {
        ProtocolKind::ALL
            .into_iter()
            .filter(|kind| self.is_attached(*kind))
            .collect()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.attached().is_empty()
    }
}

impl fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.attached()).finish()
    }
}

/// Ties a protocol trait object type to its slot in the table.
///
/// Lets the guard and the attach/shutdown paths select a slot by type, so a
/// missing kind is a compile error rather than a lookup failure.
pub trait ProtocolSlot: Protocol {
    const KIND: ProtocolKind;

    fn slot(table: &ProtocolTable) -> &Option<Arc<Self>>;
    fn slot_mut(table: &mut ProtocolTable) -> &mut Option<Arc<Self>>;
}

macro_rules! protocol_slot {
    ($trait_name:ident, $kind:ident, $field:ident) => {
        impl ProtocolSlot for dyn $trait_name {
            const KIND: ProtocolKind = ProtocolKind::$kind;

            fn slot(table: &ProtocolTable) -> &Option<Arc<Self>> {
                &table.$field
            }

            fn slot_mut(table: &mut ProtocolTable) -> &mut Option<Arc<Self>> {
                &mut table.$field
            }
        }
    };
}

protocol_slot!(ExecutionProtocol, Execution, execution);
protocol_slot!(MemoryProtocol, Memory, memory);
protocol_slot!(RegisterProtocol, Register, register);
protocol_slot!(SignalProtocol, Signal, signal);
protocol_slot!(MonitorProtocol, Monitor, monitor);
protocol_slot!(RemoteMemoryProtocol, RemoteMemory, remote_memory);
