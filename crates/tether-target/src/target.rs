// target.rs: Target: one controllable emulator or debugger target.
//
// A Target holds the current lifecycle state, auxiliary status entries and
// at most one protocol of each kind. Its action surface (cont, step,
// read_memory, ...) is uniform no matter which backends are attached:
//
//   caller ──> Target::step() ──guard──> ExecutionProtocol::step()
//                                               │ (later, any thread)
//   waiter <── Target::wait() <── StateReporter::update_state(Stopped)
//
// Actions only issue requests. Backends report the resulting state through
// a `StateReporter`, which wakes anyone blocked in `wait()`.
//
// No lock is held while a protocol method runs, so a backend may report a
// state change synchronously from inside its own call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::TargetConfig;
use crate::error::TargetError;
use crate::events::{EventDispatcher, JsonlSink, TargetEvent, TextLogSink, TransitionSink};
use crate::guard::{self, ActionGuard};
use crate::protocol::{
    BreakpointId, BreakpointOptions, ExecutionProtocol, MemoryProtocol, MemoryValue,
    MonitorProtocol, ProtocolKind, ProtocolSlot, ProtocolTable, RegisterProtocol,
    RemoteMemoryProtocol, SignalProtocol,
};
use crate::state::{StateCell, TargetState, WaitOutcome};
use crate::status::TargetStatus;

/// Variant-specific setup run by [`Target::init`], typically attaching the
/// protocols of a concrete backend.
pub trait TargetInitializer: Send + Sync {
    fn init(&self, target: &Target) -> Result<(), TargetError>;
}

impl<F> TargetInitializer for F
where
    F: Fn(&Target) -> Result<(), TargetError> + Send + Sync,
{
    fn init(&self, target: &Target) -> Result<(), TargetError> {
        self(target)
    }
}

/// State shared between a target and the reporters handed to its backends.
struct Shared {
    name: String,
    state: StateCell,
    events: RwLock<EventDispatcher>,
    /// Held across publish and dispatch so sinks see transitions in the
    /// order they were applied.
    reporting: Mutex<()>,
}

impl Shared {
    // Sinks run under `reporting`; a sink must not report state itself.
    fn update_state(&self, state: TargetState) {
        let _order = self.reporting.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.state.publish(state);
        tracing::info!(target_name = %self.name, from = %previous, to = %state, "state changed");
        self.dispatch(&TargetEvent::state_changed(&self.name, previous, state));
    }

    fn dispatch(&self, event: &TargetEvent) {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dispatch(event);
    }
}

/// Handle a backend keeps to report state changes of its target.
///
/// Cheap to clone and safe to use from any thread. Holding a reporter does
/// not keep the target's protocols alive.
#[derive(Clone)]
pub struct StateReporter {
    shared: Arc<Shared>,
}

impl StateReporter {
    /// Name of the target this reporter belongs to.
    pub fn target_name(&self) -> &str {
        &self.shared.name
    }

    /// Current state of the target.
    pub fn state(&self) -> TargetState {
        self.shared.state.current()
    }

    /// Report that the target is now in `state`. Wakes every waiter.
    pub fn update_state(&self, state: TargetState) {
        self.shared.update_state(state);
    }
}

impl fmt::Debug for StateReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateReporter")
            .field("target", &self.shared.name)
            .finish()
    }
}

/// One controllable execution target.
pub struct Target {
    shared: Arc<Shared>,
    protocols: Mutex<ProtocolTable>,
    status: Mutex<BTreeMap<String, Value>>,
    initializer: Option<Box<dyn TargetInitializer>>,
    initialized: AtomicBool,
}

impl Target {
    /// Create a target in the `Created` state with every slot empty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: StateCell::new(TargetState::Created),
                events: RwLock::new(EventDispatcher::new()),
                reporting: Mutex::new(()),
            }),
            protocols: Mutex::new(ProtocolTable::default()),
            status: Mutex::new(BTreeMap::new()),
            initializer: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a target from config, wiring up its log sinks and initial
    /// status entries.
    pub fn from_config(config: &TargetConfig) -> Result<Self, TargetError> {
        let target = Self::new(config.name.clone());

        if let (Some(dir), Some(log_path)) = (&config.output_directory, config.log_path()) {
            std::fs::create_dir_all(dir).map_err(|source| TargetError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            target.add_sink(Box::new(TextLogSink::new(log_path, config.log_source())));
        }
        if let Some(event_log) = &config.event_log {
            target.add_sink(Box::new(JsonlSink::new(event_log)));
        }
        target.lock_status().extend(config.status.clone());

        Ok(target)
    }

    /// Set the setup hook run by [`Target::init`].
    pub fn with_initializer(mut self, initializer: impl TargetInitializer + 'static) -> Self {
        self.initializer = Some(Box::new(initializer));
        self
    }

    /// Unique name of the target within its orchestrator.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TargetState {
        self.shared.state.current()
    }

    /// A handle for backends to report state changes with.
    pub fn reporter(&self) -> StateReporter {
        StateReporter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register a sink for this target's transition events.
    pub fn add_sink(&self, sink: Box<dyn TransitionSink>) {
        self.shared
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_sink(sink);
    }

    // Both maps hold plain values that a panicking thread cannot leave torn.
    fn lock_protocols(&self) -> MutexGuard<'_, ProtocolTable> {
        self.protocols.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Protocol slots ──────────────────────────────────────────

    /// Attach a protocol to its (empty) slot.
    pub fn attach<P: ProtocolSlot + ?Sized>(&self, protocol: Arc<P>) -> Result<(), TargetError> {
        {
            let mut table = self.lock_protocols();
            let slot = P::slot_mut(&mut table);
            if slot.is_some() {
                return Err(TargetError::AlreadyAttached {
                    target: self.name().to_string(),
                    protocol: P::KIND,
                });
            }
            *slot = Some(protocol);
        }

        tracing::debug!(target_name = %self.name(), protocol = %P::KIND, "protocol attached");
        self.shared
            .dispatch(&TargetEvent::protocol_attached(self.name(), P::KIND));
        Ok(())
    }

    /// Attach the execution protocol.
    pub fn attach_execution(&self, protocol: Arc<dyn ExecutionProtocol>) -> Result<(), TargetError> {
        self.attach(protocol)
    }

    /// Attach the memory protocol.
    pub fn attach_memory(&self, protocol: Arc<dyn MemoryProtocol>) -> Result<(), TargetError> {
        self.attach(protocol)
    }

    /// Attach the register protocol.
    pub fn attach_register(&self, protocol: Arc<dyn RegisterProtocol>) -> Result<(), TargetError> {
        self.attach(protocol)
    }

    /// Attach the signal protocol.
    pub fn attach_signal(&self, protocol: Arc<dyn SignalProtocol>) -> Result<(), TargetError> {
        self.attach(protocol)
    }

    /// Attach the monitor protocol.
    pub fn attach_monitor(&self, protocol: Arc<dyn MonitorProtocol>) -> Result<(), TargetError> {
        self.attach(protocol)
    }

    /// Attach the remote-memory protocol.
    pub fn attach_remote_memory(
        &self,
        protocol: Arc<dyn RemoteMemoryProtocol>,
    ) -> Result<(), TargetError> {
        self.attach(protocol)
    }

    /// Whether a protocol of `kind` is attached.
    pub fn has_protocol(&self, kind: ProtocolKind) -> bool {
        self.lock_protocols().is_attached(kind)
    }

    /// Kinds of every attached protocol, in `ProtocolKind::ALL` order.
    pub fn attached_protocols(&self) -> Vec<ProtocolKind> {
        self.lock_protocols().attached()
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Run the initializer, if any. Only the first successful call does work.
    pub fn init(&self) -> Result<(), TargetError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(initializer) = &self.initializer {
            if let Err(e) = initializer.init(self) {
                self.initialized.store(false, Ordering::Release);
                tracing::warn!(target_name = %self.name(), "initializer failed: {}", e);
                return Err(e);
            }
        }

        tracing::debug!(target_name = %self.name(), "target initialized");
        Ok(())
    }

    /// Shut down and detach every attached protocol.
    ///
    /// Each protocol is shut down exactly once; empty slots are skipped and
    /// a second call is a no-op. A failing teardown is logged and the
    /// remaining protocols are still released.
    pub fn shutdown(&self) {
        let table = std::mem::take(&mut *self.lock_protocols());
        if table.is_empty() {
            return;
        }

        let ProtocolTable {
            execution,
            memory,
            register,
            signal,
            monitor,
            remote_memory,
        } = table;
        self.release(execution);
        self.release(memory);
        self.release(register);
        self.release(signal);
        self.release(monitor);
        self.release(remote_memory);

        tracing::info!(target_name = %self.name(), "target shut down");
    }

    fn release<P: ProtocolSlot + ?Sized>(&self, protocol: Option<Arc<P>>) {
        let Some(protocol) = protocol else {
            return;
        };

        if let Err(e) = protocol.shutdown() {
            tracing::warn!(
                target_name = %self.name(),
                protocol = %P::KIND,
                "protocol shutdown failed: {}",
                e
            );
        }
        self.shared
            .dispatch(&TargetEvent::protocol_detached(self.name(), P::KIND));
    }

    // ── Guarded actions ─────────────────────────────────────────

    fn guarded<P: ProtocolSlot + ?Sized>(&self, guard: &ActionGuard) -> Result<Arc<P>, TargetError> {
        let protocol = P::slot(&self.lock_protocols()).clone();
        guard
            .check(protocol, &self.shared.state)
            .map_err(|e| {
                tracing::debug!(target_name = %self.name(), action = guard.action, "{}", e);
                TargetError::from(e)
            })
    }

    /// Resume execution. Requires `Stopped`.
    pub fn cont(&self) -> Result<(), TargetError> {
        let execution = self.guarded::<dyn ExecutionProtocol>(&guard::CONT)?;
        Ok(execution.cont()?)
    }

    /// Halt execution. Requires `Running`.
    pub fn stop(&self) -> Result<(), TargetError> {
        let execution = self.guarded::<dyn ExecutionProtocol>(&guard::STOP)?;
        Ok(execution.stop()?)
    }

    /// Execute one instruction. Requires `Stopped`.
    pub fn step(&self) -> Result<(), TargetError> {
        let execution = self.guarded::<dyn ExecutionProtocol>(&guard::STEP)?;
        Ok(execution.step()?)
    }

    /// Read `words` words of `size` bytes at `address`; raw bytes if `raw`.
    pub fn read_memory(
        &self,
        address: u64,
        size: usize,
        words: usize,
        raw: bool,
    ) -> Result<MemoryValue, TargetError> {
        let memory = self.guarded::<dyn MemoryProtocol>(&guard::READ_MEMORY)?;
        Ok(memory.read_memory(address, size, words, raw)?)
    }

    /// Write `value` as `words` words of `size` bytes at `address`. Requires `Stopped`.
    pub fn write_memory(
        &self,
        address: u64,
        size: usize,
        value: &MemoryValue,
        words: usize,
        raw: bool,
    ) -> Result<bool, TargetError> {
        let memory = self.guarded::<dyn MemoryProtocol>(&guard::WRITE_MEMORY)?;
        Ok(memory.write_memory(address, size, value, words, raw)?)
    }

    /// Read the named register. Requires `Stopped`.
    pub fn read_register(&self, name: &str) -> Result<u64, TargetError> {
        let registers = self.guarded::<dyn RegisterProtocol>(&guard::READ_REGISTER)?;
        Ok(registers.read_register(name)?)
    }

    /// Write the named register. Requires `Stopped`.
    pub fn write_register(&self, name: &str, value: u64) -> Result<bool, TargetError> {
        let registers = self.guarded::<dyn RegisterProtocol>(&guard::WRITE_REGISTER)?;
        Ok(registers.write_register(name, value)?)
    }

    /// Insert a breakpoint at `location`. Requires `Stopped`.
    pub fn set_breakpoint(
        &self,
        location: &str,
        options: &BreakpointOptions,
    ) -> Result<BreakpointId, TargetError> {
        let execution = self.guarded::<dyn ExecutionProtocol>(&guard::SET_BREAKPOINT)?;
        Ok(execution.set_breakpoint(location, options)?)
    }

    /// Watch `variable` for writes and/or reads. Requires `Stopped`.
    pub fn set_watchpoint(
        &self,
        variable: &str,
        write: bool,
        read: bool,
    ) -> Result<BreakpointId, TargetError> {
        let execution = self.guarded::<dyn ExecutionProtocol>(&guard::SET_WATCHPOINT)?;
        Ok(execution.set_watchpoint(variable, write, read)?)
    }

    /// Remove a breakpoint or watchpoint. Requires `Stopped`.
    pub fn remove_breakpoint(&self, id: BreakpointId) -> Result<bool, TargetError> {
        let execution = self.guarded::<dyn ExecutionProtocol>(&guard::REMOVE_BREAKPOINT)?;
        Ok(execution.remove_breakpoint(id)?)
    }

    /// Alias of [`Target::read_register`].
    pub fn rr(&self, name: &str) -> Result<u64, TargetError> {
        self.read_register(name)
    }

    /// Alias of [`Target::write_register`].
    pub fn wr(&self, name: &str, value: u64) -> Result<bool, TargetError> {
        self.write_register(name, value)
    }

    /// Alias of [`Target::read_memory`].
    pub fn rm(
        &self,
        address: u64,
        size: usize,
        words: usize,
        raw: bool,
    ) -> Result<MemoryValue, TargetError> {
        self.read_memory(address, size, words, raw)
    }

    /// Alias of [`Target::write_memory`].
    pub fn wm(
        &self,
        address: u64,
        size: usize,
        value: &MemoryValue,
        words: usize,
        raw: bool,
    ) -> Result<bool, TargetError> {
        self.write_memory(address, size, value, words, raw)
    }

    // ── State and status ────────────────────────────────────────

    /// Record a state reported by a backend and wake every waiter.
    pub fn update_state(&self, state: TargetState) {
        self.shared.update_state(state);
    }

    /// Block until a reported update leaves the target `Stopped`.
    ///
    /// Returns immediately if that has already happened since the last
    /// `cont`/`stop`/`step`. Returns `TargetError::Exited` if the target
    /// exits instead. Not cancellable; see [`Target::wait_timeout`].
    pub fn wait(&self) -> Result<(), TargetError> {
        let outcome = self.shared.state.wait_for_stop(None);
        self.wait_result(outcome, Duration::ZERO)
    }

    /// Like [`Target::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), TargetError> {
        let deadline = Instant::now().checked_add(timeout);
        let outcome = self.shared.state.wait_for_stop(deadline);
        self.wait_result(outcome, timeout)
    }

    fn wait_result(&self, outcome: WaitOutcome, timeout: Duration) -> Result<(), TargetError> {
        match outcome {
            WaitOutcome::Stopped => Ok(()),
            WaitOutcome::Exited => Err(TargetError::Exited {
                target: self.name().to_string(),
            }),
            WaitOutcome::TimedOut => Err(TargetError::WaitTimedOut {
                target: self.name().to_string(),
                timeout,
            }),
        }
    }

    /// Status snapshot: the current state merged with auxiliary entries.
    pub fn get_status(&self) -> TargetStatus {
        let extra = self.lock_status();
        TargetStatus::merge(self.state(), &extra)
    }

    /// Set an auxiliary status entry, returning the previous value.
    pub fn set_status(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock_status().insert(key.into(), value.into())
    }

    /// Remove an auxiliary status entry, returning its value.
    pub fn remove_status(&self, key: &str) -> Option<Value> {
        self.lock_status().remove(key)
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.shared.state.snapshot();
        f.debug_struct("Target")
            .field("name", &self.shared.name)
            .field("state", &snapshot.state)
            .field("settled", &snapshot.settled)
            .field("protocols", &*self.lock_protocols())
            .finish()
    }
}
