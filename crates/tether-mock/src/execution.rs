// execution.rs: Scripted execution backend.
//
// Records every request and answers it the way a remote debugger stub
// would: the call returns immediately and the resulting state is reported
// afterwards, in order, from a worker thread. `inline()` reports from
// inside the call instead, the way a synchronous backend might.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tether_target::{
    BreakpointId, BreakpointOptions, ExecutionProtocol, Protocol, ProtocolError, StateReporter,
    TargetState,
};

/// One request received by [`MockExecution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionCall {
    Cont,
    Stop,
    Step,
    SetBreakpoint {
        location: String,
        options: BreakpointOptions,
    },
    SetWatchpoint {
        variable: String,
        write: bool,
        read: bool,
    },
    RemoveBreakpoint(BreakpointId),
}

/// A breakpoint or watchpoint the mock currently has inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted {
    Breakpoint {
        location: String,
        options: BreakpointOptions,
    },
    Watchpoint {
        variable: String,
        write: bool,
        read: bool,
    },
}

enum Reporting {
    Inline,
    /// Reports go through a channel to a worker so they arrive in order.
    Deferred(Mutex<Option<Sender<TargetState>>>),
}

pub struct MockExecution {
    reporting: Reporting,
    reporter: StateReporter,
    calls: Mutex<Vec<ExecutionCall>>,
    inserted: Mutex<BTreeMap<BreakpointId, Inserted>>,
    next_id: AtomicU32,
    fail_next: Mutex<Option<ProtocolError>>,
    shutdowns: AtomicUsize,
}

impl MockExecution {
    /// Report each resulting state `delay` after the request.
    pub fn new(reporter: StateReporter, delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<TargetState>();
        let worker = reporter.clone();
        thread::spawn(move || {
            for state in rx {
                thread::sleep(delay);
                worker.update_state(state);
            }
        });

        Self::with_reporting(reporter, Reporting::Deferred(Mutex::new(Some(tx))))
    }

    /// Report each resulting state synchronously, before the call returns.
    pub fn inline(reporter: StateReporter) -> Self {
        Self::with_reporting(reporter, Reporting::Inline)
    }

    fn with_reporting(reporter: StateReporter, reporting: Reporting) -> Self {
        Self {
            reporting,
            reporter,
            calls: Mutex::new(Vec::new()),
            inserted: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            fail_next: Mutex::new(None),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<ExecutionCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn inserted(&self) -> BTreeMap<BreakpointId, Inserted> {
        self.inserted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Make the next request fail with `error` without being recorded.
    pub fn fail_next(&self, error: ProtocolError) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Simulate the target halting on its own (breakpoint hit, fault).
    pub fn halt(&self) {
        self.report(TargetState::Stopped);
    }

    /// Simulate the controlled process exiting.
    pub fn exit(&self) {
        self.report(TargetState::Exited);
    }

    fn report(&self, state: TargetState) {
        match &self.reporting {
            Reporting::Inline => self.reporter.update_state(state),
            Reporting::Deferred(tx) => {
                let tx = tx.lock().unwrap_or_else(PoisonError::into_inner);
                match tx.as_ref() {
                    Some(tx) if tx.send(state).is_ok() => {}
                    _ => tracing::debug!(
                        target_name = self.reporter.target_name(),
                        "mock execution already shut down, dropping {} report",
                        state
                    ),
                }
            }
        }
    }

    fn accept(&self, call: ExecutionCall) -> Result<(), ProtocolError> {
        if let Some(error) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(error);
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }

    fn insert(&self, entry: Inserted) -> BreakpointId {
        let id = BreakpointId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.inserted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        id
    }
}

impl Protocol for MockExecution {
    fn shutdown(&self) -> Result<(), ProtocolError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if let Reporting::Deferred(tx) = &self.reporting {
            // Dropping the sender lets the worker drain and exit.
            tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        Ok(())
    }
}

impl ExecutionProtocol for MockExecution {
    fn cont(&self) -> Result<(), ProtocolError> {
        self.accept(ExecutionCall::Cont)?;
        self.report(TargetState::Running);
        Ok(())
    }

    fn stop(&self) -> Result<(), ProtocolError> {
        self.accept(ExecutionCall::Stop)?;
        self.report(TargetState::Stopped);
        Ok(())
    }

    fn step(&self) -> Result<(), ProtocolError> {
        self.accept(ExecutionCall::Step)?;
        self.report(TargetState::Running);
        self.report(TargetState::Stopped);
        Ok(())
    }

    fn set_breakpoint(
        &self,
        location: &str,
        options: &BreakpointOptions,
    ) -> Result<BreakpointId, ProtocolError> {
        if location.is_empty() {
            return Err(ProtocolError::Rejected("empty breakpoint location".into()));
        }
        self.accept(ExecutionCall::SetBreakpoint {
            location: location.to_string(),
            options: options.clone(),
        })?;
        Ok(self.insert(Inserted::Breakpoint {
            location: location.to_string(),
            options: options.clone(),
        }))
    }

    fn set_watchpoint(
        &self,
        variable: &str,
        write: bool,
        read: bool,
    ) -> Result<BreakpointId, ProtocolError> {
        if !write && !read {
            return Err(ProtocolError::Rejected(
                "watchpoint must trigger on read or write".into(),
            ));
        }
        self.accept(ExecutionCall::SetWatchpoint {
            variable: variable.to_string(),
            write,
            read,
        })?;
        Ok(self.insert(Inserted::Watchpoint {
            variable: variable.to_string(),
            write,
            read,
        }))
    }

    fn remove_breakpoint(&self, id: BreakpointId) -> Result<bool, ProtocolError> {
        self.accept(ExecutionCall::RemoveBreakpoint(id))?;
        Ok(self
            .inserted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_target::Target;

    #[test]
    fn inline_reports_before_returning() {
        let target = Target::new("inline");
        let exec = MockExecution::inline(target.reporter());
        exec.step().unwrap();
        assert_eq!(target.state(), TargetState::Stopped);
        assert_eq!(exec.calls(), vec![ExecutionCall::Step]);
    }

    #[test]
    fn breakpoint_ids_are_unique_and_removable() {
        let target = Target::new("bp");
        let exec = MockExecution::inline(target.reporter());

        let a = exec
            .set_breakpoint("main.c:10", &BreakpointOptions::default())
            .unwrap();
        let b = exec.set_watchpoint("counter", true, false).unwrap();
        assert_ne!(a, b);
        assert_eq!(exec.inserted().len(), 2);

        assert!(exec.remove_breakpoint(a).unwrap());
        assert!(!exec.remove_breakpoint(a).unwrap());
        assert_eq!(exec.inserted().len(), 1);
    }

    #[test]
    fn fail_next_fails_once_without_recording() {
        let target = Target::new("flaky");
        let exec = MockExecution::inline(target.reporter());
        exec.fail_next(ProtocolError::Timeout);

        assert!(matches!(exec.cont(), Err(ProtocolError::Timeout)));
        assert!(exec.calls().is_empty());
        assert_eq!(target.state(), TargetState::Created);

        exec.cont().unwrap();
        assert_eq!(target.state(), TargetState::Running);
    }

    #[test]
    fn reports_after_shutdown_are_dropped() {
        let target = Target::new("gone");
        let exec = MockExecution::new(target.reporter(), Duration::ZERO);
        exec.shutdown().unwrap();
        exec.halt();
        assert_eq!(exec.shutdown_count(), 1);
        assert_eq!(target.state(), TargetState::Created);
    }

    #[test]
    fn watchpoint_needs_a_trigger() {
        let target = Target::new("wp");
        let exec = MockExecution::inline(target.reporter());
        assert!(matches!(
            exec.set_watchpoint("x", false, false),
            Err(ProtocolError::Rejected(_))
        ));
    }
}
