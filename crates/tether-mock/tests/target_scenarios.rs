// target_scenarios.rs: End-to-end target sessions against mock backends.
//
// Each test drives a Target the way an orchestrator would:
//
//   1. Create the target and attach backends
//   2. Report an initial stop, as a backend does once connected
//   3. Issue guarded actions and wait for the backend's reports
//   4. Shut down
//
// VERIFY:
//   - Actions are refused before reaching a backend when the state is wrong
//   - wait() returns only once a reported update leaves the target stopped
//   - Synchronous reporting from inside a backend call does not deadlock
//   - Every protocol is released exactly once

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tether_mock::{ExecutionCall, MockAuxiliary, MockExecution, MockMemory, MockRegisters};
use tether_target::{
    BreakpointOptions, MemoryValue, PreconditionFailure, ProtocolError, ProtocolKind, Target,
    TargetConfig, TargetError, TargetState,
};

const REPORT_DELAY: Duration = Duration::from_millis(20);
const PATIENCE: Duration = Duration::from_secs(5);

fn wrong_state(err: &TargetError) -> Option<(TargetState, TargetState)> {
    match &err.precondition()?.failure {
        PreconditionFailure::WrongState { expected, actual } => Some((*expected, *actual)),
        _ => None,
    }
}

#[test]
fn memory_is_readable_once_stopped() {
    let target = Target::new("board");
    let exec = Arc::new(MockExecution::new(target.reporter(), REPORT_DELAY));
    let memory = Arc::new(MockMemory::new());
    memory.load(0x1000, &[0xef, 0xbe, 0xad, 0xde]);
    target.attach_execution(exec.clone()).unwrap();
    target.attach_memory(memory.clone()).unwrap();

    let err = target.read_memory(0x1000, 4, 1, false).unwrap_err();
    assert_eq!(
        wrong_state(&err),
        Some((TargetState::Stopped, TargetState::Created))
    );
    assert_eq!(memory.read_count(), 0);

    target.update_state(TargetState::Stopped);
    assert_eq!(
        target.read_memory(0x1000, 4, 1, false).unwrap(),
        MemoryValue::Word(0xdead_beef)
    );
    assert_eq!(target.rm(0x1000, 1, 2, true).unwrap(), MemoryValue::Raw(vec![0xef, 0xbe]));
    assert_eq!(memory.read_count(), 2);
}

#[test]
fn out_of_range_memory_access_is_a_backend_error() {
    let target = Target::new("edge");
    let memory = Arc::new(MockMemory::new());
    target.attach_memory(memory.clone()).unwrap();
    target.update_state(TargetState::Stopped);

    let err = target.read_memory(u64::MAX - 1, 4, 1, false).unwrap_err();
    assert!(matches!(
        err,
        TargetError::Protocol(ProtocolError::Rejected(ref msg)) if msg == "address range out of bounds"
    ));
    assert!(target
        .write_memory(u64::MAX - 1, 4, &MemoryValue::Word(1), 1, false)
        .is_err());
    assert_eq!(memory.read_count(), 0);
    assert_eq!(memory.write_count(), 0);
}

#[test]
fn wait_blocks_while_running_and_returns_on_stop() {
    let target = Arc::new(Target::new("runner"));
    let exec = Arc::new(MockExecution::new(target.reporter(), REPORT_DELAY));
    target.attach_execution(exec.clone()).unwrap();
    target.update_state(TargetState::Stopped);

    target.cont().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let waiter = {
        let target = Arc::clone(&target);
        thread::spawn(move || {
            let result = target.wait();
            let _ = done_tx.send(());
            result
        })
    };

    // The Running report settles the update but must not release the waiter.
    assert!(done_rx.recv_timeout(REPORT_DELAY * 10).is_err());
    assert_eq!(target.state(), TargetState::Running);

    exec.halt();
    done_rx.recv_timeout(PATIENCE).unwrap();
    waiter.join().unwrap().unwrap();
    assert_eq!(target.state(), TargetState::Stopped);
    assert_eq!(exec.calls(), vec![ExecutionCall::Cont]);
}

#[test]
fn step_round_trip_through_deferred_reports() {
    let target = Target::new("stepper");
    let exec = Arc::new(MockExecution::new(target.reporter(), REPORT_DELAY));
    let regs = Arc::new(MockRegisters::arm());
    target.attach_execution(exec.clone()).unwrap();
    target.attach_register(regs.clone()).unwrap();
    target.update_state(TargetState::Stopped);

    for _ in 0..3 {
        target.step().unwrap();
        target.wait_timeout(PATIENCE).unwrap();
    }

    assert!(target.wr("pc", 0x0800_0004).unwrap());
    assert_eq!(target.rr("pc").unwrap(), 0x0800_0004);
    assert_eq!(exec.calls().len(), 3);
}

#[test]
fn step_while_running_is_refused_before_the_backend() {
    let target = Target::new("busy");
    let exec = Arc::new(MockExecution::inline(target.reporter()));
    target.attach_execution(exec.clone()).unwrap();
    target.update_state(TargetState::Stopped);

    target.cont().unwrap();
    assert_eq!(target.state(), TargetState::Running);

    let err = target.step().unwrap_err();
    assert_eq!(
        wrong_state(&err),
        Some((TargetState::Stopped, TargetState::Running))
    );
    assert_eq!(exec.calls(), vec![ExecutionCall::Cont]);

    target.stop().unwrap();
    target.wait().unwrap();
}

#[test]
fn inline_backend_reports_without_deadlock() {
    let target = Target::new("inline");
    let exec = Arc::new(MockExecution::inline(target.reporter()));
    target.attach_execution(exec.clone()).unwrap();
    target.update_state(TargetState::Stopped);

    target.step().unwrap();
    // The Stopped report arrived inside step(), so wait() returns at once.
    target.wait_timeout(PATIENCE).unwrap();

    let id = target
        .set_breakpoint("main.c:42", &BreakpointOptions::default().hardware())
        .unwrap();
    assert!(target.remove_breakpoint(id).unwrap());
    assert!(exec.inserted().is_empty());
}

#[test]
fn exiting_releases_the_waiter() {
    let target = Arc::new(Target::new("leaver"));
    let exec = Arc::new(MockExecution::new(target.reporter(), REPORT_DELAY));
    target.attach_execution(exec.clone()).unwrap();
    target.update_state(TargetState::Stopped);
    target.cont().unwrap();

    let waiter = {
        let target = Arc::clone(&target);
        thread::spawn(move || target.wait_timeout(PATIENCE))
    };
    exec.exit();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, TargetError::Exited { .. }));
    assert!(target.cont().is_err());
}

#[test]
fn shutdown_releases_everything_once() {
    let target = Target::new("full");
    let exec = Arc::new(MockExecution::inline(target.reporter()));
    let memory = Arc::new(MockMemory::new());
    let regs = Arc::new(MockRegisters::arm());
    let signal = Arc::new(MockAuxiliary::new());
    let monitor = Arc::new(MockAuxiliary::failing());
    let remote = Arc::new(MockAuxiliary::new());

    target.attach_execution(exec.clone()).unwrap();
    target.attach_memory(memory.clone()).unwrap();
    target.attach_register(regs.clone()).unwrap();
    target.attach_signal(signal.clone()).unwrap();
    target.attach_monitor(monitor.clone()).unwrap();
    target.attach_remote_memory(remote.clone()).unwrap();
    assert_eq!(target.attached_protocols(), ProtocolKind::ALL.to_vec());

    target.shutdown();
    target.shutdown();

    assert_eq!(exec.shutdown_count(), 1);
    assert_eq!(memory.shutdown_count(), 1);
    assert_eq!(regs.shutdown_count(), 1);
    assert_eq!(signal.shutdown_count(), 1);
    assert_eq!(monitor.shutdown_count(), 1);
    assert_eq!(remote.shutdown_count(), 1);
    assert!(target.attached_protocols().is_empty());

    let err = target.read_register("pc").unwrap_err();
    assert!(err.precondition().unwrap().is_unavailable());
}

#[test]
fn configured_target_logs_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TargetConfig::new("qemu0");
    config.output_directory = Some(dir.path().join("out"));
    config.event_log = Some(dir.path().join("events.jsonl"));
    config
        .status
        .insert("arch".into(), serde_json::json!("arm"));

    let target = Target::from_config(&config).unwrap();
    let exec = Arc::new(MockExecution::inline(target.reporter()));
    target.attach_execution(exec).unwrap();
    target.update_state(TargetState::Stopped);
    target.cont().unwrap();

    let status = target.get_status();
    assert_eq!(status.get("state"), Some(serde_json::json!("running")));
    assert_eq!(status.get("arch"), Some(serde_json::json!("arm")));

    target.shutdown();

    let log = std::fs::read_to_string(dir.path().join("out").join("qemu0.log")).unwrap();
    assert!(log.contains("orchestrator.targets.qemu0.INFO | State changed from created to stopped"));
    assert!(log.contains("State changed from stopped to running"));
    assert!(log.contains("Detached execution protocol"));

    let events = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    assert!(events.lines().count() >= 4);
    for line in events.lines() {
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["target"], "qemu0");
    }
}
