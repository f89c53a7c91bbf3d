// guard.rs: Precondition checks for state-sensitive target actions.
//
// Every guarded action is described by one `ActionGuard` constant. The check
// runs in a fixed order:
//   1. the protocol slot for the action must be occupied
//   2. the target must be in the required state
// and only then is the protocol handed back for the call.
//
// Actions that change execution state also clear the "settled" flag, in the
// same lock acquisition as the state check, so a later `wait()` observes the
// next reported transition rather than a stale one.

use std::sync::Arc;

use crate::error::PreconditionError;
use crate::protocol::ProtocolSlot;
use crate::state::{StateCell, TargetState};

/// Precondition for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionGuard {
    /// Action name used in errors and logs.
    pub action: &'static str,
    /// State the target must be in.
    pub state: TargetState,
    /// Whether passing the guard clears the settled flag.
    pub clears_pending: bool,
}

impl ActionGuard {
    /// Guard for `action`, requiring `state`.
    pub const fn new(action: &'static str, state: TargetState) -> Self {
        Self {
            action,
            state,
            clears_pending: false,
        }
    }

    /// Also clear the settled flag when the guard passes.
    pub const fn clearing_pending(mut self) -> Self {
        self.clears_pending = true;
        self
    }

    /// Check the guard against a looked-up protocol slot and the state cell.
    ///
    /// On failure nothing is mutated. On success the protocol is returned
    /// and, if requested, the settled flag is cleared.
    pub(crate) fn check<P: ProtocolSlot + ?Sized>(
        &self,
        protocol: Option<Arc<P>>,
        cell: &StateCell,
    ) -> Result<Arc<P>, PreconditionError> {
        let protocol = protocol.ok_or_else(|| PreconditionError::unavailable(self.action, P::KIND))?;

        cell.with(|snapshot| {
            if snapshot.state != self.state {
                return Err(PreconditionError::wrong_state(
                    self.action,
                    self.state,
                    snapshot.state,
                ));
            }
            if self.clears_pending {
                snapshot.settled = false;
            }
            Ok(())
        })?;

        Ok(protocol)
    }
}

pub const CONT: ActionGuard = ActionGuard::new("cont", TargetState::Stopped).clearing_pending();
pub const STOP: ActionGuard = ActionGuard::new("stop", TargetState::Running).clearing_pending();
pub const STEP: ActionGuard = ActionGuard::new("step", TargetState::Stopped).clearing_pending();
pub const READ_MEMORY: ActionGuard = ActionGuard::new("read_memory", TargetState::Stopped);
pub const WRITE_MEMORY: ActionGuard = ActionGuard::new("write_memory", TargetState::Stopped);
pub const READ_REGISTER: ActionGuard = ActionGuard::new("read_register", TargetState::Stopped);
pub const WRITE_REGISTER: ActionGuard = ActionGuard::new("write_register", TargetState::Stopped);
pub const SET_BREAKPOINT: ActionGuard = ActionGuard::new("set_breakpoint", TargetState::Stopped);
pub const SET_WATCHPOINT: ActionGuard = ActionGuard::new("set_watchpoint", TargetState::Stopped);
pub const REMOVE_BREAKPOINT: ActionGuard =
    ActionGuard::new("remove_breakpoint", TargetState::Stopped);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PreconditionFailure, ProtocolError};
    use crate::protocol::{Protocol, ProtocolKind, RegisterProtocol};

    struct Regs;

    impl Protocol for Regs {
        fn shutdown(&self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    impl RegisterProtocol for Regs {
        fn read_register(&self, _name: &str) -> Result<u64, ProtocolError> {
            Ok(0)
        }
        fn write_register(&self, _name: &str, _value: u64) -> Result<bool, ProtocolError> {
            Ok(true)
        }
    }

    fn regs() -> Option<Arc<dyn RegisterProtocol>> {
        Some(Arc::new(Regs))
    }

    #[test]
    fn missing_protocol_checked_before_state() {
        // Wrong state too, but the missing slot wins.
        let cell = StateCell::new(TargetState::Running);
        let err = READ_REGISTER
            .check::<dyn RegisterProtocol>(None, &cell)
            .err()
            .unwrap();
        assert_eq!(err.action, "read_register");
        assert_eq!(
            err.failure,
            PreconditionFailure::ProtocolUnavailable {
                protocol: ProtocolKind::Register
            }
        );
    }

    #[test]
    fn wrong_state_reports_expected_and_actual() {
        let cell = StateCell::new(TargetState::Created);
        let err = READ_REGISTER.check(regs(), &cell).err().unwrap();
        assert_eq!(
            err.failure,
            PreconditionFailure::WrongState {
                expected: TargetState::Stopped,
                actual: TargetState::Created,
            }
        );
    }

    #[test]
    fn passing_guard_returns_protocol() {
        let cell = StateCell::new(TargetState::Created);
        cell.publish(TargetState::Stopped);
        let protocol = READ_REGISTER.check(regs(), &cell).unwrap();
        assert_eq!(protocol.read_register("pc").unwrap(), 0);
        // Non-clearing guards leave the flag alone.
        assert!(cell.snapshot().settled);
    }

    #[test]
    fn clearing_guard_unsettles_only_on_success() {
        let cell = StateCell::new(TargetState::Created);
        cell.publish(TargetState::Running);

        // Refused: the flag stays set.
        let guard = ActionGuard::new("poke", TargetState::Stopped).clearing_pending();
        assert!(guard.check(regs(), &cell).is_err());
        assert!(cell.snapshot().settled);

        let guard = ActionGuard::new("poke", TargetState::Running).clearing_pending();
        assert!(guard.check(regs(), &cell).is_ok());
        assert!(!cell.snapshot().settled);
    }

    #[test]
    fn execution_guards_require_expected_states() {
        assert_eq!(CONT.state, TargetState::Stopped);
        assert_eq!(STOP.state, TargetState::Running);
        assert_eq!(STEP.state, TargetState::Stopped);
        assert!(CONT.clears_pending && STOP.clears_pending && STEP.clears_pending);
        assert!(!SET_BREAKPOINT.clears_pending);
    }
}
