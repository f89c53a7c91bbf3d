// auxiliary.rs: Backend for the capabilities the target only attaches and releases.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tether_target::{MonitorProtocol, Protocol, ProtocolError, RemoteMemoryProtocol, SignalProtocol};

/// Stands in for a signal, monitor or remote-memory protocol.
#[derive(Default)]
pub struct MockAuxiliary {
    shutdowns: AtomicUsize,
    fail_shutdown: AtomicBool,
}

impl MockAuxiliary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A protocol whose release reports an error.
    pub fn failing() -> Self {
        let aux = Self::default();
        aux.fail_shutdown.store(true, Ordering::SeqCst);
        aux
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Protocol for MockAuxiliary {
    fn shutdown(&self) -> Result<(), ProtocolError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(ProtocolError::Other("connection already closed".into()));
        }
        Ok(())
    }
}

impl SignalProtocol for MockAuxiliary {}
impl MonitorProtocol for MockAuxiliary {}
impl RemoteMemoryProtocol for MockAuxiliary {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_shutdown_still_counts() {
        let aux = MockAuxiliary::failing();
        assert!(aux.shutdown().is_err());
        assert_eq!(aux.shutdown_count(), 1);
        assert!(MockAuxiliary::new().shutdown().is_ok());
    }
}
