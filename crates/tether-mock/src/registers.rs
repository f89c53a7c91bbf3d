// registers.rs: Named register file backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tether_target::{Protocol, ProtocolError, RegisterProtocol};

/// A fixed set of named registers, all starting at 0.
pub struct MockRegisters {
    values: Mutex<BTreeMap<String, u64>>,
    shutdowns: AtomicUsize,
}

impl MockRegisters {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            values: Mutex::new(names.into_iter().map(|n| (n.to_string(), 0)).collect()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// A small ARM-like register file: r0-r12, sp, lr, pc, cpsr.
    pub fn arm() -> Self {
        let mut names: Vec<String> = (0..13).map(|i| format!("r{}", i)).collect();
        names.extend(["sp", "lr", "pc", "cpsr"].map(String::from));
        Self::new(names.iter().map(String::as_str))
    }

    pub fn value(&self, name: &str) -> Option<u64> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Protocol for MockRegisters {
    fn shutdown(&self) -> Result<(), ProtocolError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RegisterProtocol for MockRegisters {
    fn read_register(&self, name: &str) -> Result<u64, ProtocolError> {
        self.value(name)
            .ok_or_else(|| ProtocolError::Rejected(format!("unknown register '{}'", name)))
    }

    fn write_register(&self, name: &str, value: u64) -> Result<bool, ProtocolError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        match values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
