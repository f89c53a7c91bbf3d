// memory.rs: Sparse little-endian memory backend.
//
// Unwritten bytes read as 0. Words are 1 to 8 bytes wide. A request whose
// byte range would run past the end of the 64-bit address space, or exceed
// MAX_TRANSFER bytes, is rejected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tether_target::{MemoryProtocol, MemoryValue, Protocol, ProtocolError};

const MAX_WORD_SIZE: usize = 8;
const MAX_TRANSFER: usize = 1 << 20;

#[derive(Default)]
pub struct MockMemory {
    bytes: Mutex<BTreeMap<u64, u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MockMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload `data` at `address`. Bytes past the top of the address
    /// space are dropped.
    pub fn load(&self, address: u64, data: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        for (offset, byte) in data.iter().enumerate() {
            if let Some(at) = address.checked_add(offset as u64) {
                bytes.insert(at, *byte);
            }
        }
    }

    /// Current contents of `len` bytes at `address`. Bytes past the top of
    /// the address space read as 0.
    pub fn dump(&self, address: u64, len: usize) -> Vec<u8> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        (0..len as u64)
            .map(|offset| {
                address
                    .checked_add(offset)
                    .and_then(|at| bytes.get(&at).copied())
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn check_size(size: usize) -> Result<(), ProtocolError> {
        if size == 0 || size > MAX_WORD_SIZE {
            return Err(ProtocolError::Rejected(format!(
                "unsupported word size {}",
                size
            )));
        }
        Ok(())
    }

    /// Byte length of the request, if `[address, address + len)` fits.
    fn span(address: u64, size: usize, words: usize) -> Result<usize, ProtocolError> {
        size.checked_mul(words)
            .filter(|len| *len <= MAX_TRANSFER)
            .filter(|len| *len == 0 || address.checked_add(*len as u64 - 1).is_some())
            .ok_or_else(|| ProtocolError::Rejected("address range out of bounds".into()))
    }

    fn word_bytes(word: u64, size: usize) -> Vec<u8> {
        word.to_le_bytes()[..size].to_vec()
    }

    fn bytes_word(bytes: &[u8]) -> u64 {
        bytes
            .iter()
            .rev()
            .fold(0u64, |acc, byte| (acc << 8) | *byte as u64)
    }
}

impl Protocol for MockMemory {
    fn shutdown(&self) -> Result<(), ProtocolError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryProtocol for MockMemory {
    fn read_memory(
        &self,
        address: u64,
        size: usize,
        words: usize,
        raw: bool,
    ) -> Result<MemoryValue, ProtocolError> {
        Self::check_size(size)?;
        let len = Self::span(address, size, words)?;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let data = self.dump(address, len);
        if raw {
            return Ok(MemoryValue::Raw(data));
        }

        let values: Vec<u64> = data.chunks(size).map(Self::bytes_word).collect();
        Ok(match values.as_slice() {
            [single] => MemoryValue::Word(*single),
            _ => MemoryValue::Words(values),
        })
    }

    fn write_memory(
        &self,
        address: u64,
        size: usize,
        value: &MemoryValue,
        words: usize,
        raw: bool,
    ) -> Result<bool, ProtocolError> {
        Self::check_size(size)?;

        let data = match (value, raw) {
            (MemoryValue::Raw(bytes), true) => bytes.clone(),
            (MemoryValue::Word(word), false) if words == 1 => Self::word_bytes(*word, size),
            (MemoryValue::Words(list), false) if list.len() == words => list
                .iter()
                .flat_map(|word| Self::word_bytes(*word, size))
                .collect(),
            // Value shape does not match the request.
            _ => return Ok(false),
        };
        Self::span(address, data.len(), 1)?;

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.load(address, &data);
        Ok(true)
    }
}
