//! In-memory snapshot store.

use parking_lot::Mutex;

use crate::core::{AllocError, StateStore};

/// Keeps the last snapshot in memory. For tests and embedded use without a disk.
#[derive(Default)]
pub struct InMemoryStateStore {
    bytes: Mutex<Option<Vec<u8>>>,
    writes: Mutex<u64>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `bytes`.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
            writes: Mutex::new(0),
        }
    }

    /// Number of writes performed.
    pub fn writes(&self) -> u64 {
        *self.writes.lock()
    }
}

impl StateStore for InMemoryStateStore {
    fn write(&self, bytes: &[u8]) -> Result<(), AllocError> {
        *self.bytes.lock() = Some(bytes.to_vec());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<u8>>, AllocError> {
        Ok(self.bytes.lock().clone())
    }
}
