//! Session identifiers used for stream reference counting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier of one logical consumer of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out unique, increasing session ids.
#[derive(Debug)]
pub struct SessionIdAllocator {
    next: AtomicU64,
}

impl SessionIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
