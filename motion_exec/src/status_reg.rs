//! # Status register
//!
//! A single word of flags shared by both actors. The protocol handler raises `PARSE_ERROR` and
//! `BUFFER_FULL`, the executor raises `EXECUTION_ERROR`, and `RUNNING` is the executor's run flag
//! which START and STOP toggle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::status::StatusWord;
use std::sync::atomic::{AtomicU32, Ordering};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Atomic status register.
#[derive(Debug, Default)]
pub struct StatusRegister {
    bits: AtomicU32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current flags. Has no side effects.
    pub fn read(&self) -> StatusWord {
        StatusWord(self.bits.load(Ordering::SeqCst))
    }

    /// Raise the given flags, returning the previous word.
    pub fn set(&self, flags: u32) -> StatusWord {
        StatusWord(self.bits.fetch_or(flags, Ordering::SeqCst))
    }

    /// Lower the given flags, returning the previous word.
    pub fn clear(&self, flags: u32) -> StatusWord {
        StatusWord(self.bits.fetch_and(!flags, Ordering::SeqCst))
    }

    /// Lower every flag.
    pub fn clear_all(&self) {
        self.bits.store(0, Ordering::SeqCst);
    }

    pub fn is_set(&self, flags: u32) -> bool {
        self.read().contains(flags)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
