//! # Status word
//!
//! The controller replies to every transaction with its status word. A zero word is nominal.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bus::Word;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Bit flags reported by the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusWord(pub u32);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusWord {
    /// The last WRITE sequence was malformed and has been discarded.
    pub const PARSE_ERROR: u32 = 1 << 0;

    /// A WRITE was rejected because the instruction buffer is full.
    pub const BUFFER_FULL: u32 = 1 << 1;

    /// The executor found an instruction it cannot execute. Only cleared by a reset.
    pub const EXECUTION_ERROR: u32 = 1 << 2;

    /// The executor is consuming the instruction buffer.
    pub const RUNNING: u32 = 1 << 3;

    /// The motors are de-energised and execution holds. Raised by DISABLE, lowered by ENABLE.
    pub const DISABLED: u32 = 1 << 4;

    /// Flags which tell a sender to abandon a WRITE sequence.
    pub const WRITE_REJECT_MASK: u32 = Self::PARSE_ERROR | Self::BUFFER_FULL;

    /// All fault flags.
    pub const FAULT_MASK: u32 = Self::PARSE_ERROR | Self::BUFFER_FULL | Self::EXECUTION_ERROR;

    pub fn is_nominal(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    pub fn parse_error(self) -> bool {
        self.contains(Self::PARSE_ERROR)
    }

    pub fn buffer_full(self) -> bool {
        self.contains(Self::BUFFER_FULL)
    }

    pub fn execution_error(self) -> bool {
        self.contains(Self::EXECUTION_ERROR)
    }

    pub fn running(self) -> bool {
        self.contains(Self::RUNNING)
    }

    pub fn disabled(self) -> bool {
        self.contains(Self::DISABLED)
    }

    /// True if a sender in the middle of a WRITE sequence must stop sending.
    pub fn rejects_write(self) -> bool {
        self.0 & Self::WRITE_REJECT_MASK != 0
    }

    /// True if any fault flag is raised.
    pub fn has_fault(self) -> bool {
        self.0 & Self::FAULT_MASK != 0
    }
}

impl From<Word> for StatusWord {
    fn from(word: Word) -> Self {
        StatusWord(word.0)
    }
}

impl From<StatusWord> for Word {
    fn from(status: StatusWord) -> Self {
        Word(status.0)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nominal() {
            return write!(f, "NOMINAL");
        }

        let names = [
            (Self::PARSE_ERROR, "PARSE_ERROR"),
            (Self::BUFFER_FULL, "BUFFER_FULL"),
            (Self::EXECUTION_ERROR, "EXECUTION_ERROR"),
            (Self::RUNNING, "RUNNING"),
            (Self::DISABLED, "DISABLED"),
        ];

        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        write!(f, "{}", set.join("|"))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
