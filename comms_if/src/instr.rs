//! # Instruction records
//!
//! A MOVE instruction is sent as a header word followed by four words for every motor:
//!
//! | Word | Contents |
//! |---|---|
//! | header | bits 31..24 instruction type, bits 23..16 reserved, bits 15..0 AUX bitmask |
//! | TICKS | segment duration in ticks (unsigned) |
//! | C0 | velocity coefficient (signed fixed-point) |
//! | C1 | acceleration coefficient (signed fixed-point) |
//! | C2 | jerk coefficient (signed fixed-point) |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::bus::Word;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of words sent for each motor in a MOVE instruction.
pub const WORDS_PER_MOTOR: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One motor's part of an instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorSegment {
    /// Duration of the segment.
    ///
    /// Units: ticks
    pub ticks: u32,

    /// Velocity coefficient, multiplies `t`.
    pub c0: i32,

    /// Acceleration coefficient, multiplies `t^2`.
    pub c1: i32,

    /// Jerk coefficient, multiplies `t^3`.
    pub c2: i32,
}

/// An instruction held in the controller's buffer.
///
/// Instructions are immutable once they have been assembled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Kind of instruction, only MOVE exists for now.
    pub instr_type: InstrType,

    /// Auxiliary outputs (lights etc.) held for the duration of the instruction.
    pub aux: u16,

    /// One segment per configured motor, in motor order.
    pub segments: Vec<MotorSegment>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Instruction types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InstrType {
    Move = 0x01,
}

/// The four per-motor fields of a MOVE instruction, in the order they are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotorField {
    Ticks,
    C0,
    C1,
    C2,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InstrType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(InstrType::Move),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl MotorField {
    /// The field sent after this one for the same motor, or `None` after C2.
    pub fn next(self) -> Option<Self> {
        match self {
            MotorField::Ticks => Some(MotorField::C0),
            MotorField::C0 => Some(MotorField::C1),
            MotorField::C1 => Some(MotorField::C2),
            MotorField::C2 => None,
        }
    }

    /// Store a word into the matching field of a segment.
    pub fn store(self, segment: &mut MotorSegment, word: Word) {
        match self {
            MotorField::Ticks => segment.ticks = word.0,
            MotorField::C0 => segment.c0 = word.as_i32(),
            MotorField::C1 => segment.c1 = word.as_i32(),
            MotorField::C2 => segment.c2 = word.as_i32(),
        }
    }
}

impl MotorSegment {
    pub fn new(ticks: u32, c0: i32, c1: i32, c2: i32) -> Self {
        Self { ticks, c0, c1, c2 }
    }

    /// The segment's words in bus order.
    pub fn to_words(&self) -> [Word; WORDS_PER_MOTOR] {
        [
            Word(self.ticks),
            Word::from_i32(self.c0),
            Word::from_i32(self.c1),
            Word::from_i32(self.c2),
        ]
    }
}

impl Instruction {
    /// Build a MOVE instruction.
    pub fn new_move(aux: u16, segments: Vec<MotorSegment>) -> Self {
        Self {
            instr_type: InstrType::Move,
            aux,
            segments,
        }
    }

    /// Number of motors this instruction carries segments for.
    pub fn num_motors(&self) -> usize {
        self.segments.len()
    }

    /// Pack the instruction type and AUX bitmask into the header word.
    pub fn header_word(&self) -> Word {
        pack_header(self.instr_type.to_byte(), self.aux)
    }

    /// All words of the instruction, header first, in bus order.
    pub fn to_words(&self) -> Vec<Word> {
        let mut words = Vec::with_capacity(1 + WORDS_PER_MOTOR * self.segments.len());
        words.push(self.header_word());
        for seg in &self.segments {
            words.extend_from_slice(&seg.to_words());
        }
        words
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Pack a raw instruction type byte and AUX bitmask into a header word.
pub fn pack_header(instr_type: u8, aux: u16) -> Word {
    Word(((instr_type as u32) << 24) | aux as u32)
}

/// Split a header word into the raw instruction type byte and the AUX bitmask.
///
/// The reserved byte is ignored.
pub fn unpack_header(word: Word) -> (u8, u16) {
    ((word.0 >> 24) as u8, (word.0 & 0xffff) as u16)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
