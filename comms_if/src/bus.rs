//! # Bus module
//!
//! Every transaction on the bus carries either a single command byte or a single 32-bit word, and
//! the controller answers every transaction with one reply word. Commands such as WRITE are
//! followed by a fixed number of words, so the receiver has to keep track of which of the two it
//! expects next. That cursor lives in [`WireCodec`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of bytes in a word on the bus.
pub const WORD_BYTES: usize = 4;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A bus over which frames can be exchanged with a controller.
///
/// The protocol is strictly request/reply, so every frame sent produces exactly one reply word.
pub trait Bus {
    /// Error raised by the underlying transport.
    type Error;

    /// Send a frame and return the controller's reply.
    fn transact(&mut self, frame: Frame) -> Result<Word, Self::Error>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A 32-bit payload word.
///
/// The meaning of a word depends on the command it follows and on how far through that
/// command's sequence the receiver is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Word(pub u32);

/// Frame-level decoder.
///
/// Holds nothing but the cursor saying whether a command byte or a word is due next. The owner
/// moves the cursor with [`WireCodec::set_expect`] once it knows how many words a command takes.
#[derive(Debug, Default)]
pub struct WireCodec {
    expect: Expect,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A raw transaction on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// A single command byte.
    Command(u8),

    /// A single word, in bus (big endian) byte order.
    Word([u8; WORD_BYTES]),
}

/// Commands understood by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Read the status word.
    Status = 0x01,

    /// Start executing the instruction buffer.
    Start = 0x02,

    /// Stop executing, keeping the buffer and the position within the current instruction.
    Stop = 0x03,

    /// Write an instruction, followed by the instruction's words.
    Write = 0x04,

    /// Read a motor's absolute position, followed by the motor index word.
    Position = 0x05,

    /// Energise the motors, letting the executor advance.
    Enable = 0x06,

    /// De-energise the motors. Execution holds where it is until the next ENABLE.
    Disable = 0x07,
}

/// A decoded transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Command(Command),
    Word(Word),
}

/// What the receiver expects the next frame to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    Command,
    Word,
}

/// Errors raised when frames arrive out of order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("Received word {0:?} while a command byte was expected")]
    UnexpectedWord(Word),

    #[error("Received command {0:?} while a word was expected")]
    UnexpectedCommand(Command),

    #[error("Unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Word {
    /// Read a word from bus byte order.
    pub fn from_bytes(bytes: [u8; WORD_BYTES]) -> Self {
        Word(BigEndian::read_u32(&bytes))
    }

    /// Get the word in bus byte order.
    pub fn to_bytes(self) -> [u8; WORD_BYTES] {
        let mut bytes = [0u8; WORD_BYTES];
        BigEndian::write_u32(&mut bytes, self.0);
        bytes
    }

    /// Reinterpret a signed value as a word (two's complement).
    pub fn from_i32(value: i32) -> Self {
        Word(value as u32)
    }

    /// Reinterpret the word as a signed value (two's complement).
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl From<u32> for Word {
    fn from(value: u32) -> Self {
        Word(value)
    }
}

impl Command {
    /// Decode a command byte, or `None` if the byte is not a known command.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Status),
            0x02 => Some(Command::Start),
            0x03 => Some(Command::Stop),
            0x04 => Some(Command::Write),
            0x05 => Some(Command::Position),
            0x06 => Some(Command::Enable),
            0x07 => Some(Command::Disable),
            _ => None,
        }
    }

    /// The byte sent on the bus for this command.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Parse a command from its upper case name, as used in bus scripts.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "STATUS" => Some(Command::Status),
            "START" => Some(Command::Start),
            "STOP" => Some(Command::Stop),
            "WRITE" => Some(Command::Write),
            "POSITION" => Some(Command::Position),
            "ENABLE" => Some(Command::Enable),
            "DISABLE" => Some(Command::Disable),
            _ => None,
        }
    }

    /// True if this command is followed by one or more words.
    pub fn takes_words(self) -> bool {
        matches!(self, Command::Write | Command::Position)
    }
}

impl Default for Expect {
    fn default() -> Self {
        Expect::Command
    }
}

impl From<Command> for Frame {
    fn from(cmd: Command) -> Self {
        Frame::Command(cmd.to_byte())
    }
}

impl From<Word> for Frame {
    fn from(word: Word) -> Self {
        Frame::Word(word.to_bytes())
    }
}

impl WireCodec {
    /// Create a new codec expecting a command byte.
    pub fn new() -> Self {
        Self::default()
    }

    /// What the codec expects next.
    pub fn expecting(&self) -> Expect {
        self.expect
    }

    /// Move the cursor.
    pub fn set_expect(&mut self, expect: Expect) {
        self.expect = expect;
    }

    /// Decode a single command byte without checking the cursor.
    pub fn decode_command(byte: u8) -> Result<Command, FramingError> {
        Command::from_byte(byte).ok_or(FramingError::UnknownCommand(byte))
    }

    /// Decode a single word without checking the cursor.
    pub fn decode_word(bytes: [u8; WORD_BYTES]) -> Word {
        Word::from_bytes(bytes)
    }

    /// Decode a frame, checking it is the kind of frame the cursor expects.
    ///
    /// The cursor is not moved, a frame which doesn't match leaves it where it was.
    pub fn decode(&self, frame: Frame) -> Result<BusEvent, FramingError> {
        match (frame, self.expect) {
            (Frame::Command(byte), Expect::Command) => {
                Self::decode_command(byte).map(BusEvent::Command)
            }
            (Frame::Command(byte), Expect::Word) => {
                Err(FramingError::UnexpectedCommand(Self::decode_command(byte)?))
            }
            (Frame::Word(bytes), Expect::Word) => Ok(BusEvent::Word(Self::decode_word(bytes))),
            (Frame::Word(bytes), Expect::Command) => {
                Err(FramingError::UnexpectedWord(Self::decode_word(bytes)))
            }
        }
    }

    /// Encode an event back into a frame.
    pub fn encode(event: BusEvent) -> Frame {
        match event {
            BusEvent::Command(c) => c.into(),
            BusEvent::Word(w) => w.into(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_word_byte_order() {
        let word = Word::from_bytes([0x01, 0x00, 0x00, 0x03]);
        assert_eq!(word, Word(0x0100_0003));
        assert_eq!(word.to_bytes(), [0x01, 0x00, 0x00, 0x03]);

        assert_eq!(Word::from_i32(-1), Word(0xffff_ffff));
        assert_eq!(Word(0xffff_fffe).as_i32(), -2);
    }

    #[test]
    fn test_command_bytes() {
        for cmd in [
            Command::Status,
            Command::Start,
            Command::Stop,
            Command::Write,
            Command::Position,
            Command::Enable,
            Command::Disable,
        ]
        .iter()
        {
            assert_eq!(Command::from_byte(cmd.to_byte()), Some(*cmd));
        }

        assert_eq!(Command::from_byte(0x00), None);
        assert_eq!(Command::from_byte(0xff), None);
        assert_eq!(Command::from_name("WRITE"), Some(Command::Write));
        assert_eq!(Command::from_name("write"), None);
        assert_eq!(Command::from_name("DISABLE"), Some(Command::Disable));
        assert!(!Command::Enable.takes_words());
        assert!(Command::Write.takes_words());
        assert!(!Command::Status.takes_words());
    }

    #[test]
    fn test_codec_alternation() {
        let mut codec = WireCodec::new();
        assert_eq!(codec.expecting(), Expect::Command);

        // Command while a command is expected
        assert_eq!(
            codec.decode(Frame::Command(0x04)),
            Ok(BusEvent::Command(Command::Write))
        );

        // Word while a command is expected
        assert_eq!(
            codec.decode(Frame::Word([0, 0, 0, 7])),
            Err(FramingError::UnexpectedWord(Word(7)))
        );

        // Unknown byte
        assert_eq!(
            codec.decode(Frame::Command(0x42)),
            Err(FramingError::UnknownCommand(0x42))
        );

        codec.set_expect(Expect::Word);

        assert_eq!(
            codec.decode(Frame::Word([0, 0, 0, 7])),
            Ok(BusEvent::Word(Word(7)))
        );
        assert_eq!(
            codec.decode(Frame::Command(0x01)),
            Err(FramingError::UnexpectedCommand(Command::Status))
        );

        // A failed decode leaves the cursor alone
        assert_eq!(codec.expecting(), Expect::Word);
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            WireCodec::encode(BusEvent::Command(Command::Stop)),
            Frame::Command(0x03)
        );
        assert_eq!(
            WireCodec::encode(BusEvent::Word(Word(0xdead_beef))),
            Frame::Word([0xde, 0xad, 0xbe, 0xef])
        );
    }
}
