//! # Bus script interpreter module
//!
//! This module provides an interpreter for bus scripts, which replay timed bus transactions
//! against a controller. A script is a list of entries of the form
//!
//! ```text
//! # Comments start with a hash
//! 0.0: STATUS;
//! 0.1: WRITE 0x01000003 50000 1 0 0;
//! 0.2: START;
//! ```
//!
//! Each entry gives the time (in seconds since the session started) at which the command byte and
//! the words following it are sent. Words may be decimal (signed or unsigned) or `0x` hex.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use crate::session::get_elapsed_seconds;
use comms_if::bus::{Command, Frame, Word};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A group of frames which is scripted to be sent at a specific time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedFrames {
    /// The time the frames are supposed to be sent at
    pub exec_time_s: f64,

    /// The frames to send, command byte first
    pub frames: Vec<Frame>,
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use `.get_pending_frames` to
/// acquire a list of frames that need sending.
pub struct ScriptInterpreter {
    entries: VecDeque<ScriptedFrames>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)"
    )]
    InvalidTimestamp(String),

    #[error("Script contains an unknown command at {0} s: {1}")]
    UnknownCommand(f64, String),

    #[error("Script contains an invalid word at {0} s: {1}")]
    InvalidWord(f64, String),

    #[error("Script entry at {0} s is earlier than the entry before it")]
    OutOfOrder(f64),
}

#[derive(Debug, PartialEq)]
pub enum PendingFrames {
    None,
    Some(Vec<Frame>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let script = fs::read_to_string(script_path).map_err(ScriptError::ScriptLoadError)?;

        Self::from_script(&script)
    }

    /// Create a new interpreter from the text of a script.
    pub fn from_script(script: &str) -> Result<Self, ScriptError> {
        let mut entries: VecDeque<ScriptedFrames> = VecDeque::new();

        // Timestamp, command name, then everything up to the terminating semicolon
        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([A-Z]+)([^;]*);")
            .multi_line(true)
            .build()
            .expect("Script regex is invalid");

        for cap in re.captures_iter(script) {
            let time_str = &cap[1];
            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|_| ScriptError::InvalidTimestamp(time_str.to_string()))?;

            if let Some(prev) = entries.back() {
                if exec_time_s < prev.exec_time_s {
                    return Err(ScriptError::OutOfOrder(exec_time_s));
                }
            }

            let cmd = Command::from_name(&cap[3])
                .ok_or_else(|| ScriptError::UnknownCommand(exec_time_s, cap[3].to_string()))?;

            let mut frames = vec![Frame::from(cmd)];
            for token in cap[4].split_whitespace() {
                let word = parse_word(token)
                    .ok_or_else(|| ScriptError::InvalidWord(exec_time_s, token.to_string()))?;
                frames.push(word.into());
            }

            entries.push_back(ScriptedFrames {
                exec_time_s,
                frames,
            });
        }

        if entries.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        Ok(ScriptInterpreter { entries })
    }

    /// Return the frames which are due at the current session time.
    pub fn get_pending_frames(&mut self) -> PendingFrames {
        self.get_pending_frames_at(get_elapsed_seconds())
    }

    /// Return the frames which are due at `current_time_s`, in script order.
    pub fn get_pending_frames_at(&mut self, current_time_s: f64) -> PendingFrames {
        // If the queue is empty the script is over and we return the end of
        // script variant
        if self.entries.is_empty() {
            return PendingFrames::EndOfScript;
        }

        let mut frames: Vec<Frame> = vec![];

        while let Some(entry) = self.entries.front() {
            if entry.exec_time_s > current_time_s {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                frames.extend(entry.frames);
            }
        }

        if frames.is_empty() {
            PendingFrames::None
        } else {
            PendingFrames::Some(frames)
        }
    }

    /// Get the number of entries left in the script
    pub fn get_num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.entries.back() {
            Some(c) => c.exec_time_s,
            None => 0f64,
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse a word token: `0x` hex, unsigned decimal, or negative decimal.
fn parse_word(token: &str) -> Option<Word> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u32::from_str_radix(&hex.replace('_', ""), 16).ok().map(Word);
    }

    let token = token.replace('_', "");
    if token.starts_with('-') {
        token.parse::<i32>().ok().map(Word::from_i32)
    } else {
        token.parse::<u32>().ok().map(Word)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
