//! # Host module
//!
//! The sending side of the bus. The host mostly transports instructions whose cubic coefficients
//! have already been computed by whatever is planning the motion. The one move it plans itself is
//! [`Host::goto_point`], a constant velocity move split into MOVE instructions.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use thiserror::Error;

use std::convert::TryFrom;

use crate::{
    bus::{Bus, Command, Frame, Word},
    instr::{Instruction, MotorSegment},
    status::StatusWord,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default number of attempts at starting a WRITE before giving up on a full buffer.
pub const DEFAULT_MAX_TRIALS: usize = 100;

/// Default length of a planned MOVE, matching the controller's default path length.
pub const DEFAULT_PATH_TICKS: u32 = 100_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Host side driver for a motion controller on a [`Bus`].
pub struct Host<B: Bus> {
    bus: B,

    num_motors: usize,

    max_trials: usize,

    /// The controller's path length, every planned MOVE lasts exactly this long.
    path_ticks: u32,

    /// Fractional bits of the controller's coefficients.
    fraction_bits: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while talking to the controller.
#[derive(Debug, Error)]
pub enum HostError<E> {
    #[error("Bus transport error: {0:?}")]
    Bus(E),

    #[error("The controller's buffer stayed full for {0} attempts")]
    TooManyTrials(usize),

    #[error("The controller rejected the instruction (status {0})")]
    Rejected(StatusWord),

    #[error("Expected an instruction for {expected} motors but it has {found}")]
    MotorCount { expected: usize, found: usize },

    #[error("Motor {0} has to move but its speed is zero")]
    ZeroSpeed(usize),

    #[error("The velocity of motor {0} does not fit in a coefficient")]
    VelocityOverflow(usize),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<B: Bus> Host<B> {
    /// Create a new host for a controller driving `num_motors` motors.
    pub fn new(bus: B, num_motors: usize) -> Self {
        Self {
            bus,
            num_motors,
            max_trials: DEFAULT_MAX_TRIALS,
            path_ticks: DEFAULT_PATH_TICKS,
            fraction_bits: 0,
        }
    }

    /// Set the number of WRITE attempts made while the buffer is full.
    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = max_trials;
        self
    }

    /// Set the path length and fractional bits used to plan [`Host::goto_point`] moves.
    ///
    /// Both must match the controller's configuration.
    pub fn with_motion(mut self, path_ticks: u32, fraction_bits: u32) -> Self {
        self.path_ticks = path_ticks.max(1);
        self.fraction_bits = fraction_bits;
        self
    }

    /// Access the underlying bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Access the underlying bus mutably.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Give back the underlying bus.
    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Encode a MOVE instruction as the frames of a WRITE sequence.
    pub fn move_frames(instr: &Instruction) -> Vec<Frame> {
        let mut frames = vec![Command::Write.into()];
        frames.extend(instr.to_words().into_iter().map(Frame::from));
        frames
    }

    /// Read the controller's status word.
    pub fn status(&mut self) -> Result<StatusWord, HostError<B::Error>> {
        self.command(Command::Status)
    }

    /// Start execution of the controller's buffer.
    pub fn start(&mut self) -> Result<StatusWord, HostError<B::Error>> {
        self.command(Command::Start)
    }

    /// Stop execution, keeping the buffer.
    pub fn stop(&mut self) -> Result<StatusWord, HostError<B::Error>> {
        self.command(Command::Stop)
    }

    /// Energise the motors.
    pub fn enable(&mut self) -> Result<StatusWord, HostError<B::Error>> {
        self.command(Command::Enable)
    }

    /// De-energise the motors, execution holds until they are enabled again.
    pub fn disable(&mut self) -> Result<StatusWord, HostError<B::Error>> {
        self.command(Command::Disable)
    }

    /// Read the absolute position of a motor in whole steps.
    pub fn position(&mut self, motor: usize) -> Result<i32, HostError<B::Error>> {
        self.command(Command::Position)?;
        let reply = self.transact(Word(motor as u32).into())?;
        Ok(reply.as_i32())
    }

    /// Send a MOVE instruction.
    ///
    /// The WRITE byte is repeated for as long as the controller reports a full buffer, up to the
    /// configured number of trials. Once accepted the words are sent one by one, and the sequence
    /// is abandoned as soon as a reply rejects it.
    ///
    /// Returns the status word replied to the last word.
    pub fn send_move(&mut self, instr: &Instruction) -> Result<StatusWord, HostError<B::Error>> {
        if instr.num_motors() != self.num_motors {
            return Err(HostError::MotorCount {
                expected: self.num_motors,
                found: instr.num_motors(),
            });
        }

        let mut trials = 0;
        loop {
            let status = self.command(Command::Write)?;
            trials += 1;

            if !status.buffer_full() {
                break;
            }
            if trials >= self.max_trials {
                return Err(HostError::TooManyTrials(trials));
            }
            trace!("Controller buffer full, retrying WRITE ({} trials)", trials);
        }

        let mut status = StatusWord::default();
        for word in instr.to_words() {
            status = StatusWord::from(self.transact(word.into())?);
            if status.rejects_write() {
                debug!("WRITE sequence rejected with status {}", status);
                return Err(HostError::Rejected(status));
            }
        }

        Ok(status)
    }

    /// Move every motor from its current position to `target`, in whole steps, at no more than
    /// `speed` steps per tick.
    ///
    /// All motors share one duration, set by the slowest of them and rounded up to a whole number
    /// of paths. Each motor gets a constant velocity over that duration and the move is sent as
    /// that many identical MOVE instructions, each lasting exactly one path so none of them
    /// repeats. Velocities are rounded to the nearest coefficient unit, so the target is exact
    /// when the distance in coefficient units divides by the duration.
    ///
    /// Returns the number of MOVE instructions sent. Execution is not started.
    pub fn goto_point(
        &mut self,
        target: &[i32],
        speed: &[u32],
    ) -> Result<usize, HostError<B::Error>> {
        for found in &[target.len(), speed.len()] {
            if *found != self.num_motors {
                return Err(HostError::MotorCount {
                    expected: self.num_motors,
                    found: *found,
                });
            }
        }

        let mut distances = Vec::with_capacity(self.num_motors);
        for (motor, target) in target.iter().enumerate() {
            let current = self.position(motor)?;
            distances.push(i64::from(*target) - i64::from(current));
        }

        let mut ticks_needed: u64 = 0;
        for (motor, (distance, speed)) in distances.iter().zip(speed).enumerate() {
            if *distance == 0 {
                continue;
            }
            if *speed == 0 {
                return Err(HostError::ZeroSpeed(motor));
            }
            let speed = u64::from(*speed);
            ticks_needed = ticks_needed.max((distance.unsigned_abs() + speed - 1) / speed);
        }

        if ticks_needed == 0 {
            debug!("Already at {:?}, nothing to send", target);
            return Ok(0);
        }

        let path_ticks = u64::from(self.path_ticks);
        let num_moves = (ticks_needed + path_ticks - 1) / path_ticks;
        let duration = i128::from(num_moves * path_ticks);

        let mut segments = Vec::with_capacity(self.num_motors);
        for (motor, distance) in distances.iter().enumerate() {
            if *distance == 0 {
                segments.push(MotorSegment::new(0, 0, 0, 0));
                continue;
            }

            let velocity = div_round(i128::from(*distance) << self.fraction_bits, duration);
            let c0 = i32::try_from(velocity).map_err(|_| HostError::VelocityOverflow(motor))?;
            segments.push(MotorSegment::new(self.path_ticks, c0, 0, 0));
        }

        let instr = Instruction::new_move(0, segments);
        debug!(
            "Moving to {:?} in {} MOVEs of {} ticks",
            target, num_moves, self.path_ticks
        );

        for _ in 0..num_moves {
            self.send_move(&instr)?;
        }

        Ok(num_moves as usize)
    }

    fn command(&mut self, cmd: Command) -> Result<StatusWord, HostError<B::Error>> {
        self.transact(cmd.into()).map(StatusWord::from)
    }

    fn transact(&mut self, frame: Frame) -> Result<Word, HostError<B::Error>> {
        self.bus.transact(frame).map_err(HostError::Bus)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Divide, rounding half away from zero. `den` must be positive.
fn div_round(num: i128, den: i128) -> i128 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
