//! # Controller
//!
//! The controller's side of the bus. Every frame is decoded, acted on, and answered with one reply
//! word: the status word after the action, or the requested position for the word following a
//! POSITION command.
//!
//! The controller owns the assembler and the wire cursor. The executor runs separately and the
//! two only meet in the [`SharedState`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    bus::{Bus, BusEvent, Command, Expect, Frame, FramingError, WireCodec, Word},
    status::StatusWord,
};
use log::{debug, info, trace, warn};
use std::{convert::Infallible, sync::Arc};

use crate::{
    assembler::{AsmState, InstructionAssembler, ParseError},
    config::{ConfigError, MotionConfig},
    executor::TrajectoryExecutor,
    shared::SharedState,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Protocol handler of a motion controller.
#[derive(Debug)]
pub struct Controller {
    config: MotionConfig,

    codec: WireCodec,

    assembler: InstructionAssembler,

    shared: Arc<SharedState>,

    /// Set between a POSITION command and its motor index word.
    position_pending: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Controller {
    /// Build a controller and the executor which runs its buffer.
    ///
    /// The executor must be ticked by the caller, normally from its own thread.
    pub fn new(config: MotionConfig) -> Result<(Self, TrajectoryExecutor), ConfigError> {
        config.validate()?;

        let shared = Arc::new(SharedState::new(&config));
        let executor = TrajectoryExecutor::new(config.clone(), shared.clone());

        let controller = Self {
            assembler: InstructionAssembler::new(&config),
            codec: WireCodec::new(),
            config,
            shared,
            position_pending: false,
        };

        Ok((controller, executor))
    }

    /// Handle one frame from the bus and return the reply word.
    pub fn handle_frame(&mut self, frame: Frame) -> Word {
        let reply = match self.codec.decode(frame) {
            Ok(BusEvent::Command(cmd)) => self.handle_command(cmd),
            Ok(BusEvent::Word(word)) => self.handle_word(word),
            Err(e) => self.handle_framing_error(e),
        };

        self.codec.set_expect(if self.expects_word() {
            Expect::Word
        } else {
            Expect::Command
        });

        reply
    }

    /// Current status word.
    pub fn status(&self) -> StatusWord {
        self.shared.status.read()
    }

    /// Number of instructions waiting in the buffer, including the one executing.
    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len()
    }

    pub fn assembler_state(&self) -> AsmState {
        self.assembler.state()
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// The state shared with the executor.
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// External reset.
    ///
    /// Drops every buffered instruction and any partial sequence, clears the whole status word
    /// (including `execution_error`) and zeroes the motor positions. The executor abandons its
    /// current instruction at its next tick.
    pub fn reset(&mut self) {
        {
            let mut buffer = self.shared.lock_buffer();
            buffer.clear();
            self.shared.request_reset();
            self.shared.status.clear_all();
        }
        self.shared.clear_positions();

        self.assembler.reset();
        self.position_pending = false;
        self.codec.set_expect(Expect::Command);

        info!("Controller reset");
    }

    fn expects_word(&self) -> bool {
        self.position_pending || self.assembler.expects_word()
    }

    fn handle_command(&mut self, cmd: Command) -> Word {
        trace!("Command {:?}", cmd);

        match cmd {
            Command::Status => (),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Write => {
                self.assembler.begin(&self.shared);
            }
            Command::Position => self.position_pending = true,
            Command::Enable => {
                if self.status().disabled() {
                    info!("Motors enabled");
                }
                self.shared.status.clear(StatusWord::DISABLED);
            }
            Command::Disable => {
                if !self.status().disabled() {
                    info!("Motors disabled, execution holds");
                }
                self.shared.status.set(StatusWord::DISABLED);
            }
        }

        self.status().into()
    }

    fn handle_word(&mut self, word: Word) -> Word {
        if self.position_pending {
            self.position_pending = false;
            return self.read_position(word);
        }

        self.assembler.accept_word(word, &self.shared);

        self.status().into()
    }

    fn handle_framing_error(&mut self, err: FramingError) -> Word {
        self.position_pending = false;
        self.assembler.abort(ParseError::Framing(err), &self.shared);

        self.status().into()
    }

    fn start(&mut self) {
        let status = self.status();

        if status.execution_error() {
            warn!("START ignored, execution error raised (reset required)");
            return;
        }
        if self.shared.buffer_len() == 0 {
            debug!("START ignored, the instruction buffer is empty");
            return;
        }

        if !status.running() {
            self.shared.status.set(StatusWord::RUNNING);
            info!("Execution started");
        }
    }

    fn stop(&mut self) {
        if self.status().running() {
            info!("Execution stopped");
        }

        self.shared.status.clear(StatusWord::RUNNING);
        self.assembler.clear_error(&self.shared);
    }

    fn read_position(&mut self, index: Word) -> Word {
        match self.shared.position(index.0 as usize) {
            Some(steps) => {
                let steps = steps.max(i32::MIN as i64).min(i32::MAX as i64) as i32;
                trace!("Position of motor {}: {}", index.0, steps);
                Word::from_i32(steps)
            }
            None => {
                self.assembler
                    .abort(ParseError::InvalidMotorIndex(index.0), &self.shared);
                self.status().into()
            }
        }
    }
}

impl Bus for Controller {
    type Error = Infallible;

    fn transact(&mut self, frame: Frame) -> Result<Word, Self::Error> {
        Ok(self.handle_frame(frame))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
