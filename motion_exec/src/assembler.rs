//! # Instruction assembler
//!
//! A WRITE sequence spans many bus transactions: the WRITE command byte, the header word, then
//! TICKS, C0, C1 and C2 for every motor. The assembler is the state machine which carries a
//! partially received instruction between those transactions and pushes it into the buffer once
//! the last word has arrived.
//!
//! ```text
//!            WRITE (room)              header               C2 of last motor
//!   Idle ------------------> ExpectAux --------> ExpectMotorField(m, f) --------> Idle
//!    ^  \                                            |   (commit to buffer)
//!    |   WRITE (full): buffer_full, stay Idle        |
//!    |                                     any framing or field error
//!    |                                               v
//!    +------------- STOP or WRITE ---------------- Error (parse_error)
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    bus::{FramingError, Word},
    instr::{unpack_header, InstrType, Instruction, MotorField, MotorSegment},
    status::StatusWord,
};
use log::{debug, trace, warn};
use thiserror::Error;

use crate::{
    buffer::BufferFull,
    config::{MotionConfig, MAX_SEGMENT_TICKS},
    shared::SharedState,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Reassembles WRITE sequences into instructions.
#[derive(Debug)]
pub struct InstructionAssembler {
    num_motors: usize,

    state: AsmState,

    /// Fields received so far for the instruction being assembled.
    instr_type: InstrType,
    aux: u16,
    segments: Vec<MotorSegment>,
    current: MotorSegment,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// States of the assembler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsmState {
    /// No sequence in progress.
    Idle,

    /// WRITE accepted, waiting for the header word holding the instruction type and AUX.
    ExpectAux,

    /// Waiting for `field` of motor `motor`.
    ExpectMotorField { motor: usize, field: MotorField },

    /// The last sequence was discarded. Cleared by the next WRITE or a STOP.
    Error,
}

/// What happened to the sequence as a result of an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmOutcome {
    /// WRITE accepted, the header word is expected next.
    Started,

    /// Word stored, more words are expected.
    Accepted,

    /// Last word received and the instruction pushed into the buffer.
    Committed,

    /// WRITE rejected because the buffer is full.
    Rejected,

    /// The sequence was discarded.
    Aborted(ParseError),
}

/// Reasons for discarding a sequence.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Unknown instruction type 0x{0:02x}")]
    UnknownInstrType(u8),

    #[error("Segment for motor {motor} lasts {ticks} ticks, the limit is {}", MAX_SEGMENT_TICKS)]
    SegmentTooLong { motor: usize, ticks: u32 },

    #[error("Motor index {0} is out of range")]
    InvalidMotorIndex(u32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InstructionAssembler {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            num_motors: config.num_motors,
            state: AsmState::Idle,
            instr_type: InstrType::Move,
            aux: 0,
            segments: Vec::with_capacity(config.num_motors),
            current: MotorSegment::default(),
        }
    }

    pub fn state(&self) -> AsmState {
        self.state
    }

    /// True while the assembler is in the middle of a sequence and the next frame must be a word.
    pub fn expects_word(&self) -> bool {
        matches!(
            self.state,
            AsmState::ExpectAux | AsmState::ExpectMotorField { .. }
        )
    }

    /// Handle a WRITE command byte.
    ///
    /// Starts a new sequence if the buffer has room, otherwise raises `buffer_full` and stays
    /// `Idle`. Either way nothing from a previous sequence is kept.
    pub fn begin(&mut self, shared: &SharedState) -> AsmOutcome {
        self.discard();

        // The flag must change under the lock, retirement clears it under the same lock
        {
            let buffer = shared.lock_buffer();
            if buffer.is_full() {
                shared.status.set(StatusWord::BUFFER_FULL);
                self.state = AsmState::Idle;
                warn!("WRITE rejected, instruction buffer is full");
                return AsmOutcome::Rejected;
            }

            shared
                .status
                .clear(StatusWord::PARSE_ERROR | StatusWord::BUFFER_FULL);
        }

        self.state = AsmState::ExpectAux;
        trace!("WRITE accepted, expecting header");

        AsmOutcome::Started
    }

    /// Handle a word belonging to the current sequence.
    pub fn accept_word(&mut self, word: Word, shared: &SharedState) -> AsmOutcome {
        match self.state {
            AsmState::Idle | AsmState::Error => {
                self.abort(FramingError::UnexpectedWord(word).into(), shared)
            }
            AsmState::ExpectAux => {
                let (type_byte, aux) = unpack_header(word);

                match InstrType::from_byte(type_byte) {
                    Some(t) => self.instr_type = t,
                    None => return self.abort(ParseError::UnknownInstrType(type_byte), shared),
                }
                self.aux = aux;
                self.state = AsmState::ExpectMotorField {
                    motor: 0,
                    field: MotorField::Ticks,
                };

                AsmOutcome::Accepted
            }
            AsmState::ExpectMotorField { motor, field } => {
                if field == MotorField::Ticks && word.0 > MAX_SEGMENT_TICKS {
                    return self.abort(
                        ParseError::SegmentTooLong {
                            motor,
                            ticks: word.0,
                        },
                        shared,
                    );
                }

                field.store(&mut self.current, word);

                if let Some(next) = field.next() {
                    self.state = AsmState::ExpectMotorField { motor, field: next };
                    return AsmOutcome::Accepted;
                }

                // Motor complete
                self.segments.push(std::mem::take(&mut self.current));

                if motor + 1 < self.num_motors {
                    self.state = AsmState::ExpectMotorField {
                        motor: motor + 1,
                        field: MotorField::Ticks,
                    };
                    AsmOutcome::Accepted
                } else {
                    self.commit(shared)
                }
            }
        }
    }

    /// Discard the sequence in progress and enter `Error`, raising `parse_error`.
    ///
    /// Instructions already in the buffer are not touched.
    pub fn abort(&mut self, err: ParseError, shared: &SharedState) -> AsmOutcome {
        warn!("WRITE sequence discarded: {}", err);

        self.discard();
        self.state = AsmState::Error;
        shared.status.set(StatusWord::PARSE_ERROR);

        AsmOutcome::Aborted(err)
    }

    /// Handle a STOP: leave `Error` and lower `parse_error`.
    pub fn clear_error(&mut self, shared: &SharedState) {
        if self.state == AsmState::Error {
            debug!("Assembler error cleared");
        }

        self.discard();
        self.state = AsmState::Idle;
        shared.status.clear(StatusWord::PARSE_ERROR);
    }

    /// Return to `Idle` without touching the status register.
    pub fn reset(&mut self) {
        self.discard();
        self.state = AsmState::Idle;
    }

    fn commit(&mut self, shared: &SharedState) -> AsmOutcome {
        let instr = Instruction {
            instr_type: self.instr_type,
            aux: self.aux,
            segments: std::mem::take(&mut self.segments),
        };
        self.state = AsmState::Idle;

        // Only this actor pushes, so the room checked at WRITE is still there
        let mut buffer = shared.lock_buffer();
        match buffer.push(instr) {
            Ok(()) => {
                debug!(
                    "Instruction committed (aux {:#06x}), {} in buffer",
                    self.aux,
                    buffer.len()
                );
                AsmOutcome::Committed
            }
            Err(BufferFull(_)) => {
                shared.status.set(StatusWord::BUFFER_FULL);
                warn!("Instruction dropped, instruction buffer is full");
                AsmOutcome::Rejected
            }
        }
    }

    fn discard(&mut self) {
        self.segments.clear();
        self.current = MotorSegment::default();
        self.aux = 0;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::TrajectoryExecutor;
    use comms_if::instr::pack_header;
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    fn setup(num_motors: usize, buffer_capacity: usize) -> (InstructionAssembler, SharedState) {
        let config = MotionConfig {
            num_motors,
            buffer_capacity,
            ..Default::default()
        };
        (
            InstructionAssembler::new(&config),
            SharedState::new(&config),
        )
    }

    fn feed(
        asm: &mut InstructionAssembler,
        shared: &SharedState,
        instr: &Instruction,
    ) -> Vec<AsmOutcome> {
        instr
            .to_words()
            .into_iter()
            .map(|w| asm.accept_word(w, shared))
            .collect()
    }

    #[test]
    fn test_assemble_two_motors() {
        let (mut asm, shared) = setup(2, 4);
        let instr = Instruction::new_move(
            0x0005,
            vec![
                MotorSegment::new(50_000, 1, 0, 0),
                MotorSegment::new(100_000, -7, 8, -9),
            ],
        );

        assert_eq!(asm.begin(&shared), AsmOutcome::Started);
        assert_eq!(asm.state(), AsmState::ExpectAux);
        assert!(asm.expects_word());

        let outcomes = feed(&mut asm, &shared, &instr);
        assert_eq!(outcomes.len(), 9);
        assert!(outcomes[..8].iter().all(|o| *o == AsmOutcome::Accepted));
        assert_eq!(outcomes[8], AsmOutcome::Committed);

        assert_eq!(asm.state(), AsmState::Idle);
        assert!(shared.status.read().is_nominal());
        assert_eq!(shared.lock_buffer().peek_front(), Some(&instr));
    }

    #[test]
    fn test_field_order() {
        let (mut asm, shared) = setup(2, 4);
        asm.begin(&shared);
        asm.accept_word(pack_header(1, 0), &shared);

        assert_eq!(
            asm.state(),
            AsmState::ExpectMotorField {
                motor: 0,
                field: MotorField::Ticks
            }
        );

        for _ in 0..4 {
            asm.accept_word(Word(1), &shared);
        }

        assert_eq!(
            asm.state(),
            AsmState::ExpectMotorField {
                motor: 1,
                field: MotorField::Ticks
            }
        );

        asm.accept_word(Word(1), &shared);
        assert_eq!(
            asm.state(),
            AsmState::ExpectMotorField {
                motor: 1,
                field: MotorField::C0
            }
        );
    }

    #[test]
    fn test_begin_when_full() {
        let (mut asm, shared) = setup(1, 1);
        shared
            .lock_buffer()
            .push(Instruction::new_move(0, vec![MotorSegment::new(1, 0, 0, 0)]))
            .unwrap();

        assert_eq!(asm.begin(&shared), AsmOutcome::Rejected);
        assert_eq!(asm.state(), AsmState::Idle);
        assert!(!asm.expects_word());
        assert!(shared.status.read().buffer_full());
        assert_eq!(shared.buffer_len(), 1);

        // Room again, the next WRITE clears the flag
        shared.lock_buffer().pop_front();
        assert_eq!(asm.begin(&shared), AsmOutcome::Started);
        assert!(shared.status.read().is_nominal());
    }

    #[test]
    fn test_begin_races_retirement() {
        const ROUNDS: usize = 2_000;

        let config = MotionConfig {
            num_motors: 1,
            buffer_capacity: 1,
            path_ticks: 1,
            ..Default::default()
        };
        let shared = Arc::new(SharedState::new(&config));
        let mut asm = InstructionAssembler::new(&config);
        let mut exec = TrajectoryExecutor::new(config, shared.clone());

        let go = Arc::new(Barrier::new(2));
        let done = Arc::new(Barrier::new(2));

        let handle = {
            let go = go.clone();
            let done = done.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    go.wait();
                    exec.tick();
                    done.wait();
                }
            })
        };

        for round in 0..ROUNDS {
            asm.reset();
            shared.status.clear_all();
            shared
                .lock_buffer()
                .push(Instruction::new_move(0, vec![MotorSegment::new(1, 1, 0, 0)]))
                .unwrap();
            shared.status.set(StatusWord::RUNNING);

            // WRITE against a full buffer while the executor retires its only instruction
            go.wait();
            asm.begin(&shared);
            done.wait();

            assert_eq!(shared.buffer_len(), 0, "round {}", round);
            assert!(
                !shared.status.read().buffer_full(),
                "buffer_full left set on an empty buffer in round {}",
                round
            );
        }

        handle.join().unwrap();
    }

    #[test]
    fn test_abort_keeps_buffer() {
        let (mut asm, shared) = setup(1, 4);
        let instr = Instruction::new_move(1, vec![MotorSegment::new(10, 1, 2, 3)]);

        asm.begin(&shared);
        feed(&mut asm, &shared, &instr);
        assert_eq!(shared.buffer_len(), 1);

        // Half a sequence, then a framing error
        asm.begin(&shared);
        asm.accept_word(instr.header_word(), &shared);
        asm.accept_word(Word(10), &shared);
        let outcome = asm.abort(
            FramingError::UnexpectedCommand(comms_if::bus::Command::Status).into(),
            &shared,
        );

        assert!(matches!(outcome, AsmOutcome::Aborted(ParseError::Framing(_))));
        assert_eq!(asm.state(), AsmState::Error);
        assert!(shared.status.read().parse_error());
        assert_eq!(shared.buffer_len(), 1);

        // A fresh WRITE restarts from scratch
        assert_eq!(asm.begin(&shared), AsmOutcome::Started);
        assert!(!shared.status.read().parse_error());
        assert_eq!(
            feed(&mut asm, &shared, &instr).last(),
            Some(&AsmOutcome::Committed)
        );
        assert_eq!(shared.buffer_len(), 2);
    }

    #[test]
    fn test_bad_fields() {
        let (mut asm, shared) = setup(1, 4);

        asm.begin(&shared);
        assert_eq!(
            asm.accept_word(pack_header(0x7f, 0), &shared),
            AsmOutcome::Aborted(ParseError::UnknownInstrType(0x7f))
        );
        assert_eq!(asm.state(), AsmState::Error);

        asm.begin(&shared);
        asm.accept_word(pack_header(1, 0), &shared);
        assert_eq!(
            asm.accept_word(Word(MAX_SEGMENT_TICKS + 1), &shared),
            AsmOutcome::Aborted(ParseError::SegmentTooLong {
                motor: 0,
                ticks: MAX_SEGMENT_TICKS + 1
            })
        );

        // Word outside a sequence
        assert!(matches!(
            asm.accept_word(Word(3), &shared),
            AsmOutcome::Aborted(ParseError::Framing(FramingError::UnexpectedWord(Word(3))))
        ));
        assert_eq!(shared.buffer_len(), 0);
    }

    #[test]
    fn test_clear_error() {
        let (mut asm, shared) = setup(1, 4);

        asm.accept_word(Word(0), &shared);
        assert_eq!(asm.state(), AsmState::Error);
        assert!(shared.status.read().parse_error());

        asm.clear_error(&shared);
        assert_eq!(asm.state(), AsmState::Idle);
        assert!(shared.status.read().is_nominal());
    }
}
