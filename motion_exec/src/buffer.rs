//! # Instruction buffer
//!
//! Fixed capacity FIFO of instructions waiting to be executed. Instructions are never reordered
//! or merged, the executor sees exactly the sequence that was written.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::instr::Instruction;
use std::collections::VecDeque;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Bounded instruction FIFO.
#[derive(Debug)]
pub struct InstructionBuffer {
    queue: VecDeque<Instruction>,

    capacity: usize,
}

/// Returned by [`InstructionBuffer::push`] when there is no room, handing the instruction back.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("The instruction buffer is full")]
pub struct BufferFull(pub Instruction);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InstructionBuffer {
    /// Create an empty buffer which holds at most `capacity` instructions.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an instruction to the back of the buffer.
    ///
    /// If the buffer is full it is left untouched and the instruction is returned in the error.
    pub fn push(&mut self, instr: Instruction) -> Result<(), BufferFull> {
        if self.is_full() {
            return Err(BufferFull(instr));
        }

        self.queue.push_back(instr);
        Ok(())
    }

    /// The oldest instruction, if any.
    pub fn peek_front(&self) -> Option<&Instruction> {
        self.queue.front()
    }

    /// Remove the oldest instruction.
    pub fn pop_front(&mut self) -> Option<Instruction> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every instruction. Only used by a reset.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
