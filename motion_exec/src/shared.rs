//! # Shared state
//!
//! Everything both actors touch. The protocol handler only pushes to the buffer and toggles the
//! run flag, the executor only pops from the front of the buffer once an instruction has been
//! fully consumed. Instructions are immutable once pushed so the buffer lock only guards the
//! queue itself and is never held across a tick.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use crate::{buffer::InstructionBuffer, config::MotionConfig, status_reg::StatusRegister};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State shared between the protocol handler and the executor.
#[derive(Debug)]
pub struct SharedState {
    buffer: Mutex<InstructionBuffer>,

    /// The status register.
    pub status: StatusRegister,

    /// Absolute position of each motor in whole steps, published by the executor every tick.
    positions: Vec<AtomicI64>,

    /// Set by an external reset, taken by the executor at its next tick.
    reset_request: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SharedState {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            buffer: Mutex::new(InstructionBuffer::new(config.buffer_capacity)),
            status: StatusRegister::new(),
            positions: (0..config.num_motors).map(|_| AtomicI64::new(0)).collect(),
            reset_request: AtomicBool::new(false),
        }
    }

    /// Lock the instruction buffer.
    ///
    /// Instructions are never modified in place, so a lock poisoned by a panicking actor still
    /// guards a consistent queue and is recovered rather than propagated.
    pub fn lock_buffer(&self) -> MutexGuard<'_, InstructionBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of instructions in the buffer.
    pub fn buffer_len(&self) -> usize {
        self.lock_buffer().len()
    }

    /// Published absolute position of a motor in whole steps, or `None` for an unknown motor.
    pub fn position(&self, motor: usize) -> Option<i64> {
        self.positions.get(motor).map(|p| p.load(Ordering::SeqCst))
    }

    /// Publish the absolute position of a motor.
    pub(crate) fn publish_position(&self, motor: usize, steps: i64) {
        if let Some(p) = self.positions.get(motor) {
            p.store(steps, Ordering::SeqCst);
        }
    }

    pub fn num_motors(&self) -> usize {
        self.positions.len()
    }

    /// Zero every published position.
    pub(crate) fn clear_positions(&self) {
        for p in &self.positions {
            p.store(0, Ordering::SeqCst);
        }
    }

    pub(crate) fn request_reset(&self) {
        self.reset_request.store(true, Ordering::SeqCst);
    }

    /// True if a reset has been requested and not yet taken by the executor.
    pub(crate) fn reset_pending(&self) -> bool {
        self.reset_request.load(Ordering::SeqCst)
    }

    /// Take a pending reset request, clearing it.
    pub(crate) fn take_reset_request(&self) -> bool {
        self.reset_request.swap(false, Ordering::SeqCst)
    }
}
