//! # Communications interface crate.
//!
//! Provides the bus protocol spoken between the host and the motion controller: command bytes,
//! 32-bit words, the status word returned on every transaction and the MOVE instruction record
//! which is assembled from those words.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Frame level protocol: command bytes, words and the codec which checks their alternation.
pub mod bus;

/// Instruction records stored by the controller.
pub mod instr;

/// Status word returned by the controller on every transaction.
pub mod status;

/// Host side of the bus, used to drive a controller.
pub mod host;
