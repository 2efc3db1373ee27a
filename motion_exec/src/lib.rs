//! # Motion controller library.
//!
//! The controller core: commands and words arrive from the bus, the [`controller::Controller`]
//! assembles them into instructions held in the instruction buffer, and the
//! [`executor::TrajectoryExecutor`] steps through the buffer one tick at a time, evaluating each
//! motor's cubic polynomial.
//!
//! The two halves run as separate actors and only share the [`shared::SharedState`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Device configuration, fixed when the controller is built.
pub mod config;

/// Status register shared between the protocol handler and the executor.
pub mod status_reg;

/// Bounded FIFO of assembled instructions.
pub mod buffer;

/// State shared between the protocol handler and the executor.
pub mod shared;

/// State machine turning WRITE sequences into instructions.
pub mod assembler;

/// Tick driven trajectory executor.
pub mod executor;

/// Protocol handler - the controller's side of the bus.
pub mod controller;

// ------------------------------------------------------------------------------------------------
// REEXPORTS
// ------------------------------------------------------------------------------------------------

pub use config::MotionConfig;
pub use controller::Controller;
pub use executor::TrajectoryExecutor;
