//! Controller configuration

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest segment (and path) accepted, in ticks.
///
/// Keeps `c * t^3` well inside an `i128` so polynomial evaluation is always exact.
pub const MAX_SEGMENT_TICKS: u32 = 1 << 24;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Configuration of the controller.
///
/// Fixed at construction and shared by every component, nothing here can be changed over the
/// bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Number of motors, and therefore segments in every instruction.
    pub num_motors: usize,

    /// Number of instructions the buffer can hold.
    pub buffer_capacity: usize,

    /// Nominal path length of an instruction.
    ///
    /// Units: ticks
    pub path_ticks: u32,

    /// Period of the tick clock.
    ///
    /// Units: microseconds
    pub tick_period_us: u64,

    /// Number of fractional bits in the fixed-point positions produced by the polynomials.
    pub fraction_bits: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Invalid configurations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("At least one motor is required")]
    NoMotors,

    #[error("The instruction buffer must hold at least one instruction")]
    NoBufferCapacity,

    #[error("Path length must be between 1 and {max} ticks, found {0}", max = MAX_SEGMENT_TICKS)]
    InvalidPathTicks(u32),

    #[error("The tick period must be non-zero")]
    ZeroTickPeriod,

    #[error("Expected fewer than 64 fraction bits, found {0}")]
    TooManyFractionBits(u32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            num_motors: 3,
            buffer_capacity: 16,
            path_ticks: 100_000,
            tick_period_us: 1,
            fraction_bits: 0,
        }
    }
}

impl MotionConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_motors == 0 {
            return Err(ConfigError::NoMotors);
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::NoBufferCapacity);
        }
        if self.path_ticks == 0 || self.path_ticks > MAX_SEGMENT_TICKS {
            return Err(ConfigError::InvalidPathTicks(self.path_ticks));
        }
        if self.tick_period_us == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.fraction_bits >= 64 {
            return Err(ConfigError::TooManyFractionBits(self.fraction_bits));
        }

        Ok(())
    }

    /// The tick period as a duration.
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(self.tick_period_us)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
