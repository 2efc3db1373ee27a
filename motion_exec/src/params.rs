//! # Motion Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use motion_lib::MotionConfig;
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MotionExecParams {
    /// Period at which the protocol loop polls the bus script.
    ///
    /// Units: milliseconds
    pub script_poll_period_ms: u64,

    /// Controller configuration
    pub motion: MotionConfig,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MotionExecParams {
    fn default() -> Self {
        Self {
            script_poll_period_ms: 1,
            motion: MotionConfig::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
