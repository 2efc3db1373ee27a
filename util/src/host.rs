//! Host platform utility functions

use std::env;
use std::path::PathBuf;

/// Environment variable holding the root directory of the software.
pub const SW_ROOT_ENV_VAR: &str = "MOTION_SW_ROOT";

/// Get the root directory of the software, under which `params` and `sessions` live.
pub fn get_motion_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
