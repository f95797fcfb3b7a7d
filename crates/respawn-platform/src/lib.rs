//! Platform facts the self-updater depends on.
//!
//! - Canonical `os`/`arch` tokens for the running build and for `uname`
//!   output ([`Target`]).
//! - Locating the running executable ([`self_exe`]).
//! - Per-user config/data directories for the daemon host ([`AppPaths`]).

mod exe;
mod paths;
mod target;

pub use exe::{ExecutableError, self_exe};
pub use paths::{AppPaths, AppPathsError};
pub use target::{Target, UNAME_ARCH_MATCH, UNAME_OS_MATCH};
