use std::path::PathBuf;

use log::{error, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutableError {
    #[error("unable to locate the running executable: {source}")]
    Unresolved {
        #[source]
        source: std::io::Error,
    },
    #[error("unable to locate the running executable: no argv[0]")]
    NoArgv0,
}

/// Locate the running executable.
///
/// Prefers [`std::env::current_exe`]; falls back to an absolute `argv[0]`,
/// then to `argv[0]` as given. Call it once at startup: after the binary was
/// replaced on disk, Linux reports the old inode with a ` (deleted)` suffix,
/// which is stripped here.
///
/// # Errors
/// Returns an error only when every strategy fails.
pub fn self_exe() -> Result<PathBuf, ExecutableError> {
    match std::env::current_exe() {
        Ok(exe) => Ok(strip_deleted_suffix(exe)),
        Err(source) => {
            let Some(arg0) = std::env::args_os().next() else {
                error!("Unable to locate executable ({source}) and no argv[0] is available");
                return Err(ExecutableError::NoArgv0);
            };
            match std::path::absolute(&arg0) {
                Ok(exe) => {
                    error!(
                        "Unable to locate executable with current_exe ({source}), using {} instead",
                        exe.display()
                    );
                    Ok(exe)
                }
                Err(abs_error) => {
                    let exe = PathBuf::from(arg0);
                    error!(
                        "Unable to locate executable with current_exe ({source}) or argv[0] ({abs_error}), using {} instead",
                        exe.display()
                    );
                    if exe.as_os_str().is_empty() {
                        return Err(ExecutableError::Unresolved { source });
                    }
                    Ok(exe)
                }
            }
        }
    }
}

fn strip_deleted_suffix(exe: PathBuf) -> PathBuf {
    if !cfg!(target_os = "linux") {
        return exe;
    }
    let path_str = exe.to_string_lossy();
    if let Some(stripped) = path_str.strip_suffix(" (deleted)") {
        let fixed = PathBuf::from(stripped);
        info!("Adjusted exe path from deleted inode: {}", fixed.display());
        fixed
    } else {
        exe
    }
}
