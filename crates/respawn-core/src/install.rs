use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;

use crate::download::ArtifactStream;
use crate::error::UpdateError;

/// Puts a downloaded build in place of the running executable.
///
/// [`AtomicInstaller`] is the default; hosts that ship through a package
/// manager or a supervisor can plug in their own.
#[async_trait]
pub trait Installer: Send + Sync {
    /// # Errors
    /// Returns an error when the build could not be installed. The original
    /// executable must still be runnable at `target_path` afterwards.
    async fn install(
        &self,
        artifact: ArtifactStream,
        target_path: &Path,
    ) -> Result<(), UpdateError>;
}

/// Replaces the executable through a sibling temp file and two renames.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicInstaller;

#[async_trait]
impl Installer for AtomicInstaller {
    async fn install(
        &self,
        mut artifact: ArtifactStream,
        target_path: &Path,
    ) -> Result<(), UpdateError> {
        let transaction = InstallTransaction::prepare(target_path).await?;
        let written = transaction.write_temp(&mut artifact).await?;
        artifact.close();
        transaction.commit().await?;
        info!(
            "Installed {written} bytes at {}",
            transaction.target_path.display()
        );
        Ok(())
    }
}

/// Paths touched by a single install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTransaction {
    /// Real file behind the executable path, symlinks resolved.
    pub target_path: PathBuf,
    /// `<dir>/.<name>.new`
    pub temp_path: PathBuf,
    /// `<dir>/.<name>.old`
    pub backup_path: PathBuf,
}

impl InstallTransaction {
    /// # Errors
    /// Returns a filesystem error when `executable` cannot be resolved.
    pub async fn prepare(executable: &Path) -> Result<Self, UpdateError> {
        let target_path = tokio::fs::canonicalize(executable)
            .await
            .map_err(|error| {
                UpdateError::io_with_path("failed to find install target", executable, &error)
            })?;
        Self::for_resolved(target_path)
    }

    fn for_resolved(target_path: PathBuf) -> Result<Self, UpdateError> {
        let (Some(dir), Some(name)) = (target_path.parent(), target_path.file_name()) else {
            return Err(UpdateError::io(
                "install target has no parent directory",
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    target_path.display().to_string(),
                ),
            ));
        };
        let name = name.to_string_lossy();

        Ok(Self {
            temp_path: dir.join(format!(".{name}.new")),
            backup_path: dir.join(format!(".{name}.old")),
            target_path,
        })
    }

    /// Stream the whole artifact into the temp file and flush it to disk.
    ///
    /// A failure at any point (including the final sync, where delayed
    /// write errors such as a full disk surface) removes the temp file and
    /// leaves the target untouched.
    async fn write_temp(&self, artifact: &mut ArtifactStream) -> Result<u64, UpdateError> {
        let result = self.write_temp_inner(artifact).await;
        if result.is_err()
            && let Err(error) = tokio::fs::remove_file(&self.temp_path).await
        {
            debug!(
                "Could not remove partial file {}: {error}",
                self.temp_path.display()
            );
        }
        result
    }

    async fn write_temp_inner(&self, artifact: &mut ArtifactStream) -> Result<u64, UpdateError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o755);

        let mut file = options.open(&self.temp_path).await.map_err(|error| {
            UpdateError::io_with_path("failed to create new file", &self.temp_path, &error)
        })?;

        let written = tokio::io::copy(artifact, &mut file).await.map_err(|error| {
            UpdateError::io_with_path("write failed", &self.temp_path, &error)
        })?;

        file.flush().await.map_err(|error| {
            UpdateError::io_with_path("flush failed", &self.temp_path, &error)
        })?;
        file.sync_all().await.map_err(|error| {
            UpdateError::io_with_path("close failed", &self.temp_path, &error)
        })?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.temp_path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|error| {
                    UpdateError::io_with_path(
                        "failed to mark new file executable",
                        &self.temp_path,
                        &error,
                    )
                })?;
        }

        Ok(written)
    }

    /// Swap the temp file into place. Renames within one directory are
    /// atomic, so the target path always names a complete binary.
    async fn commit(&self) -> Result<(), UpdateError> {
        tokio::fs::rename(&self.target_path, &self.backup_path)
            .await
            .map_err(|error| {
                UpdateError::io_with_path("update rename failed", &self.target_path, &error)
            })?;

        if let Err(error) = tokio::fs::rename(&self.temp_path, &self.target_path).await {
            if let Err(rollback) = tokio::fs::rename(&self.backup_path, &self.target_path).await {
                warn!(
                    "Rollback of {} failed, original is at {}: {rollback}",
                    self.target_path.display(),
                    self.backup_path.display()
                );
            }
            return Err(UpdateError::io_with_path(
                "update second rename failed",
                &self.temp_path,
                &error,
            ));
        }

        if let Err(error) = tokio::fs::remove_file(&self.backup_path).await {
            debug!(
                "Could not remove {} ({error}), hiding it instead",
                self.backup_path.display()
            );
            hide_file(&self.backup_path);
        }
        Ok(())
    }
}

/// Remove `.new`/`.old` siblings left behind by an earlier install, e.g. a
/// backup that could not be deleted while the old binary was running.
pub fn cleanup_previous_install(executable: &Path) {
    let Ok(target) = std::fs::canonicalize(executable) else {
        return;
    };
    let Ok(transaction) = InstallTransaction::for_resolved(target) else {
        return;
    };
    for leftover in [&transaction.temp_path, &transaction.backup_path] {
        if leftover.exists() {
            match std::fs::remove_file(leftover) {
                Ok(()) => info!("Cleaned up {}", leftover.display()),
                Err(error) => debug!("Could not clean up {}: {error}", leftover.display()),
            }
        }
    }
}

#[cfg(windows)]
fn hide_file(path: &Path) {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{FILE_ATTRIBUTE_HIDDEN, SetFileAttributesW};

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    // SAFETY: `wide` is a NUL-terminated UTF-16 path that outlives the call.
    let ok = unsafe { SetFileAttributesW(wide.as_ptr(), FILE_ATTRIBUTE_HIDDEN) };
    if ok == 0 {
        warn!("Failed to hide {}", path.display());
    }
}

#[cfg(not(windows))]
fn hide_file(_path: &Path) {
    // dot-prefixed names are already hidden
}
