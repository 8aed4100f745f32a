//! Application data directory and restrictive file helpers.
//!
//! All persisted state (identity store, audit log) lives under the app data
//! directory: `~/.vocsign` on POSIX, the platform data directory elsewhere.
//! Directories are created 0700 and files written 0600 on unix.

use crate::infra::error::{SignerError, SignerResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Resolve the application data directory, creating it if missing.
pub fn app_data_dir() -> SignerResult<PathBuf> {
    let dir = if cfg!(windows) {
        dirs::data_dir()
            .map(|d| d.join("vocsign"))
            .ok_or_else(|| SignerError::Configuration("no data directory".to_string()))?
    } else {
        dirs::home_dir()
            .map(|h| h.join(".vocsign"))
            .ok_or_else(|| SignerError::Configuration("no home directory".to_string()))?
    };
    create_private_dir(&dir)?;
    Ok(dir)
}

/// Create a directory (and parents) with mode 0700 on unix.
pub fn create_private_dir(dir: &Path) -> SignerResult<()> {
    fs::create_dir_all(dir)
        .map_err(|e| SignerError::Io(format!("failed to create {}: {e}", dir.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| SignerError::Io(format!("failed to chmod {}: {e}", dir.display())))?;
    }
    Ok(())
}

/// Write a file with mode 0600 on unix.
pub fn write_private_file(path: &Path, data: &[u8]) -> SignerResult<()> {
    fs::write(path, data)
        .map_err(|e| SignerError::Io(format!("failed to write {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| SignerError::Io(format!("failed to chmod {}: {e}", path.display())))?;
    }
    Ok(())
}
