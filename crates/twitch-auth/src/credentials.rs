//! Token file storage
//!
//! The app access token lives in a single plaintext file. It is read at use
//! time (never cached) so an operator can drop a fresh token in place without
//! restarting the relay. Writes go through a temp file + rename so a crash
//! mid-write never leaves a truncated token behind.

use std::path::{Path, PathBuf};

use common::Secret;
use tracing::debug;

use crate::error::{Error, Result};

/// Plaintext token file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current token.
    ///
    /// Surrounding whitespace (a trailing newline from an editor, say) is
    /// stripped. A missing or blank file is `Error::NotFound`; any other read
    /// failure is `Error::Io`. Callers must not continue without a token.
    pub async fn read(&self) -> Result<Secret<String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "token file {} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading token file {}: {e}",
                    self.path.display()
                )));
            }
        };

        let token = contents.trim();
        if token.is_empty() {
            return Err(Error::NotFound(format!(
                "token file {} is empty",
                self.path.display()
            )));
        }
        Ok(Secret::new(token.to_owned()))
    }

    /// Replace the stored token.
    pub async fn write(&self, token: &str) -> Result<()> {
        write_atomic(&self.path, token).await
    }
}

/// Write the token atomically with 0600 permissions.
async fn write_atomic(path: &Path, token: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let tmp_path = dir.join(format!(".token.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, token.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted token");
    Ok(())
}
