//! Authentication token lifecycle.
//!
//! A 32-byte secret, hex-encoded to 64 characters, persisted in a file
//! private to the owner. Generated on first boot when absent. Every gateway
//! connection must present it in its `connect` frame; comparison is
//! constant-time.

use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Default token file name, sibling to the config.
pub const TOKEN_FILE: &str = "warden.token";

/// Paths probed for an existing token, in order.
const TOKEN_SEARCH_PATHS: &[&str] = &["warden.token", "../../warden.token"];

/// Expected hex length of a valid token (32 bytes).
const TOKEN_HEX_LEN: usize = 64;

/// The shared connection secret.
#[derive(Clone)]
pub struct AuthToken {
    value: String,
}

impl AuthToken {
    /// Wraps a known token value (tests, explicit config).
    #[must_use]
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Loads an existing token or generates and persists a fresh one.
    ///
    /// Existing files win so the planner and kernel share one secret; a
    /// fresh token is written mode 0600.
    ///
    /// # Errors
    ///
    /// Fails when no valid token exists and the file cannot be written.
    pub fn load_or_generate(preferred_dir: &Path) -> std::io::Result<(Self, PathBuf)> {
        for candidate in TOKEN_SEARCH_PATHS {
            let path = Path::new(candidate);
            if let Ok(data) = std::fs::read_to_string(path) {
                let trimmed = data.trim();
                if trimmed.len() == TOKEN_HEX_LEN {
                    tracing::info!(path = %path.display(), "loaded auth token");
                    return Ok((Self::from_value(trimmed), path.to_path_buf()));
                }
                tracing::warn!(path = %path.display(), "ignoring malformed token file");
            }
        }

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = hex::encode(bytes);

        let path = preferred_dir.join(TOKEN_FILE);
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(value.as_bytes())?;

        tracing::info!(path = %path.display(), "generated new auth token");
        Ok((Self::from_value(value), path))
    }

    /// Constant-time comparison against a presented token.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        // Length leaks through ct_eq's contract, so compare only when the
        // sizes already line up.
        if presented.len() != self.value.len() {
            return false;
        }
        self.value
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .unwrap_u8()
            == 1
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"[REDACTED]")
            .finish()
    }
}
