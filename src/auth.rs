//! Admin token for the HTTP API.
//!
//! A 32-byte random secret stored hex-encoded in the data directory. Every
//! administrative route requires it as a bearer token.

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;

const TOKEN_BYTES: usize = 32;

/// Auth errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No admin token found at {0}. Run 'registrar init' first.")]
    NoToken(PathBuf),

    #[error("Invalid admin token file: expected {expected} hex characters")]
    InvalidToken { expected: usize },

    #[error("Admin token already exists at {0}. Delete it first to regenerate.")]
    TokenExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared secret for administrative requests.
#[derive(Clone)]
pub struct AdminToken {
    secret: String,
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(..)")
    }
}

impl AdminToken {
    /// Fresh random token, not persisted.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self {
            secret: hex::encode(bytes),
        }
    }

    /// Load a token from file.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            return Err(AuthError::NoToken(path.to_path_buf()));
        }

        let text = fs::read_to_string(path)?;
        let secret = text.trim();

        if secret.len() != TOKEN_BYTES * 2 || hex::decode(secret).is_err() {
            return Err(AuthError::InvalidToken {
                expected: TOKEN_BYTES * 2,
            });
        }

        Ok(Self {
            secret: secret.to_ascii_lowercase(),
        })
    }

    /// Generate and save a new token.
    pub fn init(path: &Path) -> Result<Self, AuthError> {
        if path.exists() {
            return Err(AuthError::TokenExists(path.to_path_buf()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let token = Self::generate();
        fs::write(path, &token.secret)?;

        // Owner read/write only (Unix)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(token)
    }

    /// The hex secret, for clients.
    pub fn as_str(&self) -> &str {
        &self.secret
    }

    /// Compare a presented token without short-circuiting on the first
    /// differing byte.
    pub fn verify(&self, presented: &str) -> bool {
        let expected = self.secret.as_bytes();
        let presented = presented.trim().as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b.to_ascii_lowercase()))
            == 0
    }
}

/// Token file inside a data directory.
pub fn token_path(data_dir: &Path) -> PathBuf {
    data_dir.join("admin.token")
}
