//! Shared bearer token, loaded once at startup.
//!
//! The token lives in a plain file (default `/var/lib/polyflow/api_token`).
//! On first start the file doesn't exist yet, so a fresh token of 32 random
//! bytes, hex-encoded, is generated and written with mode 0600. Later starts
//! read it back and trim surrounding whitespace.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use rand::RngCore;
use tracing::info;

use crate::error::TokenError;

/// Random bytes in a freshly generated token (before hex encoding).
const TOKEN_BYTES: usize = 32;

/// The process-wide shared secret. Cheap to clone, never printed.
#[derive(Clone)]
pub struct ApiToken(Arc<str>);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Generate a new random token: 64 lowercase hex characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(hex::encode(bytes))
    }

    /// Read the token at `path`, or create it there if the file is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, TokenError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    return Err(TokenError::Empty {
                        path: path.display().to_string(),
                    });
                }
                Ok(Self::new(token))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let token = Self::generate();
                write_token_file(path, token.expose()).map_err(|source| TokenError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
                info!(path = %path.display(), "Generated new API token");
                Ok(token)
            }
            Err(source) => Err(TokenError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// The raw secret. Only for comparisons and the initial file write.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

fn write_token_file(path: &Path, token: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    // Owner-only from the moment the file exists.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(token.as_bytes())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_hex() {
        let token = ApiToken::generate();
        assert_eq!(token.expose().len(), TOKEN_BYTES * 2);
        assert!(token.expose().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token.expose(), ApiToken::generate().expose());
    }

    #[test]
    fn test_create_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("api_token");

        let created = ApiToken::load_or_create(&path).unwrap();
        assert!(path.exists());

        let reloaded = ApiToken::load_or_create(&path).unwrap();
        assert_eq!(created.expose(), reloaded.expose());
    }

    #[cfg(unix)]
    #[test]
    fn test_created_token_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token");
        ApiToken::load_or_create(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_existing_token_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token");
        fs::write(&path, "  s3cret\n").unwrap();

        let token = ApiToken::load_or_create(&path).unwrap();
        assert_eq!(token.expose(), "s3cret");
    }

    #[test]
    fn test_blank_token_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token");
        fs::write(&path, "\n").unwrap();

        assert!(matches!(
            ApiToken::load_or_create(&path),
            Err(TokenError::Empty { .. })
        ));
    }

    #[test]
    fn test_debug_redacts() {
        let token = ApiToken::new("hunter2");
        assert!(!format!("{token:?}").contains("hunter2"));
    }
}
