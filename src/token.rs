//! Feeder pairing token.
//!
//! A single opaque secret shared with nearby devices so they can submit
//! sightings through the write API. It is generated once and persisted so that
//! paired devices keep working across restarts. Distribution itself happens
//! outside this crate; the token file is the hand-off point.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

pub const TOKEN_ENV: &str = "FEEDER_TOKEN";
const TOKEN_BYTES: usize = 32;
const MIN_TOKEN_LEN: usize = 16;

#[derive(Clone, PartialEq, Eq)]
pub struct FeederToken {
    secret: String,
}

impl FeederToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            secret: hex::encode(bytes),
        }
    }

    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        if secret.len() < MIN_TOKEN_LEN {
            return Err(anyhow!(
                "feeder token must be at least {} characters",
                MIN_TOKEN_LEN
            ));
        }
        if secret.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(anyhow!("feeder token must not contain whitespace"));
        }
        Ok(Self {
            secret: secret.to_string(),
        })
    }

    /// Resolve the token: `FEEDER_TOKEN` if set, else the token file, else a
    /// freshly generated token written to `path`. The flag reports whether a
    /// new token was created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if let Ok(secret) = std::env::var(TOKEN_ENV) {
            if !secret.trim().is_empty() {
                return Ok((Self::from_secret(&secret)?, false));
            }
        }
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read token file {}", path.display()))?;
            let token = Self::from_secret(&raw)
                .with_context(|| format!("invalid token file {}", path.display()))?;
            return Ok((token, false));
        }
        let token = Self::generate();
        write_token_file(path, &token.secret)?;
        log::info!(
            "generated feeder token {} at {}",
            token.fingerprint(),
            path.display()
        );
        Ok((token, true))
    }

    pub fn as_str(&self) -> &str {
        &self.secret
    }

    /// First 8 bytes of the SHA-256 of the secret, hex encoded. Safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.as_bytes());
        hex::encode(&digest[..8])
    }

    /// Compare a presented token without short-circuiting on the first
    /// mismatched byte.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = Sha256::digest(self.secret.as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for FeederToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeederToken")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, format!("{token}\n"))
        .with_context(|| format!("failed to write token file {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
