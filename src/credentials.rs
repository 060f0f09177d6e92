//! Access token lookup
//!
//! The feed client asks its [`CredentialProvider`] for a token before every
//! connection attempt, so a token refreshed or removed between attempts is
//! picked up.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret as _, SecretString};
use tracing::{debug, warn};

use crate::config::CredentialsConfig;

/// Synchronous lookup of the current session token.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<SecretString>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<SecretString> + Send + Sync,
{
    fn token(&self) -> Option<SecretString> {
        self()
    }
}

/// Fixed token, or none at all.
pub struct StaticToken(Option<SecretString>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(SecretString::from(token.into())))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&self.0.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<SecretString> {
        self.0
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
    }
}

/// Token read from an environment variable on every lookup.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvToken {
    fn token(&self) -> Option<SecretString> {
        match std::env::var(&self.var) {
            Ok(token) => non_empty(token),
            Err(_) => {
                debug!("Token variable {} not set", self.var);
                None
            }
        }
    }
}

/// Token read from a file on every lookup, surrounding whitespace trimmed.
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for FileToken {
    fn token(&self) -> Option<SecretString> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => non_empty(contents),
            Err(e) => {
                warn!("Could not read token file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

fn non_empty(token: String) -> Option<SecretString> {
    let trimmed = token.trim();
    (!trimmed.is_empty()).then(|| SecretString::from(trimmed.to_owned()))
}

/// Build the provider described by the configuration.
pub fn from_config(config: &CredentialsConfig) -> Arc<dyn CredentialProvider> {
    match &config.token_file {
        Some(path) => Arc::new(FileToken::new(path.clone())),
        None => Arc::new(EnvToken::new(config.token_env.clone())),
    }
}
