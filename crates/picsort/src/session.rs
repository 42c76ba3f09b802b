//! Session token handling for API requests
//!
//! The token itself is issued elsewhere (login). This module only finds it
//! and turns it into an `Authorization` header value.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Credentials attached to outgoing requests
#[derive(Clone, Default)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    /// Session with no token; requests go out unauthenticated
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    /// Session from a raw token. Blank tokens give an anonymous session.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() {
            return Self::anonymous();
        }
        Self {
            token: Some(token.to_string()),
        }
    }

    /// Session from a token file
    pub fn from_token_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("No token file found at {:?}, requests are unauthenticated", path);
            return Ok(Self::anonymous());
        }

        let token = fs::read_to_string(path).context("Failed to read token file")?;
        let session = Self::from_token(&token);

        if !session.is_authenticated() {
            warn!("Token file {:?} is empty, requests are unauthenticated", path);
        }

        Ok(session)
    }

    /// An explicit token wins over the token file
    pub fn resolve(token: Option<&str>, token_file: &Path) -> Result<Self> {
        match token {
            Some(token) => Ok(Self::from_token(token)),
            None => Self::from_token_file(token_file),
        }
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {}", token))
    }

    /// Check if a token is present
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
