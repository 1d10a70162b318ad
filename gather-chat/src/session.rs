//! Persisted session state.
//!
//! The session file lives at `~/.config/gather/session.toml`. It carries the
//! opaque bearer credential plus the endpoints and user id from the last
//! login. The transport reads the credential once per connect and never
//! refreshes it mid-connection.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ChatError;

/// An opaque non-empty bearer credential.
///
/// Construction is the only validation point: the server treats the value as
/// a black box and so does everything here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ChatError::EmptyCredential);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session state saved on quit, restored on start.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Session {
    /// Bearer credential from the last login.
    pub token: Option<String>,
    /// Socket endpoint last connected to.
    pub socket_url: Option<String>,
    /// REST base URL last used.
    pub api_url: Option<String>,
    /// Authenticated user id (drives the `is_mine` derivation).
    pub user_id: Option<String>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gather")
}

fn session_path() -> PathBuf {
    config_dir().join("session.toml")
}

impl Session {
    pub fn load() -> Self {
        let path = session_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(session) => return session,
                    Err(error) => {
                        tracing::warn!(path = %path.display(), %error, "bad session file");
                    }
                },
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "can't read session file");
                }
            }
        }
        Self::default()
    }

    /// Best-effort save; a failure is logged, never fatal.
    pub fn save(&self) {
        let path = session_path();
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match toml::to_string_pretty(self) {
            Ok(s) => {
                if let Err(error) = std::fs::write(&path, s) {
                    tracing::warn!(%error, "can't save session");
                }
            }
            Err(error) => tracing::warn!(%error, "can't serialize session"),
        }
    }

    /// The persisted credential, if one is stored and non-empty.
    pub fn credential(&self) -> Option<Credential> {
        self.token.as_deref().and_then(|t| Credential::new(t).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_rejects_empty_and_blank() {
        assert!(Credential::new("").is_err());
        assert!(Credential::new("   ").is_err());
        assert_eq!(Credential::new("tok").unwrap().as_str(), "tok");
    }

    #[test]
    fn session_credential_filters_empty_token() {
        let session = Session {
            token: Some(String::new()),
            ..Session::default()
        };
        assert!(session.credential().is_none());

        let session = Session {
            token: Some("abc".into()),
            ..Session::default()
        };
        assert_eq!(session.credential().unwrap().as_str(), "abc");
    }

    #[test]
    fn session_roundtrips_through_toml() {
        let session = Session {
            token: Some("abc".into()),
            socket_url: Some("wss://chat.gather.app/socket".into()),
            api_url: Some("https://api.gather.app/v1/".into()),
            user_id: Some("u1".into()),
        };
        let text = toml::to_string_pretty(&session).unwrap();
        let back: Session = toml::from_str(&text).unwrap();
        assert_eq!(back.token.as_deref(), Some("abc"));
        assert_eq!(back.user_id.as_deref(), Some("u1"));
    }
}
