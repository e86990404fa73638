//! Session management for Twitter authentication.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AuthErrorKind, Error, Result};

/// Cookie that carries the long-lived login.
pub const AUTH_COOKIE: &str = "auth_token";

/// Cookie whose value doubles as the anti-forgery token.
pub const CSRF_COOKIE: &str = "ct0";

/// Imported browser session used in place of an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Cookie name to value.
    pub cookies: BTreeMap<String, String>,
    /// Anti-forgery token derived from the `ct0` cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// When the credential was imported. Only used for staleness hints.
    pub issued_marker: DateTime<Utc>,
    /// Cleared once the remote rejects the credential.
    pub valid: bool,
    /// When the credential was invalidated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a fresh, valid credential from a cookie set.
    #[must_use]
    pub fn new(cookies: BTreeMap<String, String>) -> Self {
        let csrf_token = cookies.get(CSRF_COOKIE).cloned();
        Self {
            cookies,
            csrf_token,
            issued_marker: Utc::now(),
            valid: true,
            invalidated_at: None,
        }
    }

    /// The `auth_token` cookie, if present.
    pub fn auth_token(&self) -> Option<&str> {
        self.cookies.get(AUTH_COOKIE).map(String::as_str)
    }

    /// Get cookie string for HTTP requests.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Whether the credential is older than `max_age_days`.
    pub fn is_possibly_stale(&self, max_age_days: i64) -> bool {
        Utc::now() - self.issued_marker > Duration::days(max_age_days)
    }
}

/// Owns the session-state file for one invocation.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    stale_after_days: i64,
}

impl SessionStore {
    /// Create a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after_days: crate::config::DEFAULT_STALE_AFTER_DAYS,
        }
    }

    /// Set the age at which a staleness warning is logged.
    #[must_use]
    pub fn with_stale_after_days(mut self, days: i64) -> Self {
        self.stale_after_days = days;
        self
    }

    /// Session file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current credential.
    ///
    /// Fails with `not_found` when nothing usable was imported and with
    /// `stale` when an earlier run invalidated it.
    pub fn load(&self) -> Result<Credential> {
        let credential = self.read()?.ok_or_else(|| {
            Error::auth(
                AuthErrorKind::NotFound,
                format!(
                    "no session found at {}; run `marksync import-cookies` first",
                    self.path.display()
                ),
            )
        })?;

        if !credential.valid {
            return Err(Error::auth(
                AuthErrorKind::Stale,
                "session was rejected by X on a previous run; re-import cookies",
            ));
        }

        if credential.auth_token().is_none() {
            return Err(Error::auth(
                AuthErrorKind::NotFound,
                "session has no auth_token cookie; re-import cookies",
            ));
        }

        if credential.is_possibly_stale(self.stale_after_days) {
            tracing::warn!(
                imported = %credential.issued_marker,
                "Session is older than {} days and may have expired",
                self.stale_after_days
            );
        }

        Ok(credential)
    }

    /// Persist a credential, replacing any previous one.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let content = serde_json::to_string_pretty(credential)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Mark the stored credential as rejected.
    ///
    /// Terminal until the user re-imports. A missing session file is left alone.
    pub fn invalidate(&self) -> Result<()> {
        let Some(mut credential) = self.read()? else {
            return Ok(());
        };
        if !credential.valid {
            return Ok(());
        }

        credential.valid = false;
        credential.invalidated_at = Some(Utc::now());
        self.save(&credential)?;

        tracing::warn!(path = %self.path.display(), "Invalidated rejected session");
        Ok(())
    }

    fn read(&self) -> Result<Option<Credential>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            Error::auth(
                AuthErrorKind::NotFound,
                format!("session file {} is unreadable: {e}", self.path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("auth_token".to_string(), "tok".to_string()),
            ("ct0".to_string(), "csrf".to_string()),
        ])
    }

    #[test]
    fn test_credential_derives_csrf() {
        let credential = Credential::new(cookies());
        assert_eq!(credential.csrf_token.as_deref(), Some("csrf"));
        assert_eq!(credential.auth_token(), Some("tok"));
        assert_eq!(credential.cookie_header(), "auth_token=tok; ct0=csrf");
        assert!(credential.valid);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));

        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                kind: AuthErrorKind::NotFound,
                ..
            }
        ));
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));
        let credential = Credential::new(cookies());

        store.save(&credential).unwrap();
        assert_eq!(store.load().unwrap(), credential);
    }

    #[test]
    fn test_invalidate_makes_load_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.save(&Credential::new(cookies())).unwrap();

        store.invalidate().unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                kind: AuthErrorKind::Stale,
                ..
            }
        ));

        // A second store instance sees the persisted state.
        let reopened = SessionStore::new(store.path().to_path_buf());
        assert!(reopened.load().is_err());
    }

    #[test]
    fn test_invalidate_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.invalidate().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_garbage_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let err = SessionStore::new(path).load().unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                kind: AuthErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_staleness_hint() {
        let mut credential = Credential::new(cookies());
        assert!(!credential.is_possibly_stale(30));
        credential.issued_marker = Utc::now() - Duration::days(45);
        assert!(credential.is_possibly_stale(30));
    }
}
