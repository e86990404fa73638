//! Cookie import from browser exports.
//!
//! Accepts either a Playwright storage-state file
//! (`{"cookies": [{"name", "value", "domain", ...}], "origins": []}`) or a
//! flat `{"auth_token": "...", "ct0": "..."}` map copied out of DevTools.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::session::{Credential, AUTH_COOKIE, CSRF_COOKIE};
use crate::error::{Error, Result};

const COOKIE_DOMAINS: &[&str] = &["x.com", "twitter.com"];

#[derive(Debug, Deserialize)]
struct StorageState {
    cookies: Vec<BrowserCookie>,
}

#[derive(Debug, Deserialize)]
struct BrowserCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: Option<String>,
}

/// Read a cookie export and build a fresh credential from it.
pub fn import_cookies(path: &Path) -> Result<Credential> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Browser(format!("cannot read {}: {e}", path.display())))?;
    let credential = parse_cookie_export(&content)?;

    tracing::info!(
        path = %path.display(),
        cookies = credential.cookies.len(),
        has_csrf = credential.csrf_token.is_some(),
        "Imported session cookies"
    );
    Ok(credential)
}

/// Build a credential from `TWITTER_AUTH_TOKEN` / `TWITTER_CT0`.
pub fn import_from_env() -> Result<Credential> {
    let auth_token = std::env::var("TWITTER_AUTH_TOKEN")
        .map_err(|_| Error::Browser("TWITTER_AUTH_TOKEN not set".to_string()))?;

    let mut cookies = BTreeMap::from([(AUTH_COOKIE.to_string(), auth_token)]);
    if let Ok(ct0) = std::env::var("TWITTER_CT0") {
        cookies.insert(CSRF_COOKIE.to_string(), ct0);
    }
    finish(cookies)
}

/// Parse either supported export format.
pub fn parse_cookie_export(content: &str) -> Result<Credential> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| Error::Browser(format!("cookie export is not valid JSON: {e}")))?;

    let cookies = if value.get("cookies").is_some_and(|c| c.is_array()) {
        let state: StorageState = serde_json::from_value(value)
            .map_err(|e| Error::Browser(format!("malformed storage state: {e}")))?;
        state
            .cookies
            .into_iter()
            .filter(|c| c.domain.as_deref().is_none_or(is_x_domain))
            .map(|c| (c.name, c.value))
            .collect()
    } else if let Some(map) = value.as_object() {
        map.iter()
            .filter_map(|(name, v)| v.as_str().map(|s| (name.clone(), s.to_string())))
            .collect()
    } else {
        return Err(Error::Browser(
            "cookie export must be a JSON object".to_string(),
        ));
    };

    finish(cookies)
}

fn finish(cookies: BTreeMap<String, String>) -> Result<Credential> {
    match cookies.get(AUTH_COOKIE) {
        Some(token) if !token.is_empty() => Ok(Credential::new(cookies)),
        _ => Err(Error::Browser(
            "no auth_token cookie found; log in to x.com and export again".to_string(),
        )),
    }
}

fn is_x_domain(domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    COOKIE_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
}
