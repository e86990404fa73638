//! Authentication module for Twitter/X access.
//!
//! Provides cookie import and session-state persistence.

mod import;
mod session;

pub use import::{import_cookies, import_from_env, parse_cookie_export};
pub use session::{Credential, SessionStore, AUTH_COOKIE, CSRF_COOKIE};
