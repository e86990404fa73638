//! Machine-readable result envelopes written to stdout.

use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// `{"success": true, ...fields}`.
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

impl<T: Serialize> Success<T> {
    /// Wrap command-specific fields. `data` must serialize as a map.
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// The `error` object of a failure envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u8,
    pub code_name: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            code_name: err.code_name(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

/// `{"success": false, "error": {...}}`, optionally with partial results.
#[derive(Debug, Serialize)]
pub struct Failure {
    success: bool,
    error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    partial: Option<Value>,
}

impl Failure {
    pub fn new(err: &Error) -> Self {
        Self {
            success: false,
            error: ErrorBody::from(err),
            partial: None,
        }
    }

    /// Attach counts from work that completed before the failure.
    #[must_use]
    pub fn with_partial(mut self, partial: impl Serialize) -> Self {
        self.partial = serde_json::to_value(partial).ok();
        self
    }
}

/// Serialize an envelope as pretty JSON.
pub fn render(envelope: &impl Serialize) -> String {
    serde_json::to_string_pretty(envelope).unwrap_or_else(|e| {
        format!(
            r#"{{"success": false, "error": {{"code": 1, "code_name": "general_error", "message": "failed to encode result: {e}"}}}}"#
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorKind, NetworkErrorKind};
    use serde_json::json;

    #[test]
    fn test_success_flattens_fields() {
        let out = render(&Success::new(json!({ "new_count": 3 })));
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!({ "success": true, "new_count": 3 }));
    }

    #[test]
    fn test_failure_envelope() {
        let err = Error::auth(AuthErrorKind::Rejected, "session rejected");
        let value: Value = serde_json::from_str(&render(&Failure::new(&err))).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], 2);
        assert_eq!(value["error"]["code_name"], "auth_error");
        assert_eq!(value["error"]["message"], "session rejected");
        assert_eq!(value["error"]["details"]["kind"], "rejected");
        assert!(value.get("partial").is_none());
    }

    #[test]
    fn test_failure_with_partial() {
        let err = Error::network(NetworkErrorKind::Transient, "timed out").on_page(4);
        let failure = Failure::new(&err).with_partial(json!({ "new_count": 40 }));
        let value: Value = serde_json::from_str(&render(&failure)).unwrap();
        assert_eq!(value["error"]["code"], 3);
        assert_eq!(value["error"]["details"]["page"], 4);
        assert_eq!(value["partial"]["new_count"], 40);
    }

    #[test]
    fn test_not_found_lists_ids() {
        let err = Error::NotFound {
            ids: vec!["1".into(), "2".into()],
        };
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, 4);
        assert_eq!(body.details, Some(json!({ "ids": ["1", "2"] })));
    }
}
