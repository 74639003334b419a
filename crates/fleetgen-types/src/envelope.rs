//! Inbound command surface and the uniform response envelope.
//!
//! The gateway forwards `(operation, args, identity)` and expects back a
//! `{code, data?, error?}` envelope. `code = 200` is success, `1` an internal
//! error, and `2` a permission denial. Soft domain rejections (double start,
//! double stop, nothing deleted) are success envelopes whose `data` carries a
//! [`StatusMessage`] with a 4xx code.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Envelope code for a successful command.
pub const CODE_OK: i32 = 200;
/// Envelope code for an internal error.
pub const INTERNAL_SERVER_ERROR_CODE: i32 = 1;
/// Envelope code for a permission denial.
pub const PERMISSION_DENIED_CODE: i32 = 2;
/// Status code for a soft rejection (e.g. generation already running).
pub const BAD_REQUEST_CODE: i32 = 400;
/// Status code for an unknown aggregate id.
pub const NOT_FOUND_CODE: i32 = 404;

/// Who is calling: the roles granted to them and an opaque display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CallerIdentity {
    /// Roles granted to the caller.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Name recorded as `user` on events and in audit metadata.
    #[serde(default)]
    pub display_name: String,
}

impl CallerIdentity {
    /// Build an identity from a display name and role names.
    pub fn new<I, S>(display_name: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            display_name: display_name.to_owned(),
        }
    }

    /// Whether the caller holds at least one of `required`.
    pub fn has_any_role(&self, required: &BTreeSet<String>) -> bool {
        required.iter().any(|role| self.roles.contains(role))
    }
}

/// A command forwarded by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CommandRequest {
    /// Operation key, `<aggregateType>.<operationType>.<methodName>`.
    pub operation: String,
    /// Operation arguments.
    #[serde(default)]
    pub args: serde_json::Value,
    /// The caller.
    pub identity: CallerIdentity,
}

/// Error detail carried by a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResponseError {
    /// Error code (same as the envelope code).
    pub code: i32,
    /// Human-readable message.
    pub msg: String,
}

/// Uniform response envelope returned for every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CommandResponse {
    /// `200` on success, otherwise the error code.
    pub code: i32,
    /// Handler result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl CommandResponse {
    /// A success envelope around `data`.
    pub const fn success(data: serde_json::Value) -> Self {
        Self {
            code: CODE_OK,
            data: Some(data),
            error: None,
        }
    }

    /// A failure envelope.
    pub fn failure(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            data: None,
            error: Some(ResponseError {
                code,
                msg: msg.into(),
            }),
        }
    }

    /// Whether the envelope reports success.
    pub const fn is_success(&self) -> bool {
        self.code == CODE_OK
    }
}

/// A `{code, message}` result used by soft-rejecting operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StatusMessage {
    /// `200` when the operation took effect, a 4xx code otherwise.
    pub code: i32,
    /// Human-readable outcome.
    pub message: String,
}

impl StatusMessage {
    /// An accepted outcome.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            message: message.into(),
        }
    }

    /// A soft rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            code: BAD_REQUEST_CODE,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_intersection() {
        let caller = CallerIdentity::new("ana", ["GENERATOR_READ"]);
        let read: BTreeSet<String> = [String::from("GENERATOR_READ")].into();
        let write: BTreeSet<String> = [String::from("GENERATOR_WRITE")].into();
        assert!(caller.has_any_role(&read));
        assert!(!caller.has_any_role(&write));
    }

    #[test]
    fn empty_required_set_never_matches() {
        let caller = CallerIdentity::new("ana", ["GENERATOR_READ"]);
        assert!(!caller.has_any_role(&BTreeSet::new()));
    }

    #[test]
    fn success_envelope_omits_error() {
        let json = serde_json::to_value(CommandResponse::success(serde_json::json!(1)))
            .unwrap_or_default();
        assert_eq!(json, serde_json::json!({ "code": 200, "data": 1 }));
    }

    #[test]
    fn failure_envelope_carries_code_twice() {
        let resp = CommandResponse::failure(PERMISSION_DENIED_CODE, "Permission denied");
        assert!(!resp.is_success());
        assert_eq!(resp.error.map(|e| e.code), Some(PERMISSION_DENIED_CODE));
    }
}
