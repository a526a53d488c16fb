//! Wire codec - request/response JSON shapes and error code mapping
//!
//! Messages are plain JSON objects, one per line (see [`super::framer`]).
//! Field names and error codes follow the protocol exactly so a client and
//! server built from this module (or a foreign implementation) interoperate.

use crate::nine_s::{Error, Scroll};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default TCP port for the wire protocol.
pub const DEFAULT_PORT: u16 = 9564;

/// One of the six wire-level operations.
///
/// `unwatch` is a protocol-only concern - it cancels a subscription started
/// by `watch` and has no Namespace-trait counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Read,
    Write,
    List,
    Watch,
    Unwatch,
    Close,
}

/// Client → server request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub tag: u64,
    pub op: Op,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server → client response.
///
/// A `watch` acknowledgement is `{tag, ok: true}`; subsequent pushed events
/// for that subscription repeat the tag with `event: true` and a `scroll`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Response {
    pub tag: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll: Option<Scroll>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<bool>,
}

impl Response {
    pub fn ok(tag: u64) -> Self {
        Response {
            tag,
            ok: true,
            ..Default::default()
        }
    }

    pub fn scroll(tag: u64, scroll: Scroll) -> Self {
        Response {
            tag,
            ok: true,
            scroll: Some(scroll),
            ..Default::default()
        }
    }

    pub fn paths(tag: u64, paths: Vec<String>) -> Self {
        Response {
            tag,
            ok: true,
            paths: Some(paths),
            ..Default::default()
        }
    }

    pub fn event(tag: u64, scroll: Scroll) -> Self {
        Response {
            tag,
            ok: true,
            scroll: Some(scroll),
            event: Some(true),
            ..Default::default()
        }
    }

    pub fn err(tag: u64, error: &Error) -> Self {
        Response {
            tag,
            ok: false,
            error: Some(error.to_string()),
            code: Some(error_code(error).to_string()),
            ..Default::default()
        }
    }
}

/// Map an `Error` to its stable wire code.
pub fn error_code(err: &Error) -> &'static str {
    match err {
        Error::NotFound(_) => "not_found",
        Error::InvalidPath(_) => "invalid_path",
        Error::InvalidData(_) => "invalid_data",
        Error::Permission(_) => "permission",
        Error::Closed => "closed",
        Error::Timeout => "timeout",
        Error::Connection(_) => "connection",
        Error::Unavailable(_) => "unavailable",
        Error::Internal(_) => "internal",
    }
}

/// Reconstruct an `Error` variant from a wire code. Unknown codes map to
/// `Internal` rather than failing the decode.
pub fn error_from_code(code: &str, message: String) -> Error {
    match code {
        "not_found" => Error::NotFound(message),
        "invalid_path" => Error::InvalidPath(message),
        "invalid_data" => Error::InvalidData(message),
        "permission" => Error::Permission(message),
        "closed" => Error::Closed,
        "timeout" => Error::Timeout,
        "connection" => Error::Connection(message),
        "unavailable" => Error::Unavailable(message),
        _ => Error::Internal(message),
    }
}

/// Turn a response carrying an error into the corresponding `Error`.
///
/// Panics if called on an `ok` response - callers should check `ok` first.
pub fn response_to_error(resp: &Response) -> Error {
    debug_assert!(!resp.ok);
    let message = resp.error.clone().unwrap_or_default();
    match &resp.code {
        Some(code) => error_from_code(code, message),
        None => Error::Internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = Request {
            tag: 7,
            op: Op::Write,
            path: "/inbox/msg-1".to_string(),
            data: Some(serde_json::json!({"text": "hi"})),
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tag, 7);
        assert_eq!(parsed.path, "/inbox/msg-1");
        assert!(matches!(parsed.op, Op::Write));
    }

    #[test]
    fn response_err_carries_code() {
        let err = Error::NotFound("/missing".to_string());
        let resp = Response::err(5, &err);
        assert_eq!(resp.tag, 5);
        assert!(!resp.ok);
        assert_eq!(resp.code.as_deref(), Some("not_found"));
    }

    #[test]
    fn error_code_roundtrip() {
        let cases = [
            Error::NotFound("x".into()),
            Error::InvalidPath("x".into()),
            Error::InvalidData("x".into()),
            Error::Permission("x".into()),
            Error::Closed,
            Error::Timeout,
            Error::Connection("x".into()),
            Error::Unavailable("x".into()),
            Error::Internal("x".into()),
        ];
        for err in cases {
            let code = error_code(&err);
            let reconstructed = error_from_code(code, "x".to_string());
            assert_eq!(error_code(&reconstructed), code);
        }
    }

    #[test]
    fn unknown_code_maps_to_internal() {
        let err = error_from_code("not_a_real_code", "huh".to_string());
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn event_response_shape() {
        let scroll = Scroll::new("/inbox/msg-1", serde_json::json!({"text": "hi"}));
        let resp = Response::event(3, scroll);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["event"], true);
        assert_eq!(json["ok"], true);
        assert!(json["scroll"].is_object());
    }
}
