//! JSON-RPC 2.0 protocol types for MCP

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    /// `None` only when the member is absent; `"id": null` is `Some(Null)`
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    /// Notifications carry no id and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    /// Always present; `null` when the request id is unknown
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

#[derive(Debug, Serialize)]
pub struct Error {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(Error {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// Error with a detail string in `data`.
    pub fn error_with_data(id: Option<Value>, code: i32, message: &str, data: impl Into<String>) -> Self {
        let mut response = Self::error(id, code, message);
        if let Some(ref mut error) = response.error {
            error.data = Some(Value::String(data.into()));
        }
        response
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decode one frame. On failure returns a parse-error response carrying the
/// request id if one could be recovered from the text.
pub fn decode(frame: &str) -> Result<Request, Response> {
    serde_json::from_str::<Request>(frame).map_err(|e| {
        let id = serde_json::from_str::<Value>(frame)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .filter(|id| id.is_string() || id.is_number());
        Response::error_with_data(id, PARSE_ERROR, "Parse error", e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let req = decode(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.id, Some(json!(1)));
        assert!(req.params.is_null());
        assert!(!req.is_notification());
    }

    #[test]
    fn test_null_id_is_not_a_notification() {
        let req = decode(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(Value::Null));
        assert!(!req.is_notification());

        let note = decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert_eq!(note.id, None);
        assert!(note.is_notification());
    }

    #[test]
    fn test_decode_garbage_has_null_id() {
        let resp = decode("{not json").unwrap_err();
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], PARSE_ERROR);
        assert!(value["error"]["data"].is_string());
    }

    #[test]
    fn test_decode_recovers_id() {
        // Valid JSON, but not a request: no method
        let resp = decode(r#"{"jsonrpc":"2.0","id":"abc"}"#).unwrap_err();
        assert_eq!(resp.id, json!("abc"));
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn test_response_never_has_both() {
        let ok = serde_json::to_value(Response::success(Some(json!(7)), json!({}))).unwrap();
        assert!(ok.get("error").is_none());
        assert_eq!(ok["id"], 7);

        let err = serde_json::to_value(Response::error(None, METHOD_NOT_FOUND, "Method not found"))
            .unwrap();
        assert!(err.get("result").is_none());
        assert!(err["error"].get("data").is_none());
    }
}
