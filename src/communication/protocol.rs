//! JSON frames exchanged with the key-value store.

use serde::{Deserialize, Serialize};

use crate::sync_error::SyncError;

pub type MessageId = u64;

pub const CODE_OK: u16 = 200;
pub const CODE_NOT_FOUND: u16 = 404;
pub const CODE_CONFLICT: u16 = 409;

/*──────────────────────── ops ───────────────────────*/

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Op {
    Get,
    /// Upsert.
    Insert,
    Update,
    Delete,
}

impl From<Op> for u8 {
    fn from(op: Op) -> u8 {
        match op {
            Op::Get => 1,
            Op::Insert => 2,
            Op::Update => 3,
            Op::Delete => 4,
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Op::Get),
            2 => Ok(Op::Insert),
            3 => Ok(Op::Update),
            4 => Ok(Op::Delete),
            other => Err(format!("unknown op {other}")),
        }
    }
}

impl Op {
    pub fn is_write(self) -> bool {
        !matches!(self, Op::Get)
    }
}

/*──────────────────────── outbound ───────────────────────*/

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub op: Op,
    pub key: String,
    pub value: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub message_id: MessageId,
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }
}

/*──────────────────────── inbound ───────────────────────*/

/// Correlated reply on the command channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub key: String,
    pub value: Option<String>,
    pub message_id: Option<MessageId>,
    pub error: Option<String>,
}

/// Push for a subscribed key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub key: String,
    pub value: Option<String>,
    pub message_id: Option<MessageId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Response(Response),
    Notification(Notification),
}

impl Inbound {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Inbound::Response(r) => r.message_id,
            Inbound::Notification(n) => n.message_id,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Inbound::Response(r) => &r.key,
            Inbound::Notification(n) => &n.key,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<u16>,
    key: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
    message_id: Option<MessageId>,
    error: Option<String>,
}

/// Values are strings on the wire, but some stores send stored JSON unquoted.
fn value_text(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

pub fn decode_inbound(text: &str) -> Result<Inbound, SyncError> {
    let raw: RawInbound = serde_json::from_str(text)?;
    if raw.kind.as_deref() == Some("notification") {
        let key = raw
            .key
            .ok_or_else(|| SyncError::Protocol("notification without key".into()))?;
        return Ok(Inbound::Notification(Notification {
            key,
            value: value_text(raw.value),
            message_id: raw.message_id,
        }));
    }
    let code = raw
        .code
        .ok_or_else(|| SyncError::Protocol("frame has neither code nor type".into()))?;
    Ok(Inbound::Response(Response {
        code,
        key: raw.key.unwrap_or_default(),
        value: value_text(raw.value),
        message_id: raw.message_id,
        error: raw.error,
    }))
}

/*──────── server side (used by the in-process store) ────────*/

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse<'a> {
    code: u16,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

pub fn encode_response(r: &Response) -> Result<String, SyncError> {
    let raw = RawResponse {
        code: r.code,
        key: &r.key,
        value: r.value.as_deref(),
        message_id: r.message_id,
        error: r.error.as_deref(),
    };
    Ok(serde_json::to_string(&raw)?)
}

pub fn encode_notification(n: &Notification) -> Result<String, SyncError> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct RawNotification<'a> {
        #[serde(rename = "type")]
        kind: &'static str,
        key: &'a str,
        value: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    }
    Ok(serde_json::to_string(&RawNotification {
        kind: "notification",
        key: &n.key,
        value: n.value.as_deref(),
        message_id: n.message_id,
    })?)
}

/*──────── token endpoint ────────*/

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub subscribe_keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_uses_numeric_op_and_camel_case() {
        let m = OutboundMessage {
            op: Op::Insert,
            key: "todos-20250101".into(),
            value: "[]".into(),
            timestamp: 7,
            message_id: 3,
        };
        assert_eq!(
            m.encode().unwrap(),
            r#"{"op":2,"key":"todos-20250101","value":"[]","timestamp":7,"messageId":3}"#
        );
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(Op::try_from(9).is_err());
        let parsed: Result<OutboundMessage, _> = serde_json::from_str(
            r#"{"op":5,"key":"k","value":"","timestamp":0,"messageId":1}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn decodes_correlated_response() {
        let got = decode_inbound(
            r#"{"code":200,"key":"todos-20250101","value":"[]","messageId":4}"#,
        )
        .unwrap();
        assert_eq!(
            got,
            Inbound::Response(Response {
                code: 200,
                key: "todos-20250101".into(),
                value: Some("[]".into()),
                message_id: Some(4),
                error: None,
            })
        );
    }

    #[test]
    fn decodes_error_response_without_key() {
        let got = decode_inbound(r#"{"code":500,"error":"boom","messageId":9}"#).unwrap();
        match got {
            Inbound::Response(r) => {
                assert_eq!(r.code, 500);
                assert_eq!(r.key, "");
                assert_eq!(r.error.as_deref(), Some("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_notification_without_message_id() {
        let got =
            decode_inbound(r#"{"type":"notification","key":"todos-20250101","value":"[]"}"#)
                .unwrap();
        assert_eq!(got.message_id(), None);
        assert!(matches!(got, Inbound::Notification(_)));
        assert_eq!(got.key(), "todos-20250101");
    }

    #[test]
    fn unquoted_json_value_is_kept_as_text() {
        let got = decode_inbound(r#"{"type":"notification","key":"k","value":[]}"#).unwrap();
        match got {
            Inbound::Notification(n) => assert_eq!(n.value.as_deref(), Some("[]")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(decode_inbound("nope"), Err(SyncError::Protocol(_))));
        assert!(matches!(
            decode_inbound(r#"{"key":"k"}"#),
            Err(SyncError::Protocol(_))
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":"notification"}"#),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn server_frames_decode_back() {
        let n = Notification {
            key: "todos-20250101".into(),
            value: Some("[]".into()),
            message_id: None,
        };
        assert_eq!(
            decode_inbound(&encode_notification(&n).unwrap()).unwrap(),
            Inbound::Notification(n)
        );
        let r = Response {
            code: 404,
            key: "todos-20250101".into(),
            value: None,
            message_id: Some(2),
            error: Some("not found".into()),
        };
        assert_eq!(decode_inbound(&encode_response(&r).unwrap()).unwrap(), Inbound::Response(r));
    }
}
