//! JSON-RPC 2.0 message decoding and response encoding.
//!
//! Message boundaries are found with a streaming JSON reader: a buffer that ends inside a value
//! is `Incomplete`, anything else that fails to parse is a connection-fatal protocol error.
//! Well-formed JSON that is not a valid request becomes [`JsonRpcMessage::Invalid`] so the
//! application can answer it with a normal error response.

use crpc_common::error::{CrpcError, CrpcResult};
use serde::Serialize;
use serde_json::{Deserializer, Map, Value};

use crate::protocol::{MessageDecoder, ParseStatus, RpcErrorCode};

/// Protocol version accepted in requests and written into responses.
pub const JSONRPC_VERSION: &str = "2.0";

/// One decoded method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Method name.
    pub method: String,
    /// Positional (array) or named (object) parameters.
    pub params: Option<Value>,
    /// Request id. `None` marks a notification that expects no response.
    pub id: Option<Value>,
}

impl MethodCall {
    /// Returns `true` when the caller sent no `id` member.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Outcome of decoding one JSON value from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Structurally valid request.
    Call(MethodCall),
    /// Valid JSON that is not a valid request. Answered with `code`.
    Invalid {
        /// Request id when it could be recovered.
        id: Option<Value>,
        /// Error category for the response.
        code: RpcErrorCode,
    },
}

/// Stateless JSON-RPC boundary detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcDecoder;

impl MessageDecoder for JsonRpcDecoder {
    type Message = JsonRpcMessage;

    fn decode(&self, bytes: &[u8]) -> CrpcResult<ParseStatus<JsonRpcMessage>> {
        let mut stream = Deserializer::from_slice(bytes).into_iter::<Value>();
        match stream.next() {
            None => Ok(ParseStatus::Incomplete),
            // A number that ends the span may still grow with the next read.
            Some(Ok(Value::Number(_))) if stream.byte_offset() == bytes.len() => {
                Ok(ParseStatus::Incomplete)
            }
            Some(Ok(value)) => Ok(ParseStatus::Complete {
                consumed: stream.byte_offset(),
                message: classify_request(value),
            }),
            Some(Err(error)) if error.is_eof() => Ok(ParseStatus::Incomplete),
            Some(Err(error)) => Err(CrpcError::Protocol(format!(
                "malformed JSON-RPC payload: {error}"
            ))),
        }
    }
}

fn classify_request(value: Value) -> JsonRpcMessage {
    let Value::Object(mut object) = value else {
        return invalid(None, RpcErrorCode::InvalidRequest);
    };

    let id = match object.remove("id") {
        None => None,
        Some(id @ (Value::Null | Value::Number(_) | Value::String(_))) => Some(id),
        Some(_) => return invalid(None, RpcErrorCode::InvalidRequest),
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return invalid(id, RpcErrorCode::InvalidRequest);
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => return invalid(id, RpcErrorCode::InvalidRequest),
    };

    let params = match object.remove("params") {
        None => None,
        Some(params @ (Value::Array(_) | Value::Object(_))) => Some(params),
        Some(_) => return invalid(id, RpcErrorCode::InvalidRequest),
    };

    JsonRpcMessage::Call(MethodCall { method, params, id })
}

fn invalid(id: Option<Value>, code: RpcErrorCode) -> JsonRpcMessage {
    JsonRpcMessage::Invalid { id, code }
}

#[derive(Serialize)]
struct ResultEnvelope<'a> {
    jsonrpc: &'static str,
    result: &'a Value,
    id: &'a Value,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    jsonrpc: &'static str,
    error: ErrorObject<'a>,
    id: &'a Value,
}

#[derive(Serialize)]
struct ErrorObject<'a> {
    code: i32,
    message: &'a str,
}

/// Encodes a success response.
///
/// A missing id is written as `null`.
///
/// # Errors
///
/// Returns `CrpcError::Protocol` if `result` cannot be serialized.
pub fn encode_result(id: Option<&Value>, result: &Value) -> CrpcResult<Vec<u8>> {
    serde_json::to_vec(&ResultEnvelope {
        jsonrpc: JSONRPC_VERSION,
        result,
        id: id.unwrap_or(&Value::Null),
    })
    .map_err(|error| CrpcError::Protocol(format!("encode result failed: {error}")))
}

/// Encodes an error response whose message is the standard reason for `code`.
///
/// # Errors
///
/// Returns `CrpcError::Protocol` if the envelope cannot be serialized.
pub fn encode_error(id: Option<&Value>, code: RpcErrorCode) -> CrpcResult<Vec<u8>> {
    encode_error_message(id, code, code.reason())
}

/// Encodes an error response with a caller-chosen message.
///
/// # Errors
///
/// Returns `CrpcError::Protocol` if the envelope cannot be serialized.
pub fn encode_error_message(
    id: Option<&Value>,
    code: RpcErrorCode,
    message: &str,
) -> CrpcResult<Vec<u8>> {
    serde_json::to_vec(&ErrorEnvelope {
        jsonrpc: JSONRPC_VERSION,
        error: ErrorObject {
            code: code.code(),
            message,
        },
        id: id.unwrap_or(&Value::Null),
    })
    .map_err(|error| CrpcError::Protocol(format!("encode error failed: {error}")))
}

/// Builds a named-parameter object, mostly useful for handlers and tests.
#[must_use]
pub fn named_params<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(
        entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect::<Map<String, Value>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::{
        JsonRpcDecoder, JsonRpcMessage, MethodCall, encode_error, encode_result, named_params,
    };
    use crate::protocol::{MessageDecoder, ParseStatus, RpcErrorCode};
    use googletest::prelude::*;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn decode(bytes: &[u8]) -> ParseStatus<JsonRpcMessage> {
        JsonRpcDecoder
            .decode(bytes)
            .expect("decoder should not fail on well-formed input")
    }

    #[rstest]
    fn decoder_waits_for_complete_object() {
        let full = br#"{"jsonrpc":"2.0","method":"x","id":1}"#;
        for split in 0..full.len() {
            assert_eq!(decode(&full[..split]), ParseStatus::Incomplete);
        }

        let ParseStatus::Complete { message, consumed } = decode(full) else {
            panic!("full request should decode");
        };
        assert_that!(consumed, eq(full.len()));
        assert_eq!(
            message,
            JsonRpcMessage::Call(MethodCall {
                method: "x".to_owned(),
                params: None,
                id: Some(json!(1)),
            })
        );
    }

    #[rstest]
    fn decoder_consumes_only_first_of_pipelined_requests() {
        let first = br#"{"jsonrpc":"2.0","method":"a","id":1}"#;
        let mut bytes = first.to_vec();
        bytes.extend_from_slice(br#" {"jsonrpc":"2.0","method":"b","id":2}"#);

        let ParseStatus::Complete { consumed, .. } = decode(&bytes) else {
            panic!("first request should decode");
        };
        assert_that!(consumed, eq(first.len()));

        let ParseStatus::Complete { message, consumed } = decode(&bytes[consumed..]) else {
            panic!("second request should decode");
        };
        assert_that!(consumed, eq(bytes.len() - first.len()));
        let JsonRpcMessage::Call(call) = message else {
            panic!("second request should be a call");
        };
        assert_that!(call.method, eq("b"));
    }

    #[rstest]
    fn decoder_treats_whitespace_as_incomplete() {
        assert_eq!(decode(b""), ParseStatus::Incomplete);
        assert_eq!(decode(b" \r\n\t"), ParseStatus::Incomplete);
    }

    #[rstest]
    fn decoder_waits_for_number_that_ends_the_buffer() {
        assert_eq!(decode(b"12"), ParseStatus::Incomplete);
        assert_eq!(decode(b"1234"), ParseStatus::Incomplete);

        let ParseStatus::Complete { message, consumed } = decode(b"1234 ") else {
            panic!("delimited number should be consumed");
        };
        assert_that!(consumed, eq(4_usize));
        assert_eq!(
            message,
            JsonRpcMessage::Invalid {
                id: None,
                code: RpcErrorCode::InvalidRequest,
            }
        );
    }

    #[rstest]
    #[case(&b"{\"jsonrpc\":]"[..])]
    #[case(&b"}"[..])]
    #[case(&b"garbage"[..])]
    fn decoder_rejects_malformed_json(#[case] bytes: &[u8]) {
        assert_that!(JsonRpcDecoder.decode(bytes).is_err(), eq(true));
    }

    #[rstest]
    #[case(r#"[1,2]"#, None)]
    #[case(r#"{"method":"x","id":4}"#, Some(json!(4)))]
    #[case(r#"{"jsonrpc":"1.0","method":"x","id":"a"}"#, Some(json!("a")))]
    #[case(r#"{"jsonrpc":"2.0","id":5}"#, Some(json!(5)))]
    #[case(r#"{"jsonrpc":"2.0","method":7,"id":6}"#, Some(json!(6)))]
    #[case(r#"{"jsonrpc":"2.0","method":"x","params":3,"id":7}"#, Some(json!(7)))]
    #[case(r#"{"jsonrpc":"2.0","method":"x","id":{"nested":true}}"#, None)]
    fn decoder_flags_invalid_requests(#[case] raw: &str, #[case] expected_id: Option<Value>) {
        let ParseStatus::Complete { message, consumed } = decode(raw.as_bytes()) else {
            panic!("well-formed JSON should be consumed");
        };
        assert_that!(consumed, eq(raw.len()));
        assert_eq!(
            message,
            JsonRpcMessage::Invalid {
                id: expected_id,
                code: RpcErrorCode::InvalidRequest,
            }
        );
    }

    #[rstest]
    fn decoder_keeps_params_and_notification_marker() {
        let raw = br#"{"jsonrpc":"2.0","method":"echo","params":{"v":1}}"#;
        let ParseStatus::Complete { message, .. } = decode(raw) else {
            panic!("notification should decode");
        };
        let JsonRpcMessage::Call(call) = message else {
            panic!("notification should be a call");
        };
        assert_that!(call.is_notification(), eq(true));
        assert_eq!(call.params, Some(named_params([("v", json!(1))])));
    }

    #[rstest]
    fn encoder_writes_fields_in_wire_order() {
        let encoded = encode_result(Some(&json!(1)), &Value::Null).expect("encode result");
        assert_that!(
            String::from_utf8(encoded).expect("utf8"),
            eq(r#"{"jsonrpc":"2.0","result":null,"id":1}"#)
        );

        let encoded =
            encode_error(Some(&json!("abc")), RpcErrorCode::MethodNotFound).expect("encode error");
        assert_that!(
            String::from_utf8(encoded).expect("utf8"),
            eq(r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":"abc"}"#)
        );
    }

    #[rstest]
    fn encoder_writes_null_for_missing_id() {
        let encoded = encode_error(None, RpcErrorCode::InvalidRequest).expect("encode error");
        assert_that!(
            String::from_utf8(encoded).expect("utf8"),
            eq(r#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid request"},"id":null}"#)
        );
    }
}
