//! Wire messages exchanged with the destination processor.
//!
//! Both directions are JSON objects:
//! - **Request**: `{"command": "...", "uuid": "...", "parameters": {...}}`
//! - **Reply**: `{"ok": true, "parameters": {...}}` or `{"ok": false, "message": "..."}`
//!
//! Parameter order is preserved end to end.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered parameter mapping carried by requests and successful replies.
pub type Parameters = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("missing 'command'")]
    EmptyCommand,
}

/// A command sent to the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    /// Correlation id. Assigned once, on the first hop, and never rewritten.
    #[serde(rename = "uuid", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: None,
            parameters: Parameters::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// True until a correlation id has been attached.
    pub fn is_first(&self) -> bool {
        self.id.as_deref().is_none_or(str::is_empty)
    }

    /// Attach a fresh correlation id if this is the first hop.
    ///
    /// Returns true when an id was assigned.
    pub fn mark_first_hop(&mut self) -> bool {
        if !self.is_first() {
            return false;
        }
        self.id = Some(uuid::Uuid::new_v4().to_string());
        true
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Outcome of a request: a parameter payload or a failure message, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReplyFrame", into = "ReplyFrame")]
pub enum Reply {
    Success(Parameters),
    Failure(String),
}

impl Reply {
    pub fn ok(parameters: Parameters) -> Self {
        Self::Success(parameters)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn parameters(&self) -> Option<&Parameters> {
        match self {
            Self::Success(parameters) => Some(parameters),
            Self::Failure(_) => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(message) => Some(message),
        }
    }
}

/// Flat wire shape of [`Reply`], discriminated by `ok`.
#[derive(Serialize, Deserialize)]
struct ReplyFrame {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl TryFrom<ReplyFrame> for Reply {
    type Error = &'static str;

    fn try_from(frame: ReplyFrame) -> Result<Self, Self::Error> {
        match (frame.ok, frame.parameters, frame.message) {
            (true, _, Some(_)) => Err("successful reply must not carry 'message'"),
            (true, parameters, None) => Ok(Self::Success(parameters.unwrap_or_default())),
            (false, Some(_), _) => Err("failed reply must not carry 'parameters'"),
            (false, None, Some(message)) => Ok(Self::Failure(message)),
            (false, None, None) => Err("failed reply must carry 'message'"),
        }
    }
}

impl From<Reply> for ReplyFrame {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Success(parameters) => Self {
                ok: true,
                parameters: Some(parameters),
                message: None,
            },
            Reply::Failure(message) => Self {
                ok: false,
                parameters: None,
                message: Some(message),
            },
        }
    }
}

/// Parse a request received from a client.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    let request: Request = serde_json::from_slice(bytes)?;
    if request.command.is_empty() {
        return Err(CodecError::EmptyCommand);
    }
    Ok(request)
}

/// Parse a reply received from the destination.
pub fn decode_reply(bytes: &[u8]) -> Result<Reply, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a request or reply for the wire.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_request_with_parameters_in_order() {
        let request =
            decode_request(br#"{"command":"resize","parameters":{"w":10,"h":20,"a":1}}"#).unwrap();

        assert_eq!(request.command, "resize");
        assert!(request.is_first());
        let keys: Vec<_> = request.parameters.keys().map(String::as_str).collect();
        assert_eq!(keys, ["w", "h", "a"]);
    }

    #[test]
    fn parameters_default_to_empty() {
        let request = decode_request(br#"{"command":"ping"}"#).unwrap();
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn missing_command_is_rejected() {
        let err = decode_request(br#"{"parameters":{}}"#).unwrap_err();
        assert!(err.to_string().contains("missing field `command`"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = decode_request(br#"{"command":""}"#).unwrap_err();
        assert!(matches!(err, CodecError::EmptyCommand));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(decode_request(b"command=ping").is_err());
    }

    #[test]
    fn mark_first_hop_assigns_once() {
        let mut request = Request::new("ping");
        assert!(request.mark_first_hop());
        let id = request.id.clone().unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        assert!(!request.mark_first_hop());
        assert_eq!(request.id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn existing_id_is_kept() {
        let mut request =
            decode_request(br#"{"command":"ping","uuid":"abc-123","parameters":{}}"#).unwrap();
        assert!(!request.mark_first_hop());
        assert_eq!(request.id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn empty_id_counts_as_first_hop() {
        let mut request = decode_request(br#"{"command":"ping","uuid":""}"#).unwrap();
        assert!(request.mark_first_hop());
        assert_ne!(request.id.as_deref(), Some(""));
    }

    #[test]
    fn request_without_id_omits_uuid() {
        let bytes = encode(&Request::new("ping").with_parameter("n", 1)).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"command": "ping", "parameters": {"n": 1}}));
    }

    #[test]
    fn failure_reply_serializes() {
        insta::assert_json_snapshot!(Reply::fail("empty body"), @r#"
        {
          "ok": false,
          "message": "empty body"
        }
        "#);
    }

    #[test]
    fn success_reply_serializes() {
        let mut parameters = Parameters::new();
        parameters.insert("id".to_string(), json!("ping"));
        insta::assert_json_snapshot!(Reply::ok(parameters), @r#"
        {
          "ok": true,
          "parameters": {
            "id": "ping"
          }
        }
        "#);
    }

    #[test]
    fn decodes_success_reply() {
        let reply = decode_reply(br#"{"ok":true,"parameters":{"n":1}}"#).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.parameters().unwrap()["n"], 1);
    }

    #[test]
    fn success_reply_without_parameters_is_empty() {
        let reply = decode_reply(br#"{"ok":true}"#).unwrap();
        assert_eq!(reply, Reply::ok(Parameters::new()));
    }

    #[test]
    fn decodes_failure_reply() {
        let reply = decode_reply(br#"{"ok":false,"message":"boom"}"#).unwrap();
        assert!(!reply.is_ok());
        assert_eq!(reply.message(), Some("boom"));
    }

    #[test]
    fn reply_with_both_payloads_is_rejected() {
        let err = decode_reply(br#"{"ok":false,"message":"x","parameters":{}}"#).unwrap_err();
        assert!(err.to_string().contains("must not carry 'parameters'"));

        let err = decode_reply(br#"{"ok":true,"message":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("must not carry 'message'"));
    }

    #[test]
    fn failed_reply_without_message_is_rejected() {
        let err = decode_reply(br#"{"ok":false}"#).unwrap_err();
        assert!(err.to_string().contains("must carry 'message'"));
    }

    #[test]
    fn reply_without_discriminator_is_rejected() {
        assert!(decode_reply(br#"{"message":"x"}"#).is_err());
    }
}
