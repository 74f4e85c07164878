//! Inbound command channel message shapes

use crate::core::value::Value;
use crate::error::{PinodeError, PinodeResult};
use serde::{Deserialize, Serialize};

/// An inbound request addressed to one value of one device
///
/// `action` is `get`, `set`, or the name of an action item (e.g. `start`
/// for a stream). For action descriptors the action name becomes the payload
/// when no explicit payload is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub device_id: String,
    pub value_id: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

fn default_action() -> String {
    "set".to_string()
}

impl Command {
    pub fn get(device_id: &str, value_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            value_id: value_id.to_string(),
            action: "get".to_string(),
            payload: None,
        }
    }

    pub fn set<V: Into<Value>>(device_id: &str, value_id: &str, value: V) -> Self {
        Self {
            device_id: device_id.to_string(),
            value_id: value_id.to_string(),
            action: "set".to_string(),
            payload: Some(value.into()),
        }
    }

    pub fn action(device_id: &str, value_id: &str, action: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            value_id: value_id.to_string(),
            action: action.to_string(),
            payload: None,
        }
    }

    pub fn with_payload<V: Into<Value>>(mut self, payload: V) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Outcome of a dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(result: Option<Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(error: &PinodeError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<PinodeResult<Option<Value>>> for CommandResponse {
    fn from(result: PinodeResult<Option<Value>>) -> Self {
        match result {
            Ok(value) => CommandResponse::ok(value),
            Err(e) => CommandResponse::failed(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_from_json() {
        let json = r#"{"deviceId":"out","valueId":"state","payload":true}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(command, Command::set("out", "state", true));

        let json = r#"{"deviceId":"camera","valueId":"stream","action":"start"}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(command.action, "start");
        assert_eq!(command.payload, None);
    }

    #[test]
    fn test_response_json() {
        let response = CommandResponse::failed(&PinodeError::UnknownValue("x".into()));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"Unknown value: x"}"#);
    }
}
