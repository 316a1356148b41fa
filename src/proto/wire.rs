use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::Catalog;
use super::command::{CommandRequest, CommandResult};
use crate::error::{GatewayError, Result};

/// Request as it arrives from a client.
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    pub command: String,
    #[serde(rename = "commandParameters", default)]
    pub command_parameters: Option<Vec<Value>>,
}

/// Error reply; `status` follows HTTP codes (400 client, 500 server).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireError {
    pub status: u16,
    pub message: String,
}

impl From<&GatewayError> for WireError {
    fn from(err: &GatewayError) -> Self {
        let status = if err.is_client_error() { 400 } else { 500 };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

/// Public API: parse one JSON request and resolve it against the catalog.
pub fn parse_request(text: &str, catalog: &Catalog) -> Result<CommandRequest> {
    let wire: WireRequest = serde_json::from_str(text)
        .map_err(|e| GatewayError::Malformed(format!("bad request, check the request data: {e}")))?;
    let params = wire
        .command_parameters
        .unwrap_or_default()
        .into_iter()
        .map(param_to_string)
        .collect::<Result<Vec<_>>>()?;
    catalog.request(&wire.command, params)
}

// Scalars are accepted and rendered the way they'd be typed on a terminal.
fn param_to_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(GatewayError::Malformed(format!(
            "command parameters must be scalars, got {other}"
        ))),
    }
}

pub fn format_result(result: &CommandResult) -> serde_json::Result<String> {
    serde_json::to_string(result)
}

pub fn format_error(err: &GatewayError) -> serde_json::Result<String> {
    serde_json::to_string(&WireError::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::command::CommandStatus;
    use std::time::Duration;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    #[test]
    fn parses_request_without_params() {
        let r = parse_request(r#"{"command":"ZB_ATI"}"#, &catalog()).unwrap();
        assert_eq!(r.descriptor().name(), "ATI");
        assert!(r.params().is_empty());
    }

    #[test]
    fn parses_request_with_mixed_params() {
        let r = parse_request(
            r#"{"command":"ZB_NTABLE","commandParameters":["00", 3, true]}"#,
            &catalog(),
        )
        .unwrap();
        assert_eq!(r.params(), ["00", "3", "true"]);
    }

    #[test]
    fn rejects_unregistered_and_malformed() {
        let err = parse_request(r#"{"command":"ZB_FOO"}"#, &catalog()).unwrap_err();
        assert!(matches!(err, GatewayError::NotRegistered(_)));
        assert_eq!(WireError::from(&err).status, 400);

        let err = parse_request("{not json", &catalog()).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));

        let err = parse_request(r#"{"commandParameters":[]}"#, &catalog()).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));

        let err =
            parse_request(r#"{"command":"ZB_ATI","commandParameters":[[1]]}"#, &catalog())
                .unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[test]
    fn result_uses_wire_field_names() {
        let r = CommandResult::success(vec!["TELEGESIS R120".into()], Duration::from_millis(1000));
        let json: Value = serde_json::from_str(&format_result(&r).unwrap()).unwrap();
        assert_eq!(json["commandStatus"], "SUCCESS");
        assert_eq!(json["commandDuration"], 1.0);
        assert_eq!(json["commandOutput"][0], "TELEGESIS R120");

        let back: CommandResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, CommandStatus::Success);
    }

    #[test]
    fn transport_faults_map_to_server_errors() {
        let body = format_error(&GatewayError::Disconnected).unwrap();
        let e: WireError = serde_json::from_str(&body).unwrap();
        assert_eq!(e.status, 500);
    }
}
