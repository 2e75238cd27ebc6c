//! Wire messages for the JSON-lines configuration protocol.
//!
//! Every message is a single JSON object terminated by `\n`. The client
//! sends one request and reads exactly one response before the next.
//!
//! ```text
//! > {"op":"get_configuration","service":"filter"}
//! < {"status":"ok","config":{"filter_limit_max":0.0}}
//! > {"op":"update_configuration","service":"filter","changes":{"filter_limit_max":0.1}}
//! < {"status":"ok","config":{"filter_limit_max":0.1}}
//! > {"op":"update_configuration","service":"nope","changes":{}}
//! < {"status":"error","message":"unknown service 'nope'"}
//! ```

use crate::Configuration;
use ramp_common::{RampError, RampResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Upper bound on a single protocol line, in bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Client to service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Fetch the full current configuration.
    GetConfiguration {
        /// Target service.
        service: String,
    },
    /// Apply a set of field changes.
    UpdateConfiguration {
        /// Target service.
        service: String,
        /// Fields to change.
        changes: Configuration,
    },
}

impl Request {
    /// Service the request is addressed to.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::GetConfiguration { service } | Self::UpdateConfiguration { service, .. } => {
                service
            }
        }
    }
}

/// Service to client response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Request applied; carries the resulting configuration.
    Ok {
        /// Configuration after the request.
        config: Configuration,
    },
    /// Request refused.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

/// Serialize a message as one newline-terminated line.
///
/// # Errors
///
/// Returns [`RampError::Protocol`] if serialization fails.
pub fn encode_line<T: Serialize>(message: &T) -> RampResult<Vec<u8>> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| RampError::Protocol(format!("failed to encode message: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one line (with or without its trailing newline).
///
/// # Errors
///
/// Returns [`RampError::Protocol`] for oversized or malformed input.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> RampResult<T> {
    if line.len() > MAX_LINE_BYTES {
        return Err(RampError::Protocol(format!(
            "line of {} bytes exceeds limit of {MAX_LINE_BYTES}",
            line.len()
        )));
    }
    serde_json::from_str(line.trim_end())
        .map_err(|e| RampError::Protocol(format!("malformed message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{single_change, ParamValue};

    #[test]
    fn test_request_wire_format() {
        let request = Request::UpdateConfiguration {
            service: "filter".into(),
            changes: single_change("filter_limit_max", 0.5),
        };
        let line = encode_line(&request).unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "{\"op\":\"update_configuration\",\"service\":\"filter\",\"changes\":{\"filter_limit_max\":0.5}}\n"
        );
    }

    #[test]
    fn test_decode_responses() {
        let ok: Response = decode_line("{\"status\":\"ok\",\"config\":{\"filter_limit_max\":1.25}}\n").unwrap();
        match ok {
            Response::Ok { config } => {
                assert_eq!(config["filter_limit_max"], ParamValue::Double(1.25));
            }
            Response::Error { .. } => panic!("expected ok response"),
        }

        let err: Response = decode_line(r#"{"status":"error","message":"nope"}"#).unwrap();
        assert_eq!(
            err,
            Response::Error {
                message: "nope".into()
            }
        );
    }

    #[test]
    fn test_decode_garbage() {
        let result: RampResult<Response> = decode_line("not json");
        assert!(matches!(result, Err(RampError::Protocol(_))));

        let result: RampResult<Response> = decode_line(r#"{"status":"maybe"}"#);
        assert!(matches!(result, Err(RampError::Protocol(_))));
    }

    #[test]
    fn test_request_service() {
        let request = Request::GetConfiguration {
            service: "filter".into(),
        };
        assert_eq!(request.service(), "filter");
    }
}
