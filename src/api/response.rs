//! Response routing: decode a raw HTTP outcome into success data or an error

use serde_json::Value;

use super::ApiError;

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Classify an HTTP outcome.
///
/// Transport failures pass straight through. A non-2xx status becomes
/// [`ApiError::Status`], using any `error` or `message` field in the body as
/// the message. A 2xx JSON object with an `error` key is an application error.
/// An empty 2xx body is a `null` success.
pub fn route(outcome: Result<RawResponse, ApiError>) -> Result<Value, ApiError> {
    let response = outcome?;

    if !response.is_success() {
        let message = serde_json::from_slice::<Value>(&response.body)
            .ok()
            .and_then(|json| error_message(&json))
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).trim().to_string());
        return Err(ApiError::Status {
            status: response.status,
            message,
        });
    }

    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    let json: Value = serde_json::from_slice(&response.body)
        .map_err(|e| ApiError::Decode(e.to_string()))?;

    if let Some(error) = json.as_object().and_then(|o| o.get("error")) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(ApiError::Application(message));
    }

    Ok(json)
}

fn error_message(json: &Value) -> Option<String> {
    let object = json.as_object()?;
    ["error", "message"]
        .iter()
        .find_map(|key| object.get(*key))
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
}
