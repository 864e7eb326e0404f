use serde_json::Value;
use std::fmt;

/// The error body shapes the collaborator is known to send, in the order they
/// are checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorPayload {
    /// `{ "errors": { "field": "message" | ["message", ...] } }`
    FieldErrors(Vec<(String, String)>),
    /// `{ "errors": ["message", ...] }`
    Messages(Vec<String>),
    /// `{ "error": "message" }`
    Message(String),
    #[default]
    Empty,
}

impl ErrorPayload {
    pub fn from_value(value: &Value) -> Self {
        match value.get("errors") {
            Some(Value::Object(fields)) => {
                let messages: Vec<(String, String)> = fields
                    .iter()
                    .filter_map(|(field, msg)| first_text(msg).map(|m| (field.clone(), m)))
                    .collect();
                if !messages.is_empty() {
                    return ErrorPayload::FieldErrors(messages);
                }
            }
            Some(Value::Array(items)) => {
                let messages: Vec<String> = items.iter().filter_map(first_text).collect();
                if !messages.is_empty() {
                    return ErrorPayload::Messages(messages);
                }
            }
            _ => {}
        }

        match value.get("error") {
            Some(Value::String(msg)) if !msg.trim().is_empty() => ErrorPayload::Message(msg.clone()),
            _ => ErrorPayload::Empty,
        }
    }

    pub fn from_body(body: &str) -> Self {
        if body.trim().is_empty() {
            return ErrorPayload::Empty;
        }
        serde_json::from_str::<Value>(body)
            .map(|v| Self::from_value(&v))
            .unwrap_or_default()
    }

    pub fn first_message(&self) -> Option<&str> {
        match self {
            ErrorPayload::FieldErrors(fields) => fields.first().map(|(_, m)| m.as_str()),
            ErrorPayload::Messages(messages) => messages.first().map(String::as_str),
            ErrorPayload::Message(msg) => Some(msg.as_str()),
            ErrorPayload::Empty => None,
        }
    }
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.first_message().unwrap_or("no details"))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(ErrorPayload),

    #[error("not found: {0}")]
    NotFound(ErrorPayload),

    #[error("not authorized: {0}")]
    Auth(ErrorPayload),

    #[error("server error (status {status}): {payload}")]
    Server { status: u16, payload: ErrorPayload },

    #[error("network error: {0}")]
    Network(String),
}

impl ApiError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let payload = ErrorPayload::from_body(body);
        match status {
            400 | 422 => ApiError::Validation(payload),
            401 | 403 => ApiError::Auth(payload),
            404 => ApiError::NotFound(payload),
            _ => ApiError::Server { status, payload },
        }
    }

    pub fn payload(&self) -> Option<&ErrorPayload> {
        match self {
            ApiError::Validation(p) | ApiError::NotFound(p) | ApiError::Auth(p) => Some(p),
            ApiError::Server { payload, .. } => Some(payload),
            ApiError::Network(_) => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    /// Display-ready message: field error, then error list, then the single
    /// `error` string, then `fallback`.
    pub fn display_message(&self, fallback: &str) -> String {
        self.payload()
            .and_then(ErrorPayload::first_message)
            .unwrap_or(fallback)
            .to_string()
    }
}
