use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    InvalidMessage,
    InvalidTarget,
    AutomationFailed,
    UnsupportedMediaType,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:permission-relay:error:invalid_request",
            Self::InvalidMessage => "urn:permission-relay:error:invalid_message",
            Self::InvalidTarget => "urn:permission-relay:error:invalid_target",
            Self::AutomationFailed => "urn:permission-relay:error:automation_failed",
            Self::UnsupportedMediaType => "urn:permission-relay:error:unsupported_media_type",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::InvalidMessage => "Invalid Message",
            Self::InvalidTarget => "Invalid Target",
            Self::AutomationFailed => "Automation Failed",
            Self::UnsupportedMediaType => "Unsupported Media Type",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::InvalidMessage => 400,
            Self::InvalidTarget => 422,
            Self::AutomationFailed => 502,
            Self::UnsupportedMediaType => 415,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

/// Error body pushed to the remote client over the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ClientErrorPayload {
    #[serde(rename = "type")]
    pub type_: ErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("invalid client message: {message}")]
    InvalidMessage { message: String },
    #[error("window handle is not valid: {handle}")]
    InvalidTarget { handle: i64 },
    #[error("window automation failed: {message}")]
    AutomationFailed {
        handle: Option<i64>,
        message: String,
    },
    #[error("unsupported media type: {message}")]
    UnsupportedMediaType { message: String },
}

impl RelayError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::InvalidMessage { .. } => ErrorType::InvalidMessage,
            Self::InvalidTarget { .. } => ErrorType::InvalidTarget,
            Self::AutomationFailed { .. } => ErrorType::AutomationFailed,
            Self::UnsupportedMediaType { .. } => ErrorType::UnsupportedMediaType,
        }
    }

    fn details(&self) -> Option<Value> {
        let mut map = Map::new();
        match self {
            Self::InvalidRequest { .. }
            | Self::InvalidMessage { .. }
            | Self::UnsupportedMediaType { .. } => {}
            Self::InvalidTarget { handle } => {
                map.insert("handle".to_string(), Value::from(*handle));
            }
            Self::AutomationFailed { handle, .. } => {
                if let Some(handle) = handle {
                    map.insert("handle".to_string(), Value::from(*handle));
                }
            }
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }

    pub fn to_client_payload(&self) -> ClientErrorPayload {
        ClientErrorPayload {
            type_: self.error_type(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));
        if let Some(Value::Object(details)) = self.details() {
            problem.extensions = details;
        }
        problem
    }
}

impl From<RelayError> for ProblemDetails {
    fn from(value: RelayError) -> Self {
        value.to_problem_details()
    }
}

impl From<&RelayError> for ProblemDetails {
    fn from(value: &RelayError) -> Self {
        value.to_problem_details()
    }
}

impl From<RelayError> for ClientErrorPayload {
    fn from(value: RelayError) -> Self {
        value.to_client_payload()
    }
}

impl From<&RelayError> for ClientErrorPayload {
    fn from(value: &RelayError) -> Self {
        value.to_client_payload()
    }
}
