//! Outcome of submitting one heartbeat.

use serde::{Deserialize, Serialize};

/// How the receiving end classified a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Stored by the receiver.
    Accepted,

    /// Refused as invalid. Retrying will not help.
    Rejected,

    /// Not stored, but may succeed on a later attempt.
    Error,
}

impl ResultStatus {
    /// Classifies an HTTP status code returned for a single heartbeat.
    ///
    /// Rate limiting (429) is retryable, unlike the other client errors.
    pub fn from_http(code: u16) -> Self {
        match code {
            201 | 202 => Self::Accepted,
            400..=428 | 430..=499 => Self::Rejected,
            _ => Self::Error,
        }
    }
}

/// The result for a single heartbeat, with optional diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResult {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HeartbeatResult {
    pub fn accepted() -> Self {
        Self {
            status: ResultStatus::Accepted,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_codes_map_to_status() {
        assert_eq!(ResultStatus::from_http(201), ResultStatus::Accepted);
        assert_eq!(ResultStatus::from_http(202), ResultStatus::Accepted);
        assert_eq!(ResultStatus::from_http(400), ResultStatus::Rejected);
        assert_eq!(ResultStatus::from_http(422), ResultStatus::Rejected);
        assert_eq!(ResultStatus::from_http(429), ResultStatus::Error);
        assert_eq!(ResultStatus::from_http(500), ResultStatus::Error);
        assert_eq!(ResultStatus::from_http(200), ResultStatus::Error);
    }
}
