//! Heartbeat: liveness ping answered with the peer's clock

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JsonCodec, OcppResult, RequestBody, ResponseBody};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

impl RequestBody for HeartbeatRequest {
    const ACTION: &'static str = "Heartbeat";
    type Response = HeartbeatResponse;
    type Codec = JsonCodec;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

impl HeartbeatResponse {
    pub fn now() -> Self {
        Self {
            current_time: Utc::now(),
        }
    }
}

impl ResponseBody for HeartbeatResponse {
    fn from_result(_result: &OcppResult) -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_object() {
        assert_eq!(serde_json::to_string(&HeartbeatRequest {}).unwrap(), "{}");
    }

    #[test]
    fn test_current_time_field() {
        let response: HeartbeatResponse =
            serde_json::from_str(r#"{"currentTime": "2024-01-15T10:00:00Z"}"#).unwrap();
        assert_eq!(response.current_time.to_rfc3339(), "2024-01-15T10:00:00+00:00");
    }
}
