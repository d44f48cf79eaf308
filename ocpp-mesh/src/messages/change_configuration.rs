//! ChangeConfiguration: set one configuration key on the destination node

use serde::{Deserialize, Serialize};

use super::{JsonCodec, OcppResult, RequestBody, ResponseBody, ResultCode};

const MAX_KEY_LEN: usize = 50;
const MAX_VALUE_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeConfigurationRequest {
    pub key: String,
    pub value: String,
}

impl ChangeConfigurationRequest {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl RequestBody for ChangeConfigurationRequest {
    const ACTION: &'static str = "ChangeConfiguration";
    type Response = ChangeConfigurationResponse;
    type Codec = JsonCodec;

    fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("key must not be empty".to_string());
        }
        if self.key.chars().count() > MAX_KEY_LEN {
            return Err(format!("key exceeds {} characters", MAX_KEY_LEN));
        }
        if self.value.chars().count() > MAX_VALUE_LEN {
            return Err(format!("value exceeds {} characters", MAX_VALUE_LEN));
        }
        Ok(())
    }
}

/// Outcome of a configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConfigurationStatus {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeConfigurationResponse {
    pub status: ConfigurationStatus,
}

impl ChangeConfigurationResponse {
    pub fn new(status: ConfigurationStatus) -> Self {
        Self { status }
    }
}

impl ResponseBody for ChangeConfigurationResponse {
    fn from_result(result: &OcppResult) -> Self {
        let status = match result.code {
            ResultCode::Ok => ConfigurationStatus::Accepted,
            ResultCode::NotImplemented => ConfigurationStatus::NotSupported,
            _ => ConfigurationStatus::Rejected,
        };
        Self { status }
    }
}
