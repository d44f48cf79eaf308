//! DataTransfer: vendor-specific JSON exchange

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{JsonCodec, OcppResult, RequestBody, ResponseBody};

const MAX_VENDOR_ID_LEN: usize = 255;
const MAX_MESSAGE_ID_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferRequest {
    pub vendor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DataTransferRequest {
    pub fn new(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            message_id: None,
            data: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A `data` member that is present stays `Some`, even when it is `null`
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

pub(crate) fn validate_ids(vendor_id: &str, message_id: Option<&str>) -> Result<(), String> {
    if vendor_id.is_empty() {
        return Err("vendorId must not be empty".to_string());
    }
    if vendor_id.chars().count() > MAX_VENDOR_ID_LEN {
        return Err(format!("vendorId exceeds {} characters", MAX_VENDOR_ID_LEN));
    }
    if message_id.map(|id| id.chars().count() > MAX_MESSAGE_ID_LEN) == Some(true) {
        return Err(format!("messageId exceeds {} characters", MAX_MESSAGE_ID_LEN));
    }
    Ok(())
}

impl RequestBody for DataTransferRequest {
    const ACTION: &'static str = "DataTransfer";
    type Response = DataTransferResponse;
    type Codec = JsonCodec;

    fn validate(&self) -> Result<(), String> {
        validate_ids(&self.vendor_id, self.message_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferResponse {
    pub status: DataTransferStatus,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DataTransferResponse {
    pub fn new(status: DataTransferStatus) -> Self {
        Self { status, data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl ResponseBody for DataTransferResponse {
    fn from_result(result: &OcppResult) -> Self {
        let status = if result.is_ok() {
            DataTransferStatus::Accepted
        } else {
            DataTransferStatus::Rejected
        };
        Self { status, data: None }
    }
}
