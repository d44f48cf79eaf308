//! BinaryDataTransfer: vendor-specific exchange carried in binary frames

use serde::{Deserialize, Serialize};

use super::data_transfer::{validate_ids, DataTransferStatus};
use super::{BinaryCodec, OcppResult, RequestBody, ResponseBody};

// Binary bodies are bincode-encoded: every field is always written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryDataTransferRequest {
    pub vendor_id: String,
    pub message_id: Option<String>,
    pub data: Vec<u8>,
}

impl BinaryDataTransferRequest {
    pub fn new(vendor_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            message_id: None,
            data,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

impl RequestBody for BinaryDataTransferRequest {
    const ACTION: &'static str = "BinaryDataTransfer";
    type Response = BinaryDataTransferResponse;
    type Codec = BinaryCodec;

    fn validate(&self) -> Result<(), String> {
        validate_ids(&self.vendor_id, self.message_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryDataTransferResponse {
    pub status: DataTransferStatus,
    pub data: Vec<u8>,
}

impl BinaryDataTransferResponse {
    pub fn new(status: DataTransferStatus, data: Vec<u8>) -> Self {
        Self { status, data }
    }
}

impl ResponseBody for BinaryDataTransferResponse {
    fn from_result(result: &OcppResult) -> Self {
        let status = if result.is_ok() {
            DataTransferStatus::Accepted
        } else {
            DataTransferStatus::Rejected
        };
        Self {
            status,
            data: Vec::new(),
        }
    }
}
