//! NotifyPeriodicEventStream: unacknowledged batches of monitoring samples

use serde::{Deserialize, Serialize};

use super::{JsonCodec, SendBody};

/// One sample: time offset in seconds from the batch base time, and value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDataElement {
    pub t: f64,
    pub v: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyPeriodicEventStream {
    /// Stream id
    pub id: u32,
    /// Samples still queued on the sender
    pub pending: u32,
    pub base_time: chrono::DateTime<chrono::Utc>,
    pub data: Vec<StreamDataElement>,
}

impl SendBody for NotifyPeriodicEventStream {
    const ACTION: &'static str = "NotifyPeriodicEventStream";
    type Codec = JsonCodec;

    fn validate(&self) -> Result<(), String> {
        if self.data.is_empty() {
            return Err("data must contain at least one element".to_string());
        }
        Ok(())
    }
}
