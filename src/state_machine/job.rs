use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::{JobStatus, MessageStatus};

/// The only content transformation applied before transmission.
pub const LINE_SEPARATOR: char = '&';

/// One entry of a job's `messages` array as written by the job producer,
/// before this engine expands it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub phone: String,
    pub message: String,
    #[serde(default)]
    pub person: Option<Value>,
    #[serde(default)]
    pub case_number: Option<Value>,
}

impl RawMessage {
    /// Parse the raw `messages` field of a job document.
    ///
    /// Absent, non-array, or entries without string `phone`/`message` make the
    /// whole job malformed.
    pub fn parse_list(raw: Option<&Value>) -> Result<Vec<RawMessage>, String> {
        let raw = raw.ok_or_else(|| "messages field is missing".to_string())?;
        if !raw.is_array() {
            return Err(format!("messages field is not a list: {raw}"));
        }
        serde_json::from_value(raw.clone()).map_err(|e| format!("bad message entry: {e}"))
    }
}

/// An expanded message as stored in the job document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub phone: String,
    #[serde(rename = "message")]
    pub body: String,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_number: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Fields written by other tools; carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Deterministic id: dispatch time in milliseconds plus position in the job.
    pub fn make_id(dispatch_millis: i64, index: usize) -> String {
        format!("msg_{dispatch_millis}_{index}")
    }

    /// Build the stored form of a raw entry at claim time.
    pub fn expand(
        raw: &RawMessage,
        dispatch_millis: i64,
        index: usize,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: Self::make_id(dispatch_millis, index),
            phone: raw.phone.clone(),
            body: raw.message.clone(),
            status,
            person: raw.person.clone(),
            case_number: raw.case_number.clone(),
            sent_at: None,
            delivered_at: None,
            extra: Map::new(),
        }
    }

    /// Body as handed to the transport.
    pub fn outbound_body(&self) -> String {
        self.body.replace(LINE_SEPARATOR, "\n")
    }

    /// Record the timestamp belonging to `status`. Existing stamps are kept.
    pub fn stamp(&mut self, status: MessageStatus, at: DateTime<Utc>) {
        match status {
            MessageStatus::Sent => {
                self.sent_at.get_or_insert(at);
            }
            MessageStatus::Delivered => {
                self.delivered_at.get_or_insert(at);
            }
            _ => {}
        }
    }
}

/// True when every message is settled under the given delivery-report policy.
/// An empty list counts as settled.
pub fn all_settled(messages: &[Message], ignore_delivery_reports: bool) -> bool {
    messages
        .iter()
        .all(|m| m.status.is_settled(ignore_delivery_reports))
}

/// Per-status counts for one job, used by the CLI summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub total: usize,
    pub pending: usize,
    pub sent: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl JobSummary {
    pub fn new(job_id: &str, status: Option<JobStatus>, messages: &[Message]) -> Self {
        let count = |pred: fn(&MessageStatus) -> bool| {
            messages.iter().filter(|m| pred(&m.status)).count()
        };
        Self {
            job_id: job_id.to_string(),
            status,
            total: messages.len(),
            pending: count(|s| *s == MessageStatus::Pending),
            sent: count(|s| *s == MessageStatus::Sent),
            delivered: count(|s| *s == MessageStatus::Delivered),
            failed: count(MessageStatus::is_error),
        }
    }
}
