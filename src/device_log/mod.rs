//! The device's own record of outgoing messages.
//!
//! Only address and a coarse status are known here, never the job or message
//! id, so reconciliation joins on address. Records come back newest first.

pub mod address;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LogError;

pub use address::{AddressMatcher, ExactDigitsMatcher, LooseNumberMatcher};

/// Status column of an outgoing log record, in the platform's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    None,
    Complete,
    Pending,
    Failed,
}

impl LogStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => LogStatus::Complete,
            32 => LogStatus::Pending,
            64 => LogStatus::Failed,
            _ => LogStatus::None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            LogStatus::None => -1,
            LogStatus::Complete => 0,
            LogStatus::Pending => 32,
            LogStatus::Failed => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub address: String,
    pub status: LogStatus,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait TransportLog: Send + Sync {
    /// Up to `limit` records, newest first.
    async fn query_recent(&self, limit: usize) -> Result<Vec<LogRecord>, LogError>;
}

/// Keep the newest record per exact address, preserving newest-first order.
pub fn latest_per_address(records: Vec<LogRecord>) -> Vec<LogRecord> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.address.clone()))
        .collect()
}

#[derive(Clone, Default)]
pub struct MemoryTransportLog {
    inner: Arc<Mutex<LogState>>,
}

#[derive(Default)]
struct LogState {
    records: Vec<LogRecord>,
    unreadable: bool,
}

impl MemoryTransportLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, record: LogRecord) {
        self.lock().records.push(record);
    }

    pub fn set_unreadable(&self, unreadable: bool) {
        self.lock().unreadable = unreadable;
    }
}

#[async_trait]
impl TransportLog for MemoryTransportLog {
    async fn query_recent(&self, limit: usize) -> Result<Vec<LogRecord>, LogError> {
        let state = self.lock();
        if state.unreadable {
            return Err(LogError::Unreadable("read permission revoked".into()));
        }
        let mut records = state.records.clone();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        records.truncate(limit);
        Ok(records)
    }
}
