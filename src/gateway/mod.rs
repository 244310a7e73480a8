//! Transport gateway interface.
//!
//! A gateway splits a body into transport-sized parts and accepts a
//! multi-part send. Completion comes back later, out of order, as
//! [`TransportEvent`]s on the channel the gateway was built with; each event
//! echoes the [`CallbackToken`] registered for that part.

pub mod loopback;
pub mod segment;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GatewayError;

pub use loopback::{LoopbackGateway, LoopbackOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Sent,
    Delivered,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::Sent => write!(f, "sent"),
            ReportKind::Delivered => write!(f, "delivered"),
        }
    }
}

/// Correlation data handed to the gateway for one part of one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackToken {
    pub job_id: String,
    pub message_id: String,
    pub part: usize,
    pub kind: ReportKind,
}

impl CallbackToken {
    pub fn new(job_id: &str, message_id: &str, part: usize, kind: ReportKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            message_id: message_id.to_string(),
            part,
            kind,
        }
    }

    /// Sent and delivered token lists for a message split into `parts` segments.
    pub fn pairs_for(
        job_id: &str,
        message_id: &str,
        parts: usize,
    ) -> (Vec<CallbackToken>, Vec<CallbackToken>) {
        (0..parts)
            .map(|part| {
                (
                    Self::new(job_id, message_id, part, ReportKind::Sent),
                    Self::new(job_id, message_id, part, ReportKind::Delivered),
                )
            })
            .unzip()
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "smsrelay://{}/{}/{}/{}",
            self.kind, self.job_id, self.message_id, self.part
        )
    }
}

/// Result code reported with a transport event, using the platform's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    GenericFailure,
    RadioOff,
    NullPdu,
    NoService,
    Other(i32),
}

impl ResultCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => ResultCode::Ok,
            1 => ResultCode::GenericFailure,
            2 => ResultCode::RadioOff,
            3 => ResultCode::NullPdu,
            4 => ResultCode::NoService,
            other => ResultCode::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ResultCode::Ok => -1,
            ResultCode::GenericFailure => 1,
            ResultCode::RadioOff => 2,
            ResultCode::NullPdu => 3,
            ResultCode::NoService => 4,
            ResultCode::Other(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ResultCode::Ok
    }
}

/// An asynchronous completion signal from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub token: CallbackToken,
    pub result: ResultCode,
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Channel pairing a gateway (sink side) with the delivery tracker (stream side).
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait TransportGateway: Send + Sync {
    /// Split a body into the parts the transport will carry.
    fn segment(&self, body: &str) -> Vec<String>;

    /// Hand all parts of one message to the transport. `sent` and `delivered`
    /// hold one token per part. An error here is a synchronous fault; nothing
    /// was queued and no events will follow.
    async fn send_segments(
        &self,
        address: &str,
        parts: Vec<String>,
        sent: Vec<CallbackToken>,
        delivered: Vec<CallbackToken>,
    ) -> Result<(), GatewayError>;
}
