//! A transport that never leaves the process.
//!
//! Accepts sends for well-formed addresses, records each one in a
//! [`MemoryTransportLog`] as completed, then reports sent/delivered events
//! on the event channel after a short delay. Delivery reports can be dropped
//! or emitted ahead of the sent reports to exercise the tracker and the
//! reconciliation pass.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, trace};

use super::{CallbackToken, EventSink, ResultCode, TransportEvent, TransportGateway, segment};
use crate::device_log::{LogRecord, LogStatus, MemoryTransportLog};
use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Never emit delivered events; only the device log learns about delivery.
    pub drop_delivery_reports: bool,
    /// Emit every delivered event before the sent events.
    pub delivered_before_sent: bool,
    pub report_delay: Duration,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            drop_delivery_reports: false,
            delivered_before_sent: false,
            report_delay: Duration::from_millis(20),
        }
    }
}

pub struct LoopbackGateway {
    events: EventSink,
    log: MemoryTransportLog,
    options: LoopbackOptions,
}

impl LoopbackGateway {
    pub fn new(events: EventSink, log: MemoryTransportLog, options: LoopbackOptions) -> Self {
        Self {
            events,
            log,
            options,
        }
    }
}

/// Digits with optional leading `+` and the usual separators.
pub fn validate_address(address: &str) -> Result<(), GatewayError> {
    let trimmed = address.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.');
    if body.chars().any(|c| c.is_ascii_digit()) && body.chars().all(allowed) {
        Ok(())
    } else {
        Err(GatewayError::InvalidAddress(address.to_string()))
    }
}

#[async_trait]
impl TransportGateway for LoopbackGateway {
    fn segment(&self, body: &str) -> Vec<String> {
        segment::split(body)
    }

    async fn send_segments(
        &self,
        address: &str,
        parts: Vec<String>,
        sent: Vec<CallbackToken>,
        delivered: Vec<CallbackToken>,
    ) -> Result<(), GatewayError> {
        validate_address(address)?;
        if parts.is_empty() {
            return Err(GatewayError::EmptyBody);
        }
        for tokens in [&sent, &delivered] {
            if tokens.len() != parts.len() {
                return Err(GatewayError::TokenMismatch {
                    parts: parts.len(),
                    tokens: tokens.len(),
                });
            }
        }

        self.log.append(LogRecord {
            address: address.to_string(),
            status: LogStatus::Complete,
            sent_at: Utc::now(),
        });
        debug!(address, parts = parts.len(), "loopback accepted message");

        let events = self.events.clone();
        let options = self.options.clone();
        tokio::spawn(async move {
            tokio::time::sleep(options.report_delay).await;
            let delivered = if options.drop_delivery_reports {
                Vec::new()
            } else {
                delivered
            };
            let ordered = if options.delivered_before_sent {
                delivered.into_iter().chain(sent)
            } else {
                sent.into_iter().chain(delivered)
            };
            for token in ordered {
                trace!(%token, "loopback report");
                let event = TransportEvent {
                    token,
                    result: ResultCode::Ok,
                };
                if events.send(event).is_err() {
                    debug!("event stream closed, dropping remaining reports");
                    break;
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_log::TransportLog;
    use crate::gateway::{ReportKind, event_channel};

    fn gateway(options: LoopbackOptions) -> (LoopbackGateway, crate::gateway::EventStream, MemoryTransportLog) {
        let (sink, stream) = event_channel();
        let log = MemoryTransportLog::new();
        let options = LoopbackOptions {
            report_delay: Duration::from_millis(1),
            ..options
        };
        (LoopbackGateway::new(sink, log.clone(), options), stream, log)
    }

    #[test]
    fn address_validation() {
        assert!(validate_address("+1 555 0100").is_ok());
        assert!(validate_address("(555) 010-0100").is_ok());
        assert!(validate_address("555").is_ok());
        assert!(validate_address("").is_err());
        assert!(validate_address("not-a-number").is_err());
        assert!(validate_address("+").is_err());
        assert!(validate_address("12+34").is_err());
    }

    #[tokio::test]
    async fn reports_sent_then_delivered() {
        let (gw, mut stream, log) = gateway(LoopbackOptions::default());
        let parts = gw.segment("hi");
        let (sent, delivered) = CallbackToken::pairs_for("j1", "m1", parts.len());
        gw.send_segments("555", parts, sent, delivered).await.unwrap();

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.token.kind, ReportKind::Sent);
        assert_eq!(second.token.kind, ReportKind::Delivered);
        assert!(second.result.is_ok());

        let records = log.query_recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, LogStatus::Complete);
    }

    #[tokio::test]
    async fn can_reorder_reports() {
        let (gw, mut stream, _) = gateway(LoopbackOptions {
            delivered_before_sent: true,
            ..Default::default()
        });
        let (sent, delivered) = CallbackToken::pairs_for("j1", "m1", 1);
        gw.send_segments("555", vec!["x".into()], sent, delivered)
            .await
            .unwrap();
        assert_eq!(stream.recv().await.unwrap().token.kind, ReportKind::Delivered);
        assert_eq!(stream.recv().await.unwrap().token.kind, ReportKind::Sent);
    }

    #[tokio::test]
    async fn dropped_delivery_reports_still_reach_the_log() {
        let (gw, mut stream, log) = gateway(LoopbackOptions {
            drop_delivery_reports: true,
            ..Default::default()
        });
        let (sent, delivered) = CallbackToken::pairs_for("j1", "m1", 2);
        gw.send_segments("555", vec!["a".into(), "b".into()], sent, delivered)
            .await
            .unwrap();
        assert_eq!(stream.recv().await.unwrap().token.part, 0);
        assert_eq!(stream.recv().await.unwrap().token.part, 1);
        drop(gw);
        assert!(stream.recv().await.is_none());
        assert_eq!(log.query_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_address_is_a_synchronous_fault() {
        let (gw, _stream, log) = gateway(LoopbackOptions::default());
        let (sent, delivered) = CallbackToken::pairs_for("j1", "m1", 1);
        let err = gw
            .send_segments("nobody", vec!["x".into()], sent, delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress(_)));
        assert!(log.query_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_count_must_match_parts() {
        let (gw, _stream, _) = gateway(LoopbackOptions::default());
        let (sent, delivered) = CallbackToken::pairs_for("j1", "m1", 1);
        let err = gw
            .send_segments("555", vec!["a".into(), "b".into()], sent, delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TokenMismatch { parts: 2, tokens: 1 }));
    }
}
