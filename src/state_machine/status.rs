use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a job document.
///
/// `pending → processing → completed`, or `pending → processing → error_malformed_data`
/// when the payload cannot be expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    ErrorMalformedData,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::ErrorMalformedData => "error_malformed_data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "error_malformed_data" => Some(JobStatus::ErrorMalformedData),
            _ => None,
        }
    }

    /// True once nothing in this engine will touch the job again.
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::ErrorMalformedData)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a single logical message.
///
/// Ordered `pending < sent < delivered`; the two error states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Older job documents use `sending` for freshly expanded messages.
    #[serde(alias = "sending")]
    Pending,
    Sent,
    Delivered,
    ErrorSendingFailed,
    ErrorNotSent,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::ErrorSendingFailed => "error_sending_failed",
            MessageStatus::ErrorNotSent => "error_not_sent",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            MessageStatus::ErrorSendingFailed | MessageStatus::ErrorNotSent
        )
    }

    /// `delivered` or any `error_*`.
    pub fn is_terminal(&self) -> bool {
        *self == MessageStatus::Delivered || self.is_error()
    }

    /// Whether the message counts as done for job completion.
    ///
    /// With delivery reports ignored, `sent` is as far as a message ever gets.
    pub fn is_settled(&self, ignore_delivery_reports: bool) -> bool {
        self.is_terminal() || (ignore_delivery_reports && *self == MessageStatus::Sent)
    }

    // Position on the pending < sent < delivered chain. Errors sit beside it.
    fn rank(&self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::ErrorSendingFailed | MessageStatus::ErrorNotSent => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of asking the status machine for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move the message to the given status.
    Advance(MessageStatus),
    /// Requested status equals the current one.
    Unchanged,
    /// The request would move the message backwards or out of a terminal state.
    Rejected {
        current: MessageStatus,
        requested: MessageStatus,
    },
}

impl Transition {
    pub fn is_advance(&self) -> bool {
        matches!(self, Transition::Advance(_))
    }
}

/// Applies the monotonic status rule. Stateless; every writer goes through [`StatusMachine::next`].
pub struct StatusMachine;

impl StatusMachine {
    /// Compute the transition from `current` when an event asks for `requested`.
    ///
    /// - Along `pending < sent < delivered` only forward moves are accepted.
    /// - Any non-delivered status may move to an `error_*` status.
    /// - `delivered` accepts nothing.
    /// - An `error_*` status only accepts `delivered`, which is authoritative
    ///   evidence that the message reached the handset after all.
    pub fn next(current: MessageStatus, requested: MessageStatus) -> Transition {
        if current == requested {
            return Transition::Unchanged;
        }
        let accepted = match (current.rank(), requested.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => current != MessageStatus::Delivered,
            (None, Some(_)) => requested == MessageStatus::Delivered,
            (None, None) => false,
        };
        if accepted {
            Transition::Advance(requested)
        } else {
            Transition::Rejected { current, requested }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessageStatus::*;

    #[test]
    fn forward_moves_are_accepted() {
        assert_eq!(StatusMachine::next(Pending, Sent), Transition::Advance(Sent));
        assert_eq!(
            StatusMachine::next(Pending, Delivered),
            Transition::Advance(Delivered)
        );
        assert_eq!(
            StatusMachine::next(Sent, Delivered),
            Transition::Advance(Delivered)
        );
    }

    #[test]
    fn delivered_never_regresses() {
        for requested in [Pending, Sent, ErrorNotSent, ErrorSendingFailed] {
            assert_eq!(
                StatusMachine::next(Delivered, requested),
                Transition::Rejected {
                    current: Delivered,
                    requested
                }
            );
        }
    }

    #[test]
    fn sent_does_not_fall_back_to_pending() {
        assert!(!StatusMachine::next(Sent, Pending).is_advance());
    }

    #[test]
    fn same_status_is_unchanged() {
        assert_eq!(StatusMachine::next(Delivered, Delivered), Transition::Unchanged);
        assert_eq!(StatusMachine::next(Sent, Sent), Transition::Unchanged);
    }

    #[test]
    fn errors_reachable_from_non_delivered() {
        assert!(StatusMachine::next(Pending, ErrorSendingFailed).is_advance());
        assert!(StatusMachine::next(Sent, ErrorNotSent).is_advance());
    }

    #[test]
    fn errors_are_terminal_except_for_delivery() {
        assert!(!StatusMachine::next(ErrorNotSent, Sent).is_advance());
        assert!(!StatusMachine::next(ErrorNotSent, ErrorSendingFailed).is_advance());
        assert!(!StatusMachine::next(ErrorSendingFailed, Pending).is_advance());
        assert_eq!(
            StatusMachine::next(ErrorNotSent, Delivered),
            Transition::Advance(Delivered)
        );
    }

    #[test]
    fn settled_depends_on_delivery_report_policy() {
        assert!(!Sent.is_settled(false));
        assert!(Sent.is_settled(true));
        assert!(Delivered.is_settled(false));
        assert!(ErrorNotSent.is_settled(false));
        assert!(!Pending.is_settled(true));
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorSendingFailed).unwrap(),
            r#""error_sending_failed""#
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::ErrorMalformedData).unwrap(),
            r#""error_malformed_data""#
        );
        let legacy: MessageStatus = serde_json::from_str(r#""sending""#).unwrap();
        assert_eq!(legacy, Pending);
        assert_eq!(JobStatus::parse("processing"), Some(JobStatus::Processing));
        assert_eq!(JobStatus::parse("archived"), None);
    }
}
