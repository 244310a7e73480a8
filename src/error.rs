use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed job {job_id}: {reason}")]
    MalformedJob { job_id: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Transport log error: {0}")]
    TransportLog(#[from] LogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures reported by a [`JobStore`](crate::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("transaction on job {job_id} gave up after {attempts} conflicting attempts")]
    Contention { job_id: String, attempts: u32 },

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("document encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Synchronous faults raised by a [`TransportGateway`](crate::gateway::TransportGateway)
/// while accepting a send request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid destination address {0:?}")]
    InvalidAddress(String),

    #[error("message body produced no segments")]
    EmptyBody,

    #[error("{parts} segments but {tokens} callback tokens")]
    TokenMismatch { parts: usize, tokens: usize },

    #[error("transport rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("transport log unreadable: {0}")]
    Unreadable(String),
}

/// How far a failure reaches, used to decide what gets marked and what gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// The job payload is unusable; the job is marked and skipped.
    Job,
    /// One message failed; its siblings continue.
    Message,
    /// Store or log hiccup; the operation is abandoned and left to reconciliation.
    Transient,
    /// The live job subscription reported a fault.
    Subscription,
    /// Local setup problem (configuration, files).
    Process,
}

impl std::fmt::Display for FailureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureScope::Job => write!(f, "job"),
            FailureScope::Message => write!(f, "message"),
            FailureScope::Transient => write!(f, "transient"),
            FailureScope::Subscription => write!(f, "subscription"),
            FailureScope::Process => write!(f, "process"),
        }
    }
}

impl RelayError {
    pub fn scope(&self) -> FailureScope {
        match self {
            RelayError::MalformedJob { .. } => FailureScope::Job,
            RelayError::Gateway(_) => FailureScope::Message,
            RelayError::Store(StoreError::Subscription(_)) => FailureScope::Subscription,
            RelayError::Store(_) | RelayError::TransportLog(_) => FailureScope::Transient,
            RelayError::Config(_)
            | RelayError::Io(_)
            | RelayError::Json(_)
            | RelayError::Toml(_) => FailureScope::Process,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_follows_error_taxonomy() {
        let malformed = RelayError::MalformedJob {
            job_id: "j1".into(),
            reason: "messages missing".into(),
        };
        assert_eq!(malformed.scope(), FailureScope::Job);

        let send = RelayError::from(GatewayError::InvalidAddress("abc".into()));
        assert_eq!(send.scope(), FailureScope::Message);

        let store = RelayError::from(StoreError::Unavailable("offline".into()));
        assert_eq!(store.scope(), FailureScope::Transient);

        let sub = RelayError::from(StoreError::Subscription("stream reset".into()));
        assert_eq!(sub.scope(), FailureScope::Subscription);

        assert_eq!(
            RelayError::Config("bad".into()).scope(),
            FailureScope::Process
        );
    }

    #[test]
    fn contention_display() {
        let err = StoreError::Contention {
            job_id: "j9".into(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "transaction on job j9 gave up after 5 conflicting attempts"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RelayError>();
        assert_send_sync::<StoreError>();
    }
}
