//! Helpers shared by the async test modules.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::gateway::{CallbackToken, TransportGateway, segment};

/// Poll `check` until it holds, panicking after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Accepts every send and remembers the address and parts; emits no reports.
#[derive(Default)]
pub struct SilentGateway {
    pub sends: Mutex<Vec<(String, Vec<String>)>>,
}

impl SilentGateway {
    pub fn sends(&self) -> Vec<(String, Vec<String>)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportGateway for SilentGateway {
    fn segment(&self, body: &str) -> Vec<String> {
        segment::split(body)
    }

    async fn send_segments(
        &self,
        address: &str,
        parts: Vec<String>,
        _sent: Vec<CallbackToken>,
        _delivered: Vec<CallbackToken>,
    ) -> Result<(), GatewayError> {
        self.sends.lock().unwrap().push((address.to_string(), parts));
        Ok(())
    }
}
