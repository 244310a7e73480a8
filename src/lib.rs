//! SMS job dispatch and delivery reconciliation.
//!
//! Jobs arrive in a remote document store as `pending` batches of messages.
//! The [`watcher`] claims them one at a time, the [`dispatcher`] expands and
//! sends their messages, the [`tracker`] applies transport reports, and the
//! [`syncer`] periodically recovers lost delivery reports from the device's
//! own outgoing log. All state lives in the store; every status write goes
//! through a store transaction and the monotonic rule in [`state_machine`].

pub mod config;
pub mod device_log;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod seed;
pub mod state_machine;
pub mod store;
pub mod syncer;
pub mod tracker;
pub mod watcher;

#[cfg(test)]
mod test_support;
