//! ferryd — one-to-one peer folder synchronization daemon.
//!
//! Exposed as a library so the integration tests can drive host and
//! peer nodes in-process over loopback sockets.

pub mod channel;
pub mod commands;
pub mod connection;
pub mod guard;
pub mod heartbeat;
pub mod session;
pub mod suppress;
pub mod transfer;
pub mod watcher;
