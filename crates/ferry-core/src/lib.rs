//! ferry-core — wire protocol, configuration, and checksum primitives.
//! The daemon crate depends on this one.

pub mod checksum;
pub mod config;
pub mod limits;
pub mod wire;

pub use wire::{AuthStatus, Message};
