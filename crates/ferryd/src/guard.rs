//! Access control — per-source failure counting and temporary jail.
//!
//! Every failed allow-list check or password attempt counts against
//! the source address. At the threshold the source is jailed: further
//! connections are rejected before any handshake until the jail
//! expires. A successful authentication clears the counter.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ferry_core::limits::{JAIL_DURATION, JAIL_THRESHOLD};

#[derive(Debug, Clone, Copy)]
struct AccessEntry {
    failures: u32,
    jailed_until: Option<Instant>,
}

/// Registry of misbehaving sources.
pub struct AccessGuard {
    entries: Arc<DashMap<IpAddr, AccessEntry>>,
    threshold: u32,
    jail_duration: Duration,
}

impl Default for AccessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGuard {
    pub fn new() -> Self {
        Self::with_policy(JAIL_THRESHOLD, JAIL_DURATION)
    }

    /// Custom threshold/duration, used by tests.
    pub fn with_policy(threshold: u32, jail_duration: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            threshold,
            jail_duration,
        }
    }

    /// Whether the source is currently jailed. An expired jail is
    /// released (and its counter reset) by this lookup.
    pub fn is_jailed(&self, source: IpAddr) -> bool {
        let Some(mut entry) = self.entries.get_mut(&source) else {
            return false;
        };
        match entry.jailed_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                entry.failures = 0;
                entry.jailed_until = None;
                tracing::info!(%source, "jail expired, source released");
                false
            }
            None => false,
        }
    }

    /// Count one failed attempt. Returns true if this failure tripped
    /// the threshold and the source is now jailed.
    pub fn record_failure(&self, source: IpAddr) -> bool {
        let mut entry = self.entries.entry(source).or_insert(AccessEntry {
            failures: 0,
            jailed_until: None,
        });
        entry.failures += 1;
        if entry.failures >= self.threshold {
            entry.jailed_until = Some(Instant::now() + self.jail_duration);
            tracing::warn!(
                %source,
                failures = entry.failures,
                jail_secs = self.jail_duration.as_secs(),
                "source jailed after repeated failures"
            );
            true
        } else {
            tracing::info!(%source, failures = entry.failures, "access failure recorded");
            false
        }
    }

    /// Reset the counter after a successful authentication.
    pub fn clear(&self, source: IpAddr) {
        self.entries.remove(&source);
    }
}

impl Clone for AccessGuard {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            threshold: self.threshold,
            jail_duration: self.jail_duration,
        }
    }
}
