//! Protocol and scheduling constants, collected in one place so the
//! daemon and the tests agree on every timing and size.

use std::time::Duration;

/// Fixed chunk payload size. The last chunk of a file may be shorter.
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// Maximum serialized frame size. A 1 MiB chunk inflates to ~1.37 MiB
/// as base64 inside the JSON envelope; 4 MiB leaves headroom while
/// still bounding memory per frame.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// At most this many chunks of any file are in flight at once.
pub const MAX_CHUNKS_IN_FLIGHT: usize = 5;

/// Shared outbound budget across all concurrently sending chunks.
pub const RATE_LIMIT_BYTES_PER_SEC: u64 = 10 * 1024 * 1024; // 10 MiB/s

/// Transport-failure retries per chunk, with fixed backoff between.
pub const CHUNK_SEND_RETRIES: u32 = 5;
pub const CHUNK_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Retry-chunk requests the receiver will issue per chunk index before
/// giving up on that slot.
pub const CHUNK_RETRY_REQUESTS: u32 = 5;

/// Authentication handshake deadline, both sides.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Dial loop backoffs (peer mode).
pub const DIAL_BACKOFF: Duration = Duration::from_secs(3);
pub const AUTH_IO_BACKOFF: Duration = Duration::from_secs(5);
pub const REDIAL_DELAY: Duration = Duration::from_secs(1);

/// Heartbeat cadence (dialing side).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Watcher timings.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);
pub const WATCH_SETTLE: Duration = Duration::from_millis(100);

/// How long a just-materialized path stays in the suppression set.
pub const SUPPRESS_WINDOW: Duration = Duration::from_secs(2);

/// Access control: failures before a source is jailed, and for how long.
pub const JAIL_THRESHOLD: u32 = 5;
pub const JAIL_DURATION: Duration = Duration::from_secs(300);

/// Number of chunks needed to carry `total_size` bytes.
pub fn chunk_count(total_size: u64) -> u64 {
    total_size.div_ceil(CHUNK_SIZE as u64)
}
