//! Chunked transfer engine — splitting, sending, receiving, and
//! reassembling file content, plus the retry/rate-limit policy.

pub mod limiter;
pub mod receive;
pub mod send;

pub use limiter::RateLimiter;
pub use receive::Reassembler;
