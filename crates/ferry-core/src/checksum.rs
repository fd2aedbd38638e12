//! Chunk content checksums.
//!
//! MD5 is used for integrity only — corruption detection on a link
//! that already carries the data in cleartext — not for security.

/// Hex MD5 digest of a chunk's raw bytes.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

/// Compare data against an announced hex digest.
pub fn verify(data: &[u8], expected: &str) -> bool {
    // Digests come off the wire; compare case-insensitively.
    md5_hex(data).eq_ignore_ascii_case(expected)
}
