//! Checksums over sealed bytes

use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of `bytes`
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `bytes` hash to `expected`
pub fn verify(bytes: &[u8], expected: &str) -> bool {
    checksum(bytes).eq_ignore_ascii_case(expected)
}
