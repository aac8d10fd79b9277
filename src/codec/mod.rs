//! Snapshot codec
//!
//! Turns a [`Snapshot`] into canonical bytes and back, with optional
//! compression. Every encoded payload starts with a one-byte tag naming the
//! compression format, so old payloads stay readable when new compressors
//! are added:
//!
//! - `0x00`: uncompressed canonical JSON
//! - `0x01`: zstd
//! - `0x02`: dictionary-coder v1 (see [`dictionary`])
//!
//! zstd is preferred. If it fails, the dictionary coder is tried, and if that
//! fails as well the canonical bytes are stored uncompressed. Compression
//! problems never fail a backup.

pub mod dictionary;

use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SnapkeepError, SnapkeepResult};
use crate::snapshot::Snapshot;

const TAG_NONE: u8 = 0x00;
const TAG_ZSTD: u8 = 0x01;
const TAG_DICTIONARY_V1: u8 = 0x02;

/// Maximum decompressed size (256 MiB), a guard against decompression bombs
const MAX_DECOMPRESS_SIZE: u64 = 256 * 1024 * 1024;

/// Deepest snapshot nesting that can be restored again
pub const MAX_SNAPSHOT_DEPTH: usize = 100;

/// Compression format actually applied to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Zstd,
    DictionaryV1,
}

impl CompressionAlgorithm {
    /// Frame tag written in front of the payload
    pub fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::None => TAG_NONE,
            CompressionAlgorithm::Zstd => TAG_ZSTD,
            CompressionAlgorithm::DictionaryV1 => TAG_DICTIONARY_V1,
        }
    }

    /// Look up the format for a frame tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_NONE => Some(CompressionAlgorithm::None),
            TAG_ZSTD => Some(CompressionAlgorithm::Zstd),
            TAG_DICTIONARY_V1 => Some(CompressionAlgorithm::DictionaryV1),
            _ => None,
        }
    }

    /// Whether this format actually compresses
    pub fn is_compressed(self) -> bool {
        self != CompressionAlgorithm::None
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::DictionaryV1 => write!(f, "dictionary-v1"),
        }
    }
}

/// Configured compressor preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPreference {
    /// zstd, falling back to the dictionary coder
    #[default]
    Zstd,
    /// The dictionary coder only
    Dictionary,
}

/// Output of [`Codec::encode`]
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Tagged frame bytes
    pub bytes: Vec<u8>,
    /// Format recorded in the tag
    pub compression: CompressionAlgorithm,
}

impl Encoded {
    /// Whether compression was applied
    pub fn compressed(&self) -> bool {
        self.compression.is_compressed()
    }
}

/// Snapshot serializer and compressor
#[derive(Debug, Clone)]
pub struct Codec {
    enabled: bool,
    preference: CompressionPreference,
    zstd_level: i32,
    input_limit: u64,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(true, CompressionPreference::Zstd, 3)
    }
}

impl Codec {
    /// Create a new Codec
    pub fn new(enabled: bool, preference: CompressionPreference, zstd_level: i32) -> Self {
        Self {
            enabled,
            preference,
            zstd_level,
            input_limit: MAX_DECOMPRESS_SIZE,
        }
    }

    /// Lower the largest input either compressor accepts
    #[cfg(test)]
    pub(crate) fn with_input_limit(mut self, limit: u64) -> Self {
        self.input_limit = limit;
        self
    }

    /// Codec that never compresses
    pub fn uncompressed() -> Self {
        Self::new(false, CompressionPreference::Zstd, 0)
    }

    /// Serialize and compress a snapshot
    pub fn encode(&self, snapshot: &Snapshot) -> SnapkeepResult<Encoded> {
        let depth = snapshot.depth();
        if depth > MAX_SNAPSHOT_DEPTH {
            return Err(SnapkeepError::Codec(format!(
                "Snapshot nesting depth {} exceeds the limit of {}",
                depth, MAX_SNAPSHOT_DEPTH
            )));
        }

        let canonical = snapshot.to_canonical_bytes()?;

        if !self.enabled {
            return Ok(frame(CompressionAlgorithm::None, &canonical));
        }

        if self.preference == CompressionPreference::Zstd {
            match try_zstd(&canonical, self.zstd_level, self.input_limit) {
                Ok(body) => return Ok(frame(CompressionAlgorithm::Zstd, &body)),
                Err(e) => warn!(error = %e, "zstd compression failed, falling back to dictionary coder"),
            }
        }

        match try_dictionary(&canonical, self.input_limit) {
            Ok(body) => Ok(frame(CompressionAlgorithm::DictionaryV1, &body)),
            Err(e) => {
                warn!(error = %e, "dictionary compression failed, storing uncompressed");
                Ok(frame(CompressionAlgorithm::None, &canonical))
            }
        }
    }

    /// Decompress and deserialize a payload
    ///
    /// `compressed` is the flag stored with the record; a frame whose tag
    /// disagrees with it is rejected.
    pub fn decode(&self, bytes: &[u8], compressed: bool) -> SnapkeepResult<Snapshot> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| SnapkeepError::Codec("Empty payload".to_string()))?;

        let algorithm = CompressionAlgorithm::from_tag(tag)
            .ok_or_else(|| SnapkeepError::Codec(format!("Unknown compression tag: {:#04x}", tag)))?;

        if algorithm.is_compressed() != compressed {
            return Err(SnapkeepError::Codec(format!(
                "Compressed flag ({}) disagrees with payload format ({})",
                compressed, algorithm
            )));
        }

        let canonical = match algorithm {
            CompressionAlgorithm::None => body.to_vec(),
            CompressionAlgorithm::Zstd => decompress_zstd(body)?,
            CompressionAlgorithm::DictionaryV1 => dictionary::decompress(body, MAX_DECOMPRESS_SIZE)
                .map_err(|e| SnapkeepError::Codec(format!("dictionary-v1: {}", e)))?,
        };

        Snapshot::from_canonical_bytes(&canonical)
    }
}

fn frame(algorithm: CompressionAlgorithm, body: &[u8]) -> Encoded {
    let mut bytes = Vec::with_capacity(1 + body.len());
    bytes.push(algorithm.tag());
    bytes.extend_from_slice(body);
    Encoded {
        bytes,
        compression: algorithm,
    }
}

fn check_input_size(canonical: &[u8], limit: u64) -> Result<(), String> {
    if canonical.len() as u64 > limit {
        return Err(format!(
            "input of {} bytes exceeds the {} byte limit",
            canonical.len(),
            limit
        ));
    }
    Ok(())
}

fn try_zstd(canonical: &[u8], level: i32, limit: u64) -> Result<Vec<u8>, String> {
    check_input_size(canonical, limit)?;
    zstd::bulk::compress(canonical, level).map_err(|e| e.to_string())
}

fn try_dictionary(canonical: &[u8], limit: u64) -> Result<Vec<u8>, String> {
    check_input_size(canonical, limit)?;
    Ok(dictionary::compress(canonical))
}

fn decompress_zstd(body: &[u8]) -> SnapkeepResult<Vec<u8>> {
    let mut decoder = zstd::stream::Decoder::new(std::io::Cursor::new(body))
        .map_err(|e| SnapkeepError::Codec(format!("zstd init: {}", e)))?;

    let mut output = Vec::new();
    decoder
        .by_ref()
        .take(MAX_DECOMPRESS_SIZE + 1)
        .read_to_end(&mut output)
        .map_err(|e| SnapkeepError::Codec(format!("zstd: {}", e)))?;

    if output.len() as u64 > MAX_DECOMPRESS_SIZE {
        return Err(SnapkeepError::Codec(format!(
            "zstd: decompressed size exceeds limit of {} bytes",
            MAX_DECOMPRESS_SIZE
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_shapes() -> Vec<Snapshot> {
        let mut deep = json!("leaf");
        for i in 0..40 {
            deep = json!({ format!("level{}", i): [deep] });
        }

        vec![
            Snapshot::empty(),
            Snapshot::new(json!(null)),
            Snapshot::new(json!({"user": "ada", "count": 3, "ratio": 0.25, "on": true})),
            Snapshot::new(deep),
            Snapshot::new(json!({
                "reserved": "\"quotes\" \\backslash\\ \u{0000} \n\t {}[]:, \u{1F600}",
                "keys with spaces": {"": ""},
                "numbers": [0, -1, 1.5e300, 18446744073709551615u64],
            })),
        ]
    }

    #[test]
    fn test_round_trip_every_algorithm() {
        let codecs = [
            Codec::default(),
            Codec::new(true, CompressionPreference::Dictionary, 0),
            Codec::uncompressed(),
        ];

        for codec in &codecs {
            for snapshot in sample_shapes() {
                let encoded = codec.encode(&snapshot).unwrap();
                let decoded = codec.decode(&encoded.bytes, encoded.compressed()).unwrap();
                assert_eq!(decoded, snapshot);
            }
        }
    }

    #[test]
    fn test_algorithm_selection() {
        let snapshot = Snapshot::new(json!({"a": 1}));

        let zstd = Codec::default().encode(&snapshot).unwrap();
        assert_eq!(zstd.compression, CompressionAlgorithm::Zstd);
        assert_eq!(zstd.bytes[0], TAG_ZSTD);

        let dict = Codec::new(true, CompressionPreference::Dictionary, 0)
            .encode(&snapshot)
            .unwrap();
        assert_eq!(dict.compression, CompressionAlgorithm::DictionaryV1);

        let plain = Codec::uncompressed().encode(&snapshot).unwrap();
        assert_eq!(plain.compression, CompressionAlgorithm::None);
        assert!(!plain.compressed());
        assert_eq!(&plain.bytes[1..], br#"{"a":1}"#);
    }

    #[test]
    fn test_decode_is_independent_of_encoder_preference() {
        let snapshot = Snapshot::new(json!({"list": [1, 2, 3], "nested": {"x": "y"}}));
        let encoded = Codec::new(true, CompressionPreference::Dictionary, 0)
            .encode(&snapshot)
            .unwrap();

        // A codec configured for zstd still reads dictionary frames
        let decoded = Codec::default().decode(&encoded.bytes, true).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_canonical_encoding_is_key_order_independent() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        let codec = Codec::uncompressed();
        assert_eq!(
            codec.encode(&Snapshot::new(a)).unwrap().bytes,
            codec.encode(&Snapshot::new(b)).unwrap().bytes
        );
    }

    #[test]
    fn test_flag_mismatch_is_an_error() {
        let snapshot = Snapshot::new(json!({"a": 1}));
        let codec = Codec::default();

        let compressed = codec.encode(&snapshot).unwrap();
        let err = codec.decode(&compressed.bytes, false).unwrap_err();
        assert!(matches!(err, SnapkeepError::Codec(_)));

        let plain = Codec::uncompressed().encode(&snapshot).unwrap();
        assert!(codec.decode(&plain.bytes, true).is_err());
    }

    #[test]
    fn test_unknown_tag_and_empty_payload() {
        let codec = Codec::default();
        assert!(codec.decode(&[], false).is_err());
        assert!(codec.decode(&[0x7f, 1, 2, 3], true).is_err());
    }

    #[test]
    fn test_corrupted_zstd_body_is_an_error() {
        let codec = Codec::default();
        let mut encoded = codec
            .encode(&Snapshot::new(json!({"payload": "x".repeat(512)})))
            .unwrap();
        let last = encoded.bytes.len() - 1;
        encoded.bytes.truncate(last / 2);
        assert!(codec.decode(&encoded.bytes, true).is_err());
    }

    #[test]
    fn test_oversize_input_is_stored_uncompressed() {
        let snapshot = Snapshot::new(json!({"payload": "x".repeat(256)}));

        for preference in [CompressionPreference::Zstd, CompressionPreference::Dictionary] {
            let codec = Codec::new(true, preference, 3).with_input_limit(16);
            let encoded = codec.encode(&snapshot).unwrap();
            assert_eq!(encoded.compression, CompressionAlgorithm::None);
            assert!(!encoded.compressed());
            assert_eq!(encoded.bytes[0], TAG_NONE);

            let decoded = codec.decode(&encoded.bytes, false).unwrap();
            assert_eq!(decoded, snapshot);
        }
    }

    #[test]
    fn test_input_limit_at_boundary_still_compresses() {
        let snapshot = Snapshot::new(json!({"a": 1}));
        let len = snapshot.to_canonical_bytes().unwrap().len() as u64;

        let encoded = Codec::default().with_input_limit(len).encode(&snapshot).unwrap();
        assert_eq!(encoded.compression, CompressionAlgorithm::Zstd);

        let encoded = Codec::default()
            .with_input_limit(len - 1)
            .encode(&snapshot)
            .unwrap();
        assert_eq!(encoded.compression, CompressionAlgorithm::None);
    }

    #[test]
    fn test_rejects_snapshots_too_deep_to_restore() {
        let mut deep = json!(0);
        for _ in 0..(MAX_SNAPSHOT_DEPTH + 1) {
            deep = json!([deep]);
        }
        let err = Codec::default().encode(&Snapshot::new(deep)).unwrap_err();
        assert!(matches!(err, SnapkeepError::Codec(_)));
    }
}
