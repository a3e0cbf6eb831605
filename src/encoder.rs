//! Reversible payload transforms.
//!
//! An [`EncoderChain`] is an ordered list of [`Encoder`] stages applied to
//! every frame payload: `encode` runs the stages in list order, `decode`
//! runs them in reverse order, so `decode(encode(x)) == x` for any chain.
//! Chains are built from the `packet.encoders` configuration list by
//! [`build_chain`]; the only built-in stage is zlib compression.

use crate::config::EncoderSpec;
use crate::error::{Result, TunError};
use flate2::write::{ZlibDecoder, ZlibEncoder as ZlibCompressor};
use flate2::Compression;
use std::io::Write;

/// A named, reversible byte transform.
///
/// Implementations must be stateless across calls: every `encode` and
/// `decode` operates on one complete payload, and the two pump tasks of a
/// session invoke them concurrently through a shared chain.
pub trait Encoder: Send + Sync {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Zlib compression stage.
pub struct ZlibEncoder {
    level: Compression,
}

impl ZlibEncoder {
    /// Compression level used when the configuration does not name one.
    pub const DEFAULT_LEVEL: u32 = 6;

    /// Build from the stage's configuration options.
    ///
    /// Recognizes one option, `level` (integer 0-9, default 6). A missing
    /// level is fine; a mistyped or out-of-range one is a configuration
    /// error.
    pub fn from_options(options: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let level = match options.get("level") {
            None => Self::DEFAULT_LEVEL,
            Some(value) => match value.as_u64() {
                Some(level) if level <= 9 => level as u32,
                Some(level) => {
                    return Err(TunError::encoder_config(
                        "zlib",
                        format!("level {level} out of range (0-9)"),
                    ))
                }
                None => {
                    return Err(TunError::encoder_config(
                        "zlib",
                        format!("level invalid type (integer desired, got {value})"),
                    ))
                }
            },
        };
        Ok(Self {
            level: Compression::new(level),
        })
    }
}

impl Encoder for ZlibEncoder {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut compressor = ZlibCompressor::new(Vec::new(), self.level);
        compressor
            .write_all(data)
            .and_then(|_| compressor.finish())
            .map_err(|e| TunError::Encode(format!("zlib: {e}")))
    }

    // Strict: a truncated or corrupted stream is an error, never a partial
    // result. Encode finalizes the stream, so a well-formed peer always
    // produces input that decodes cleanly.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decompressor = ZlibDecoder::new(Vec::new());
        decompressor
            .write_all(data)
            .and_then(|_| decompressor.finish())
            .map_err(|e| TunError::Decode(format!("zlib: {e}")))
    }
}

/// Ordered pipeline of encoder stages shared by a session's two pumps.
pub struct EncoderChain {
    stages: Vec<Box<dyn Encoder>>,
}

impl std::fmt::Debug for EncoderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl EncoderChain {
    /// A chain with no stages; payloads pass through unchanged.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Apply every stage's `encode` in list order.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for stage in &self.stages {
            buf = stage.encode(&buf)?;
        }
        Ok(buf)
    }

    /// Apply every stage's `decode` in reverse list order.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for stage in self.stages.iter().rev() {
            buf = stage.decode(&buf)?;
        }
        Ok(buf)
    }
}

/// Construct an encoder chain from the configured stage list.
///
/// Stage names resolve through an explicit factory rather than any global
/// registry; an unrecognized name fails construction at startup.
pub fn build_chain(specs: &[EncoderSpec]) -> Result<EncoderChain> {
    let mut stages: Vec<Box<dyn Encoder>> = Vec::with_capacity(specs.len());
    for spec in specs {
        let stage: Box<dyn Encoder> = match spec.name.as_str() {
            "zlib" => Box::new(ZlibEncoder::from_options(&spec.options)?),
            other => return Err(TunError::UnknownEncoder(other.to_string())),
        };
        stages.push(stage);
    }
    Ok(EncoderChain { stages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, options: serde_json::Value) -> EncoderSpec {
        let serde_json::Value::Object(options) = options else {
            panic!("options must be an object");
        };
        EncoderSpec {
            name: name.to_string(),
            options,
        }
    }

    /// Stage that prepends a marker byte; decode checks and strips it.
    /// Lets the chain tests observe application order.
    struct MarkerEncoder(u8);

    impl Encoder for MarkerEncoder {
        fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(self.0);
            out.extend_from_slice(data);
            Ok(out)
        }

        fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
            match data.split_first() {
                Some((first, rest)) if *first == self.0 => Ok(rest.to_vec()),
                _ => Err(TunError::Decode(format!("missing marker {}", self.0))),
            }
        }
    }

    #[test]
    fn test_zlib_roundtrip() {
        let encoder = ZlibEncoder::from_options(&serde_json::Map::new()).unwrap();
        for payload in [&b""[..], b"x", b"hello hello hello hello", &[0u8; 4096]] {
            let encoded = encoder.encode(payload).unwrap();
            assert_eq!(encoder.decode(&encoded).unwrap(), payload);
        }
    }

    #[test]
    fn test_zlib_rejects_truncated_stream() {
        let encoder = ZlibEncoder::from_options(&serde_json::Map::new()).unwrap();
        let encoded = encoder.encode(b"some payload that compresses").unwrap();
        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(
            encoder.decode(truncated),
            Err(TunError::Decode(_))
        ));
    }

    #[test]
    fn test_zlib_rejects_garbage() {
        let encoder = ZlibEncoder::from_options(&serde_json::Map::new()).unwrap();
        assert!(matches!(
            encoder.decode(b"\xff\xfe not zlib"),
            Err(TunError::Decode(_))
        ));
    }

    #[test]
    fn test_zlib_level_validation() {
        let ok = spec("zlib", json!({"level": 9}));
        assert!(ZlibEncoder::from_options(&ok.options).is_ok());

        let out_of_range = spec("zlib", json!({"level": 12}));
        assert!(matches!(
            ZlibEncoder::from_options(&out_of_range.options),
            Err(TunError::EncoderConfig { .. })
        ));

        let mistyped = spec("zlib", json!({"level": "fast"}));
        assert!(matches!(
            ZlibEncoder::from_options(&mistyped.options),
            Err(TunError::EncoderConfig { .. })
        ));
    }

    #[test]
    fn test_build_chain_unknown_name() {
        let err = build_chain(&[spec("rot13", json!({}))]).unwrap_err();
        assert!(matches!(err, TunError::UnknownEncoder(name) if name == "rot13"));
    }

    #[test]
    fn test_chain_decode_runs_in_reverse_order() {
        let chain = EncoderChain {
            stages: vec![Box::new(MarkerEncoder(b'a')), Box::new(MarkerEncoder(b'b'))],
        };
        let encoded = chain.encode(b"payload").unwrap();
        // Last stage's marker is outermost.
        assert_eq!(encoded[0], b'b');
        assert_eq!(encoded[1], b'a');
        assert_eq!(chain.decode(&encoded).unwrap(), b"payload");
    }

    #[test]
    fn test_chain_roundtrip_with_compression() {
        let chain = build_chain(&[spec("zlib", json!({"level": 1})), spec("zlib", json!({}))])
            .unwrap();
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let encoded = chain.encode(&payload).unwrap();
        assert_eq!(chain.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = EncoderChain::empty();
        assert_eq!(chain.encode(b"abc").unwrap(), b"abc");
        assert_eq!(chain.decode(b"abc").unwrap(), b"abc");
    }
}
