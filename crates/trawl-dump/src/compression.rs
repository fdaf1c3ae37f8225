//! Output compression
//!
//! Streaming compression over the data sink. Unlike batch-oriented codecs,
//! the encoders here wrap a [`Write`] so row output streams straight to disk;
//! `finish` must be called to flush encoder trailers before the file is
//! renamed into place.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Compression codec applied to data files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression
    None,
    /// Gzip (`.gz`)
    Gzip,
    /// Zstandard (`.zst`)
    #[default]
    Zstd,
}

impl Compression {
    /// File extension suffix, including the leading dot.
    pub fn extension_suffix(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "gzip" | "gz" => Some(Self::Gzip),
            "zstd" | "zstandard" | "zst" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// True when a codec is configured.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Gzip => write!(f, "gzip"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

/// A write sink optionally wrapped in a streaming encoder.
pub enum CompressedSink<W: Write> {
    /// Pass-through
    Plain(W),
    /// Gzip encoder
    Gzip(flate2::write::GzEncoder<W>),
    /// Zstandard encoder
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CompressedSink<W> {
    /// Wrap `inner` according to `codec`.
    pub fn new(inner: W, codec: Compression) -> Result<Self> {
        Ok(match codec {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(flate2::write::GzEncoder::new(
                inner,
                flate2::Compression::default(),
            )),
            Compression::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(inner, 3)?),
        })
    }

    /// Flush encoder trailers and return the inner sink.
    pub fn finish(self) -> Result<W> {
        Ok(match self {
            Self::Plain(w) => w,
            Self::Gzip(enc) => enc.finish()?,
            Self::Zstd(enc) => enc.finish()?,
        })
    }
}

impl<W: Write> Write for CompressedSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_extension_suffixes() {
        assert_eq!(Compression::None.extension_suffix(), "");
        assert_eq!(Compression::Gzip.extension_suffix(), ".gz");
        assert_eq!(Compression::Zstd.extension_suffix(), ".zst");
    }

    #[test]
    fn test_parse() {
        assert_eq!(Compression::parse("gzip"), Some(Compression::Gzip));
        assert_eq!(Compression::parse("GZ"), Some(Compression::Gzip));
        assert_eq!(Compression::parse("zstd"), Some(Compression::Zstd));
        assert_eq!(Compression::parse("none"), Some(Compression::None));
        assert_eq!(Compression::parse(""), Some(Compression::None));
        assert_eq!(Compression::parse("lzma"), None);
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = b"row data ".repeat(200);

        let mut sink = CompressedSink::new(Vec::new(), Compression::Gzip).unwrap();
        sink.write_all(&data).unwrap();
        let compressed = sink.finish().unwrap();
        assert!(compressed.len() < data.len());

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_zstd_round_trip() {
        let data = b"row data ".repeat(200);

        let mut sink = CompressedSink::new(Vec::new(), Compression::Zstd).unwrap();
        sink.write_all(&data).unwrap();
        let compressed = sink.finish().unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = zstd::decode_all(compressed.as_slice()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_plain_passthrough() {
        let mut sink = CompressedSink::new(Vec::new(), Compression::None).unwrap();
        sink.write_all(b"abc").unwrap();
        assert_eq!(sink.finish().unwrap(), b"abc");
    }
}
