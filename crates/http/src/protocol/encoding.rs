//! Response content-encoding negotiation and the matching encoders.
//!
//! Negotiation follows `Accept-Encoding` q-values: the highest-quality
//! encoding the client lists wins, and equally-weighted candidates are
//! broken deterministically in the order zstd, brotli, gzip, deflate,
//! identity. An explicit `q=0` excludes an encoding.

use std::io;
use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use http::HeaderMap;
use tracing::trace;

/// A response body encoding the toolkit can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Zstd,
    Br,
    Gzip,
    Deflate,
    /// No transformation; the default when the client accepts nothing else.
    Identity,
}

/// Tie-break order among equally-weighted acceptable encodings,
/// strongest first.
const PREFERENCE: [Encoding; 5] = [Encoding::Zstd, Encoding::Br, Encoding::Gzip, Encoding::Deflate, Encoding::Identity];

impl Encoding {
    /// The token used in `Content-Encoding` and `Accept-Encoding` headers.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Zstd => "zstd",
            Encoding::Br => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Identity => "identity",
        }
    }

    fn from_token(token: &str) -> Option<Encoding> {
        match token {
            "zstd" => Some(Encoding::Zstd),
            "br" => Some(Encoding::Br),
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "identity" | "*" => Some(Encoding::Identity),
            _ => None,
        }
    }

    /// Picks the best mutually supported encoding from a request's
    /// `Accept-Encoding` header. Absent or unusable headers select
    /// [`Encoding::Identity`].
    pub fn negotiate(headers: &HeaderMap) -> Encoding {
        let Some(value) = headers.get(http::header::ACCEPT_ENCODING) else {
            return Encoding::Identity;
        };
        let Ok(value) = value.to_str() else {
            return Encoding::Identity;
        };

        let mut best: Option<(Encoding, f32)> = None;
        for entry in value.split(',') {
            let mut parts = entry.split(';');
            let Some(encoding) = parts.next().map(str::trim).and_then(Encoding::from_token) else {
                continue;
            };
            let quality = parts
                .find_map(|param| param.trim().strip_prefix("q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if quality <= 0.0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, current_quality)) => {
                    quality > current_quality
                        || (quality == current_quality && Self::rank(encoding) < Self::rank(current))
                }
            };
            if better {
                best = Some((encoding, quality));
            }
        }

        let chosen = best.map_or(Encoding::Identity, |(encoding, _)| encoding);
        trace!(accept_encoding = value, chosen = chosen.name(), "negotiated response encoding");
        chosen
    }

    fn rank(encoding: Encoding) -> usize {
        PREFERENCE.iter().position(|candidate| *candidate == encoding).unwrap_or(PREFERENCE.len())
    }
}

/// Compresses a complete body under `encoding`.
///
/// The output is the exact byte-for-byte representation a compliant decoder
/// reverses back into the input. [`Encoding::Identity`] passes the body
/// through untouched.
pub(crate) fn compress(encoding: Encoding, body: &[u8]) -> io::Result<Bytes> {
    match encoding {
        Encoding::Identity => Ok(Bytes::copy_from_slice(body)),

        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(body)?;
            Ok(Bytes::from(encoder.finish()?))
        }

        Encoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(body)?;
            Ok(Bytes::from(encoder.finish()?))
        }

        Encoding::Zstd => Ok(Bytes::from(zstd::stream::encode_all(body, 6)?)),

        Encoding::Br => {
            let mut encoder = brotli::CompressorWriter::new(Vec::new(), 32 * 1024, 5, 22);
            encoder.write_all(body)?;
            encoder.flush()?;
            Ok(Bytes::from(encoder.into_inner()))
        }
    }
}
