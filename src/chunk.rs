//! Chunk codec: split outbound payloads, reassemble inbound ones
//!
//! Splitting and reassembly are pure functions over byte buffers; no
//! network access happens here. Compression, when requested, is applied
//! to the whole payload before splitting and signalled per chunk via
//! `content-encoding: gzip`. Reassembly accepts both whole-payload and
//! per-chunk gzip producers, since concatenated gzip members decode as
//! one stream.

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Non-final chunks should be at least this large (5 MB). This is a
/// convention of the wire protocol, not enforced client-side, so that
/// undersized chunks can still be exchanged with test servers.
pub const MIN_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default split threshold for outbound payloads (75 MB).
pub const DEFAULT_CHUNK_SIZE: usize = 75 * 1024 * 1024;

/// One ordered piece of a message payload.
///
/// `index` is 1-based; `total` is the declared chunk count carried by
/// every chunk of the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub total: u32,
    pub body: Vec<u8>,
    /// Body is gzip-encoded (`content-encoding: gzip`)
    pub gzipped: bool,
}

impl Chunk {
    /// Value for the `mex-chunk-range` header: `index:total`.
    pub fn range_header(&self) -> String {
        format!("{}:{}", self.index, self.total)
    }
}

/// Parse a `mex-chunk-range` header value (`index:total`).
pub fn parse_chunk_range(value: &str) -> Option<(u32, u32)> {
    let (index, total) = value.split_once(':')?;
    let index = index.trim().parse().ok()?;
    let total = total.trim().parse().ok()?;
    Some((index, total))
}

/// Errors raised by `reassemble`
#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("no chunks to reassemble")]
    Empty,

    #[error("chunk {got} received where chunk {expected} was declared")]
    OutOfOrder { expected: u32, got: u32 },

    #[error("declared chunk count disagrees: chunk {index} declares {declared}, expected {expected}")]
    CountMismatch {
        index: u32,
        declared: u32,
        expected: u32,
    },

    #[error("received {got} chunks but {declared} were declared")]
    MissingChunks { declared: u32, got: u32 },

    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Split `payload` into ordered chunks of at most `chunk_size` bytes.
///
/// When `compress` is set, the payload is gzip-encoded first and every
/// chunk is marked `gzipped`. An empty payload yields a single empty
/// chunk so the message still has a body request to carry its headers.
///
/// The 5 MB minimum for non-final chunks is the caller's responsibility
/// via `chunk_size`; undersized values are logged, not rejected. A zero
/// `chunk_size` is rejected as `InvalidInput`.
pub fn split(payload: &[u8], chunk_size: usize, compress: bool) -> Result<Vec<Chunk>, std::io::Error> {
    if chunk_size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "chunk_size must be non-zero",
        ));
    }
    if chunk_size < MIN_CHUNK_SIZE {
        tracing::warn!(
            chunk_size,
            min = MIN_CHUNK_SIZE,
            "chunk size below protocol minimum for non-final chunks"
        );
    }

    let data: Vec<u8> = if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()?
    } else {
        payload.to_vec()
    };

    let total = (data.len().div_ceil(chunk_size)).max(1) as u32;
    let mut chunks = Vec::with_capacity(total as usize);
    if data.is_empty() {
        chunks.push(Chunk {
            index: 1,
            total: 1,
            body: Vec::new(),
            gzipped: compress,
        });
        return Ok(chunks);
    }

    for (i, piece) in data.chunks(chunk_size).enumerate() {
        chunks.push(Chunk {
            index: i as u32 + 1,
            total,
            body: piece.to_vec(),
            gzipped: compress,
        });
    }
    Ok(chunks)
}

/// Reassemble an ordered chunk sequence into the original payload.
///
/// Fails if the sequence is empty, indices are not contiguous 1..N in
/// order, any chunk disagrees on the declared total, chunks are missing,
/// or decompression fails. Never returns a partial payload.
pub fn reassemble(chunks: &[Chunk]) -> Result<Vec<u8>, ReassemblyError> {
    let first = chunks.first().ok_or(ReassemblyError::Empty)?;
    let declared = first.total;

    let mut combined = Vec::with_capacity(chunks.iter().map(|c| c.body.len()).sum());
    let mut gzipped = false;
    for (i, chunk) in chunks.iter().enumerate() {
        let expected = i as u32 + 1;
        if chunk.index != expected {
            return Err(ReassemblyError::OutOfOrder {
                expected,
                got: chunk.index,
            });
        }
        if chunk.total != declared {
            return Err(ReassemblyError::CountMismatch {
                index: chunk.index,
                declared: chunk.total,
                expected: declared,
            });
        }
        gzipped |= chunk.gzipped;
        combined.extend_from_slice(&chunk.body);
    }

    if chunks.len() as u32 != declared {
        return Err(ReassemblyError::MissingChunks {
            declared,
            got: chunks.len() as u32,
        });
    }

    if gzipped {
        let mut decoder = MultiGzDecoder::new(combined.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(ReassemblyError::Decompress)?;
        Ok(out)
    } else {
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn round_trip_uncompressed() {
        let data = payload(1024 * 1024);
        let chunks = split(&data, 100 * 1024, false).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks).unwrap(), data);
    }

    #[test]
    fn round_trip_compressed() {
        let data = payload(512 * 1024);
        let chunks = split(&data, 64 * 1024, true).unwrap();
        assert!(chunks.iter().all(|c| c.gzipped));
        assert_eq!(reassemble(&chunks).unwrap(), data);
    }

    #[test]
    fn twelve_megabytes_at_five_megabyte_chunks_is_three_chunks() {
        let data = payload(12 * 1024 * 1024);
        let chunks = split(&data, MIN_CHUNK_SIZE, false).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].body.len(), MIN_CHUNK_SIZE);
        assert_eq!(chunks[1].body.len(), MIN_CHUNK_SIZE);
        assert_eq!(chunks[2].body.len(), 2 * 1024 * 1024);
        assert!(chunks.iter().all(|c| c.total == 3));
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        assert_eq!(reassemble(&chunks).unwrap(), data);
    }

    #[test]
    fn zero_chunk_size_is_an_error_not_a_panic() {
        let err = split(b"payload", 0, false).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn empty_payload_is_a_single_empty_chunk() {
        let chunks = split(&[], 1024, false).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].range_header(), "1:1");
        assert!(chunks[0].body.is_empty());
        assert_eq!(reassemble(&chunks).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn missing_chunk_fails_without_partial_payload() {
        let data = payload(300);
        let mut chunks = split(&data, 100, false).unwrap();
        chunks.remove(1);

        match reassemble(&chunks) {
            Err(ReassemblyError::OutOfOrder { expected: 2, got: 3 }) => {}
            other => panic!("expected OutOfOrder, got {other:?}"),
        }
    }

    #[test]
    fn truncated_sequence_reports_missing_chunks() {
        let data = payload(300);
        let mut chunks = split(&data, 100, false).unwrap();
        chunks.pop();

        match reassemble(&chunks) {
            Err(ReassemblyError::MissingChunks { declared: 3, got: 2 }) => {}
            other => panic!("expected MissingChunks, got {other:?}"),
        }
    }

    #[test]
    fn disagreeing_totals_are_rejected() {
        let data = payload(200);
        let mut chunks = split(&data, 100, false).unwrap();
        chunks[1].total = 5;

        assert!(matches!(
            reassemble(&chunks),
            Err(ReassemblyError::CountMismatch {
                index: 2,
                declared: 5,
                expected: 2
            })
        ));
    }

    #[test]
    fn per_chunk_gzip_members_decode_as_one_payload() {
        // A producer may gzip each chunk independently; concatenated gzip
        // members must still decode to the original payload.
        let data = payload(3000);
        let mut chunks = Vec::new();
        for (i, piece) in data.chunks(1000).enumerate() {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(piece).unwrap();
            chunks.push(Chunk {
                index: i as u32 + 1,
                total: 3,
                body: encoder.finish().unwrap(),
                gzipped: true,
            });
        }
        assert_eq!(reassemble(&chunks).unwrap(), data);
    }

    #[test]
    fn garbage_gzip_body_fails_decompression() {
        let chunks = vec![Chunk {
            index: 1,
            total: 1,
            body: vec![0xde, 0xad, 0xbe, 0xef],
            gzipped: true,
        }];
        assert!(matches!(
            reassemble(&chunks),
            Err(ReassemblyError::Decompress(_))
        ));
    }

    #[test]
    fn chunk_range_parsing() {
        assert_eq!(parse_chunk_range("1:1"), Some((1, 1)));
        assert_eq!(parse_chunk_range("2:17"), Some((2, 17)));
        assert_eq!(parse_chunk_range(" 3 : 4 "), Some((3, 4)));
        assert_eq!(parse_chunk_range("nonsense"), None);
        assert_eq!(parse_chunk_range("1"), None);
    }
}
