//! Incremental decoder for HTTP/1.1 chunked transfer encoding.
//!
//! NTRIP 2.0 casters usually stream with `Transfer-Encoding: chunked`. Data
//! arrives in arbitrary slices, so the decoder keeps its position between
//! calls and can be fed byte by byte.

use bytes::BytesMut;

use crate::error::{RelayError, RelayResult};

/// Longest accepted chunk-size line (hex digits plus extensions).
const MAX_SIZE_LINE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data,
    DataEnd,
    Finished,
}

#[derive(Debug, Clone)]
pub struct ChunkDecoder {
    size_line: Vec<u8>,
    left: usize,
    state: ChunkState,
}

impl ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            size_line: Vec::with_capacity(MAX_SIZE_LINE),
            left: 0,
            state: ChunkState::Size,
        }
    }

    /// Forget any partial chunk and expect a fresh size line.
    pub fn reset(&mut self) {
        self.size_line.clear();
        self.left = 0;
        self.state = ChunkState::Size;
    }

    /// True once the terminating zero-length chunk has been seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == ChunkState::Finished
    }

    /// Bytes still expected for the chunk currently being read.
    #[must_use]
    pub const fn remaining_in_chunk(&self) -> usize {
        self.left
    }

    /// Decode `input`, appending payload bytes to `out`.
    ///
    /// Returns the number of payload bytes produced. Input after the final
    /// chunk is ignored.
    pub fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> RelayResult<usize> {
        let start = out.len();
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                ChunkState::Size => {
                    let byte = input[pos];
                    pos += 1;
                    if byte == b'\n' {
                        self.finish_size_line()?;
                    } else {
                        if self.size_line.len() >= MAX_SIZE_LINE {
                            return Err(RelayError::Transmission(
                                "chunk size line too long".to_string(),
                            ));
                        }
                        self.size_line.push(byte);
                    }
                }
                ChunkState::Data => {
                    let take = self.left.min(input.len() - pos);
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.left -= take;
                    if self.left == 0 {
                        self.state = ChunkState::DataEnd;
                    }
                }
                ChunkState::DataEnd => {
                    let byte = input[pos];
                    pos += 1;
                    match byte {
                        b'\r' => {}
                        b'\n' => self.state = ChunkState::Size,
                        other => {
                            return Err(RelayError::Transmission(format!(
                                "expected CRLF after chunk data, got 0x{other:02x}"
                            )))
                        }
                    }
                }
                ChunkState::Finished => break,
            }
        }

        Ok(out.len() - start)
    }

    fn finish_size_line(&mut self) -> RelayResult<()> {
        let line = self.size_line.trim_ascii();

        // Tolerate stray blank lines between chunks
        if line.is_empty() {
            self.size_line.clear();
            return Ok(());
        }

        let mut terminated = Vec::with_capacity(line.len() + 2);
        terminated.extend_from_slice(line);
        terminated.extend_from_slice(b"\r\n");

        let size = match httparse::parse_chunk_size(&terminated) {
            Ok(httparse::Status::Complete((_, size))) => usize::try_from(size).ok(),
            Ok(httparse::Status::Partial) | Err(_) => None,
        }
        .ok_or_else(|| {
            RelayError::Transmission(format!(
                "invalid chunk size '{}'",
                String::from_utf8_lossy(line)
            ))
        })?;
        self.size_line.clear();

        if size == 0 {
            self.state = ChunkState::Finished;
        } else {
            self.left = size;
            self.state = ChunkState::Data;
        }
        Ok(())
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_call() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        let n = decoder
            .decode(b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n", &mut out)
            .unwrap();
        assert_eq!(n, 11);
        assert_eq!(&out[..], b"hello world");
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_decode_byte_by_byte() {
        let input = b"a\r\n0123456789\r\n0\r\n\r\n";
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        for byte in input.iter() {
            decoder.decode(std::slice::from_ref(byte), &mut out).unwrap();
        }
        assert_eq!(&out[..], b"0123456789");
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_partial_chunk_keeps_remaining() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        decoder.decode(b"8\r\nabc", &mut out).unwrap();
        assert_eq!(decoder.remaining_in_chunk(), 5);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_invalid_size_is_transmission_error() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        let err = decoder.decode(b"zz\r\n", &mut out).unwrap_err();
        assert!(matches!(err, RelayError::Transmission(_)));
    }

    #[test]
    fn test_size_line_with_padding_and_extension() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        decoder
            .decode(b"\r\n 3 ;name=\"v\"\r\nabc\r\n0\r\n\r\n", &mut out)
            .unwrap();
        assert_eq!(&out[..], b"abc");
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_oversized_chunk_length_is_rejected() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        let err = decoder.decode(b"fffffffffffffffff\r\n", &mut out).unwrap_err();
        assert!(matches!(err, RelayError::Transmission(_)));
    }

    #[test]
    fn test_missing_crlf_after_data() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        let err = decoder.decode(b"2\r\nabX", &mut out).unwrap_err();
        assert!(matches!(err, RelayError::Transmission(_)));
    }

    #[test]
    fn test_reset() {
        let mut decoder = ChunkDecoder::new();
        let mut out = BytesMut::new();
        decoder.decode(b"4\r\nab", &mut out).unwrap();
        decoder.reset();
        out.clear();
        decoder.decode(b"1\r\nz\r\n", &mut out).unwrap();
        assert_eq!(&out[..], b"z");
    }
}
