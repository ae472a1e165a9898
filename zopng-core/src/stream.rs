//! Incremental PNG chunk tokenizer.
//!
//! The tokenizer turns an arbitrarily fragmented byte stream into the event
//! sequence
//!
//! ```text
//! Signature, (ChunkHeader, ChunkBody*, ChunkCrc)*
//! ```
//!
//! Body events borrow directly from the caller's input slice, so no payload
//! bytes are copied. Reads may split a chunk anywhere; the tokenizer keeps
//! only the few bytes of a partially received header, signature or CRC.
//!
//! # Example
//!
//! ```
//! use zopng_core::stream::{ChunkTokenizer, Event};
//!
//! let mut png = zopng_core::PNG_SIGNATURE.to_vec();
//! png.extend_from_slice(&[0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82]);
//!
//! let mut tokenizer = ChunkTokenizer::new();
//! let events: Vec<_> = tokenizer.events(&png).collect::<Result<_, _>>().unwrap();
//! assert_eq!(events.len(), 3);
//! assert!(matches!(events[1], Event::ChunkHeader(_)));
//! tokenizer.finish().unwrap();
//! ```

use crate::chunk::{ChunkHeader, ChunkName, MAX_CHUNK_LENGTH, PNG_SIGNATURE};
use crate::crc::Crc32;
use crate::error::{Result, ZopngError};

/// One tokenizer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    /// The 8-byte file signature.
    Signature([u8; 8]),
    /// Start of a chunk.
    ChunkHeader(ChunkHeader),
    /// A fragment of the current chunk's payload.
    ChunkBody(&'a [u8]),
    /// The stored CRC of the current chunk.
    ChunkCrc([u8; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Signature { buf: [u8; 8], filled: usize },
    Header { buf: [u8; 8], filled: usize },
    Body { name: ChunkName, remaining: u32 },
    Crc { name: ChunkName, buf: [u8; 4], filled: usize },
    Trailer,
    Failed,
}

/// Streaming PNG tokenizer.
#[derive(Debug, Clone)]
pub struct ChunkTokenizer {
    state: State,
    offset: u64,
    verify_crc: bool,
    crc: Crc32,
}

impl ChunkTokenizer {
    /// Create a tokenizer that does not check stored CRCs.
    pub fn new() -> Self {
        Self {
            state: State::Signature {
                buf: [0; 8],
                filled: 0,
            },
            offset: 0,
            verify_crc: false,
            crc: Crc32::new(),
        }
    }

    /// Create a tokenizer that rejects chunks whose stored CRC is wrong.
    pub fn with_crc_check() -> Self {
        Self {
            verify_crc: true,
            ..Self::new()
        }
    }

    /// Number of input bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// True once the `IEND` chunk has been fully read.
    pub fn is_complete(&self) -> bool {
        self.state == State::Trailer
    }

    /// Consume a prefix of `input`, returning how many bytes were used and
    /// the event they completed, if any.
    ///
    /// Any non-empty input is consumed at least partially unless an error is
    /// returned.
    pub fn update<'a>(&mut self, input: &'a [u8]) -> Result<(usize, Option<Event<'a>>)> {
        let result = self.step(input);
        match &result {
            Ok((n, _)) => self.offset += *n as u64,
            Err(_) => self.state = State::Failed,
        }
        result
    }

    fn step<'a>(&mut self, input: &'a [u8]) -> Result<(usize, Option<Event<'a>>)> {
        match &mut self.state {
            State::Signature { buf, filled } => {
                let n = input.len().min(buf.len() - *filled);
                buf[*filled..*filled + n].copy_from_slice(&input[..n]);
                *filled += n;
                if *filled < buf.len() {
                    return Ok((n, None));
                }
                let signature = *buf;
                if signature != PNG_SIGNATURE {
                    return Err(ZopngError::invalid_signature(signature));
                }
                self.state = State::Header {
                    buf: [0; 8],
                    filled: 0,
                };
                Ok((n, Some(Event::Signature(signature))))
            }
            State::Header { buf, filled } => {
                let n = input.len().min(buf.len() - *filled);
                buf[*filled..*filled + n].copy_from_slice(&input[..n]);
                *filled += n;
                if *filled < buf.len() {
                    return Ok((n, None));
                }
                let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                let name = ChunkName([buf[4], buf[5], buf[6], buf[7]]);
                let header_offset = self.offset + n as u64 - 8;
                if length > MAX_CHUNK_LENGTH {
                    return Err(ZopngError::format(
                        header_offset,
                        format!("chunk length {} exceeds the PNG limit", length),
                    ));
                }
                if !name.is_valid() {
                    return Err(ZopngError::format(
                        header_offset,
                        format!("invalid chunk name {}", name),
                    ));
                }
                self.crc.reset();
                self.crc.update(name.as_bytes());
                self.state = if length == 0 {
                    State::Crc {
                        name,
                        buf: [0; 4],
                        filled: 0,
                    }
                } else {
                    State::Body {
                        name,
                        remaining: length,
                    }
                };
                Ok((n, Some(Event::ChunkHeader(ChunkHeader { name, length }))))
            }
            State::Body { name, remaining } => {
                if input.is_empty() {
                    return Ok((0, None));
                }
                let n = input.len().min(*remaining as usize);
                let body = &input[..n];
                *remaining -= n as u32;
                let (name, done) = (*name, *remaining == 0);
                if self.verify_crc {
                    self.crc.update(body);
                }
                if done {
                    self.state = State::Crc {
                        name,
                        buf: [0; 4],
                        filled: 0,
                    };
                }
                Ok((n, Some(Event::ChunkBody(body))))
            }
            State::Crc { name, buf, filled } => {
                let n = input.len().min(buf.len() - *filled);
                buf[*filled..*filled + n].copy_from_slice(&input[..n]);
                *filled += n;
                if *filled < buf.len() {
                    return Ok((n, None));
                }
                let stored = *buf;
                let name = *name;
                if self.verify_crc {
                    let computed = self.crc.value();
                    let stored_value = u32::from_be_bytes(stored);
                    if computed != stored_value {
                        return Err(ZopngError::crc_mismatch(
                            name.to_string(),
                            stored_value,
                            computed,
                        ));
                    }
                }
                self.state = if name == ChunkName::IEND {
                    State::Trailer
                } else {
                    State::Header {
                        buf: [0; 8],
                        filled: 0,
                    }
                };
                Ok((n, Some(Event::ChunkCrc(stored))))
            }
            State::Trailer => {
                if input.is_empty() {
                    Ok((0, None))
                } else {
                    Err(ZopngError::format(self.offset, "data after IEND chunk"))
                }
            }
            State::Failed => Err(ZopngError::format(
                self.offset,
                "tokenizer used after an error",
            )),
        }
    }

    /// Iterate over the events contained in `input`.
    ///
    /// Incomplete trailing structures are kept in the tokenizer and finished
    /// by the next call.
    pub fn events<'t, 'a>(&'t mut self, input: &'a [u8]) -> Events<'t, 'a> {
        Events {
            tokenizer: self,
            input,
        }
    }

    /// Signal end of stream. Fails unless the stream ended right after `IEND`.
    pub fn finish(&self) -> Result<()> {
        match self.state {
            State::Trailer => Ok(()),
            State::Signature { filled, .. } => Err(ZopngError::unexpected_eof(format!(
                "file ends after {} signature bytes",
                filled
            ))),
            State::Header { filled: 0, .. } => {
                Err(ZopngError::unexpected_eof("missing IEND chunk"))
            }
            State::Header { .. } => Err(ZopngError::unexpected_eof("truncated chunk header")),
            State::Body { name, remaining } => Err(ZopngError::unexpected_eof(format!(
                "{} chunk is missing {} payload bytes",
                name, remaining
            ))),
            State::Crc { name, .. } => Err(ZopngError::unexpected_eof(format!(
                "{} chunk is missing its CRC",
                name
            ))),
            State::Failed => Err(ZopngError::format(self.offset, "stream already failed")),
        }
    }
}

impl Default for ChunkTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`ChunkTokenizer::events`].
pub struct Events<'t, 'a> {
    tokenizer: &'t mut ChunkTokenizer,
    input: &'a [u8],
}

impl<'a> Iterator for Events<'_, 'a> {
    type Item = Result<Event<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.input.is_empty() {
            match self.tokenizer.update(self.input) {
                Ok((n, event)) => {
                    self.input = &self.input[n..];
                    if let Some(event) = event {
                        return Some(Ok(event));
                    }
                }
                Err(e) => {
                    self.input = &[];
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        let mut crc = Crc32::new();
        crc.update(name);
        crc.update(payload);
        out.extend_from_slice(&crc.finalize().to_be_bytes());
        out
    }

    fn sample_png() -> Vec<u8> {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0; 13]));
        png.extend(chunk(b"IDAT", b"abcdef"));
        png.extend(chunk(b"IEND", b""));
        png
    }

    fn collect_owned(events: Vec<Event<'_>>) -> Vec<String> {
        events
            .into_iter()
            .map(|e| match e {
                Event::Signature(_) => "sig".to_string(),
                Event::ChunkHeader(h) => format!("hdr {} {}", h.name, h.length),
                Event::ChunkBody(b) => format!("body {}", b.len()),
                Event::ChunkCrc(_) => "crc".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_whole_buffer() {
        let png = sample_png();
        let mut tokenizer = ChunkTokenizer::new();
        let events: Vec<_> = tokenizer.events(&png).collect::<Result<_>>().unwrap();
        assert_eq!(
            collect_owned(events),
            vec![
                "sig", "hdr IHDR 13", "body 13", "crc", "hdr IDAT 6", "body 6", "crc",
                "hdr IEND 0", "crc"
            ]
        );
        assert!(tokenizer.is_complete());
        tokenizer.finish().unwrap();
        assert_eq!(tokenizer.offset(), png.len() as u64);
    }

    #[test]
    fn test_byte_by_byte() {
        let png = sample_png();
        let mut tokenizer = ChunkTokenizer::with_crc_check();
        let mut headers = Vec::new();
        let mut body_bytes = 0;
        for byte in &png {
            for event in tokenizer.events(std::slice::from_ref(byte)) {
                match event.unwrap() {
                    Event::ChunkHeader(h) => headers.push(h.name),
                    Event::ChunkBody(b) => body_bytes += b.len(),
                    _ => {}
                }
            }
        }
        assert_eq!(
            headers,
            vec![ChunkName::IHDR, ChunkName::IDAT, ChunkName::IEND]
        );
        assert_eq!(body_bytes, 19);
        tokenizer.finish().unwrap();
    }

    #[test]
    fn test_bad_signature() {
        let mut tokenizer = ChunkTokenizer::new();
        let err = tokenizer
            .events(b"GIF89a\x00\x00")
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ZopngError::InvalidSignature { .. }));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut png = sample_png();
        let idat_crc = PNG_SIGNATURE.len() + 25 + 8 + 6;
        png[idat_crc] ^= 0xFF;

        let mut lenient = ChunkTokenizer::new();
        assert!(lenient.events(&png).all(|e| e.is_ok()));

        let mut strict = ChunkTokenizer::with_crc_check();
        let err = strict.events(&png).find_map(|e| e.err()).unwrap();
        assert!(matches!(err, ZopngError::CrcMismatch { .. }));
    }

    #[test]
    fn test_truncated_stream() {
        let png = sample_png();
        let mut tokenizer = ChunkTokenizer::new();
        for event in tokenizer.events(&png[..png.len() - 20]) {
            event.unwrap();
        }
        assert!(matches!(
            tokenizer.finish(),
            Err(ZopngError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_data_after_iend() {
        let mut png = sample_png();
        png.push(0);
        let mut tokenizer = ChunkTokenizer::new();
        let err = tokenizer.events(&png).find_map(|e| e.err()).unwrap();
        assert!(matches!(err, ZopngError::Format { .. }));
    }

    #[test]
    fn test_invalid_chunk_name() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"ID4T", b"x"));
        let mut tokenizer = ChunkTokenizer::new();
        let err = tokenizer.events(&png).find_map(|e| e.err()).unwrap();
        assert!(err.to_string().contains("invalid chunk name"));
    }

    #[test]
    fn test_oversized_length() {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        png.extend_from_slice(b"IDAT");
        let mut tokenizer = ChunkTokenizer::new();
        let err = tokenizer.events(&png).find_map(|e| e.err()).unwrap();
        assert!(matches!(err, ZopngError::Format { offset: 8, .. }));
    }
}
