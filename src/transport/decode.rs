//! Streaming content decoding.
//!
//! # Responsibilities
//! - Undo `Content-Encoding: gzip` / `deflate` incrementally
//! - Hand decoded bytes out in bounded pieces so the caller can account
//!   (and stop) between pieces
//! - Reject bodies that stop early or fail the gzip CRC32/ISIZE trailer
//!
//! # Design Decisions
//! - Pull-based: `push` compressed input, then drain with `next_piece` until
//!   it returns `None`; a zip bomb never materializes more than one piece
//! - Encoded input waits in a queue whose reads report `WouldBlock` until
//!   more arrives, so flate2's gzip reader resumes where it stopped
//! - `deflate` accepts both zlib-wrapped and raw streams (sniffed from the
//!   first two bytes)
//! - Unknown or stacked codings pass through untouched

use bytes::{Buf, Bytes};
use flate2::bufread::GzDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use hyper::header::{HeaderMap, CONTENT_ENCODING};
use std::collections::VecDeque;
use std::io::{self, BufRead, Read};
use thiserror::Error;

/// Upper bound on the size of one decoded piece.
pub const PIECE_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("corrupt gzip body: {0}")]
    Gzip(io::Error),

    #[error("corrupt compressed body: {0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("compressed body ended early")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    Identity,
    Gzip,
    Deflate,
}

impl Coding {
    /// Pick the decoder for a response's `Content-Encoding`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()) else {
            return Coding::Identity;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Coding::Gzip,
            "deflate" => Coding::Deflate,
            _ => Coding::Identity,
        }
    }
}

/// Encoded bytes not yet taken by the inflater.
#[derive(Default)]
struct Queue {
    chunks: VecDeque<Bytes>,
    ended: bool,
}

impl Queue {
    /// `Some(true)` for a zlib header, `Some(false)` for raw deflate, `None`
    /// until two bytes have arrived.
    fn sniff_zlib(&self) -> Option<bool> {
        let mut bytes = self.chunks.iter().flat_map(|c| c.iter().copied());
        match (bytes.next(), bytes.next()) {
            (Some(cmf), Some(flg)) => Some(cmf & 0x0f == 8 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0),
            _ if self.ended => Some(false),
            _ => None,
        }
    }
}

impl Read for Queue {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.fill_buf()?;
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for Queue {
    /// Empty only once the body has ended; `WouldBlock` while more may come.
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.chunks.front().is_some_and(Bytes::is_empty) {
            self.chunks.pop_front();
        }
        match self.chunks.front() {
            Some(chunk) => Ok(&chunk[..]),
            None if self.ended => Ok(&[]),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Some(chunk) = self.chunks.front_mut() {
            chunk.advance(amt.min(chunk.len()));
        }
    }
}

enum Stage {
    Identity(VecDeque<Bytes>),
    /// Deflate input held until its first two bytes are known.
    Sniffing(Queue),
    Gzip(Box<GzDecoder<Queue>>),
    Deflate { inflate: Decompress, input: Queue },
    Done,
}

impl Stage {
    fn queue(&mut self) -> Option<&mut Queue> {
        match self {
            Stage::Sniffing(queue) => Some(queue),
            Stage::Gzip(decoder) => Some(decoder.get_mut()),
            Stage::Deflate { input, .. } => Some(input),
            Stage::Identity(_) | Stage::Done => None,
        }
    }
}

pub struct ContentDecoder {
    stage: Stage,
    received: bool,
}

impl ContentDecoder {
    pub fn new(coding: Coding) -> Self {
        let stage = match coding {
            Coding::Identity => Stage::Identity(VecDeque::new()),
            Coding::Gzip => Stage::Gzip(Box::new(GzDecoder::new(Queue::default()))),
            Coding::Deflate => Stage::Sniffing(Queue::default()),
        };
        Self { stage, received: false }
    }

    /// Queue one encoded body chunk.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.received = true;
        match &mut self.stage {
            Stage::Identity(pieces) => pieces.push_back(chunk),
            stage => {
                if let Some(queue) = stage.queue() {
                    queue.chunks.push_back(chunk);
                }
            }
        }
    }

    /// Mark the end of the encoded body.
    ///
    /// Keep draining [`next_piece`](Self::next_piece) afterwards: it reports
    /// a stream that stopped early or failed its checksum, and `None` then
    /// means the body was complete.
    pub fn finish(&mut self) {
        if !self.received {
            self.stage = Stage::Done;
        } else if let Some(queue) = self.stage.queue() {
            queue.ended = true;
        }
    }

    /// Next decoded piece, or `None` when more input is needed.
    pub fn next_piece(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if let Stage::Sniffing(queue) = &mut self.stage {
            let Some(zlib) = queue.sniff_zlib() else {
                return Ok(None);
            };
            let input = std::mem::take(queue);
            self.stage = Stage::Deflate {
                inflate: Decompress::new(zlib),
                input,
            };
        }

        let (piece, finished) = match &mut self.stage {
            Stage::Identity(pieces) => return Ok(pieces.pop_front()),
            Stage::Sniffing(_) | Stage::Done => return Ok(None),
            Stage::Gzip(decoder) => read_gzip(decoder)?,
            Stage::Deflate { inflate, input } => inflate_piece(inflate, input)?,
        };
        if finished {
            self.stage = Stage::Done;
        }
        Ok(piece)
    }
}

/// One piece from the gzip reader, plus whether the member is complete.
fn read_gzip(decoder: &mut GzDecoder<Queue>) -> Result<(Option<Bytes>, bool), DecodeError> {
    let mut out = vec![0u8; PIECE_SIZE];
    match decoder.read(&mut out) {
        Ok(0) => Ok((None, true)),
        Ok(n) => {
            out.truncate(n);
            Ok((Some(Bytes::from(out)), false))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok((None, false)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Truncated),
        Err(e) => Err(DecodeError::Gzip(e)),
    }
}

/// One piece from a zlib or raw deflate stream, plus whether it ended.
fn inflate_piece(inflate: &mut Decompress, input: &mut Queue) -> Result<(Option<Bytes>, bool), DecodeError> {
    let mut out = vec![0u8; PIECE_SIZE];
    loop {
        let (in_before, out_before) = (inflate.total_in(), inflate.total_out());
        let status = {
            let available = input.fill_buf().unwrap_or_default();
            inflate.decompress(available, &mut out, FlushDecompress::None)?
        };
        let consumed = (inflate.total_in() - in_before) as usize;
        let produced = (inflate.total_out() - out_before) as usize;
        input.consume(consumed);

        let finished = status == Status::StreamEnd;
        if produced > 0 || finished {
            out.truncate(produced);
            return Ok(((produced > 0).then(|| Bytes::from(out)), finished));
        }
        if consumed == 0 {
            return if input.ended {
                Err(DecodeError::Truncated)
            } else {
                Ok((None, false))
            };
        }
    }
}

#[cfg(test)]
impl ContentDecoder {
    fn queued(&mut self) -> usize {
        self.stage
            .queue()
            .map_or(0, |queue| queue.chunks.iter().map(Bytes::len).sum())
    }
}
