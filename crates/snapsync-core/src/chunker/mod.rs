use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use snapsync_types::Digest;

use crate::error::Result;

pub const DEFAULT_MIN_SIZE: usize = 512 * 1024;
pub const DEFAULT_AVG_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_SIZE: usize = 4 * 1024 * 1024;

/// Rolling window length in bytes.
const WINDOW_SIZE: usize = 64;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Odd multiplier for the 64-bit Rabin-Karp rolling hash.
const HASH_BASE: u64 = 0x003D_A335_8B4D_C173;

/// `HASH_BASE^(WINDOW_SIZE - 1)`: the weight of the byte leaving the window.
const OUT_WEIGHT: u64 = pow_base(WINDOW_SIZE - 1);

const fn pow_base(mut n: usize) -> u64 {
    let mut acc = 1u64;
    while n > 0 {
        acc = acc.wrapping_mul(HASH_BASE);
        n -= 1;
    }
    acc
}

/// A chunk emitted by a chunker.
///
/// The digest is computed over the plaintext bytes, independently of the
/// rolling hash, and together with `length` and `data` stays mutually
/// consistent at every observation point.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub digest: Digest,
    pub length: u64,
    /// Byte offset within the originating file.
    pub offset: u64,
    /// Owned copy of the plaintext bytes.
    pub data: Vec<u8>,
}

/// 64-bit rolling hash over a fixed 64-byte window, updated in O(1) per byte.
///
/// Polynomial form: `hash = sum(window[i] * BASE^(63-i))` in wrapping u64
/// arithmetic. Rolling a byte out subtracts its `BASE^63` weight before the
/// whole window is promoted by one power.
struct RollingHash {
    window: [u8; WINDOW_SIZE],
    /// Index of the oldest byte once the window is full; next write slot.
    pos: usize,
    filled: usize,
    hash: u64,
}

impl RollingHash {
    fn new() -> Self {
        Self {
            window: [0u8; WINDOW_SIZE],
            pos: 0,
            filled: 0,
            hash: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.filled < WINDOW_SIZE {
            self.window[self.pos] = byte;
            self.pos = (self.pos + 1) % WINDOW_SIZE;
            self.filled += 1;
            self.hash = self.hash.wrapping_mul(HASH_BASE).wrapping_add(byte as u64);
        } else {
            let out = self.window[self.pos];
            self.window[self.pos] = byte;
            self.pos = (self.pos + 1) % WINDOW_SIZE;
            self.hash = self
                .hash
                .wrapping_sub((out as u64).wrapping_mul(OUT_WEIGHT))
                .wrapping_mul(HASH_BASE)
                .wrapping_add(byte as u64);
        }
    }

    fn sum(&self) -> u64 {
        self.hash
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Content-defined chunker using a Rabin-style rolling hash.
///
/// A boundary is emitted when, after at least `min_size` bytes since the
/// last boundary, `rolling_hash & (avg_size - 1) == 0`; a boundary is forced
/// at `max_size`. Residual bytes at end of input form a final chunk of any
/// length >= 1. Boundaries are a deterministic function of content and
/// parameters alone.
#[derive(Debug, Clone, Copy)]
pub struct RabinChunker {
    min_size: usize,
    avg_size: usize,
    max_size: usize,
    mask: u64,
}

impl RabinChunker {
    /// Create a chunker; any zero parameter falls back to its default.
    pub fn new(min_size: usize, avg_size: usize, max_size: usize) -> Self {
        let min_size = if min_size == 0 { DEFAULT_MIN_SIZE } else { min_size };
        let avg_size = if avg_size == 0 { DEFAULT_AVG_SIZE } else { avg_size };
        let max_size = if max_size == 0 { DEFAULT_MAX_SIZE } else { max_size };
        debug_assert!(min_size <= avg_size && avg_size <= max_size);

        // A boundary fires with probability 1/avg_size per eligible byte.
        let mask = (avg_size - 1) as u64;

        Self {
            min_size,
            avg_size,
            max_size,
            mask,
        }
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn avg_size(&self) -> usize {
        self.avg_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Chunk a reader, yielding chunks inline as the input is consumed.
    pub fn chunk_stream<R: Read>(&self, reader: R) -> ChunkStream<R> {
        ChunkStream {
            reader,
            min_size: self.min_size,
            max_size: self.max_size,
            mask: self.mask,
            read_buf: vec![0u8; READ_BUF_SIZE],
            pos: 0,
            filled: 0,
            current: Vec::with_capacity(self.max_size),
            offset: 0,
            hash: RollingHash::new(),
            eof: false,
            failed: false,
        }
    }

    /// Chunk an in-memory byte slice.
    pub fn chunk_data(&self, data: &[u8]) -> Result<Vec<Chunk>> {
        self.chunk_stream(data).collect()
    }

    /// Chunk a file's contents.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        let file = File::open(path)?;
        self.chunk_stream(file).collect()
    }
}

impl Default for RabinChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SIZE, DEFAULT_AVG_SIZE, DEFAULT_MAX_SIZE)
    }
}

/// Streaming iterator over the chunks of a reader.
///
/// Blocks on input reads; the rolling window is reset at each boundary so
/// every chunk begins with a fresh window.
pub struct ChunkStream<R> {
    reader: R,
    min_size: usize,
    max_size: usize,
    mask: u64,
    read_buf: Vec<u8>,
    pos: usize,
    filled: usize,
    current: Vec<u8>,
    offset: u64,
    hash: RollingHash,
    eof: bool,
    failed: bool,
}

impl<R> ChunkStream<R> {
    fn emit(&mut self) -> Chunk {
        let data = std::mem::replace(&mut self.current, Vec::with_capacity(self.max_size));
        let length = data.len() as u64;
        let chunk = Chunk {
            digest: Digest::of_bytes(&data),
            length,
            offset: self.offset,
            data,
        };
        self.offset += length;
        self.hash.reset();
        chunk
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            while self.pos < self.filled {
                let byte = self.read_buf[self.pos];
                self.pos += 1;
                self.current.push(byte);
                self.hash.push(byte);

                let len = self.current.len();
                if len >= self.max_size
                    || (len >= self.min_size && (self.hash.sum() & self.mask) == 0)
                {
                    return Some(Ok(self.emit()));
                }
            }

            if self.eof {
                if self.current.is_empty() {
                    return None;
                }
                return Some(Ok(self.emit()));
            }

            match self.reader.read(&mut self.read_buf) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Fixed-size chunker for baseline comparison and testing only. Emits chunks
/// of exactly `chunk_size` bytes, with a possibly short final chunk.
#[derive(Debug, Clone, Copy)]
pub struct FixedChunker {
    chunk_size: usize,
}

impl FixedChunker {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_AVG_SIZE
        } else {
            chunk_size
        };
        Self { chunk_size }
    }

    pub fn chunk_reader<R: Read>(&self, mut reader: R) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut buf = vec![0u8; self.chunk_size];
            let mut filled = 0;
            while filled < buf.len() {
                match reader.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            if filled == 0 {
                break;
            }
            buf.truncate(filled);
            chunks.push(Chunk {
                digest: Digest::of_bytes(&buf),
                length: filled as u64,
                offset,
                data: buf,
            });
            offset += filled as u64;
            if filled < self.chunk_size {
                break;
            }
        }

        Ok(chunks)
    }

    pub fn chunk_data(&self, data: &[u8]) -> Result<Vec<Chunk>> {
        self.chunk_reader(data)
    }
}
