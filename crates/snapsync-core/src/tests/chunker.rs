use std::collections::HashSet;
use std::io::Cursor;

use snapsync_types::Digest;

use crate::chunker::{Chunk, FixedChunker, RabinChunker};
use crate::testutil::{seeded_bytes, small_chunker};

fn triples(chunks: &[Chunk]) -> Vec<(u64, u64, String)> {
    chunks
        .iter()
        .map(|c| (c.offset, c.length, c.digest.to_hex()))
        .collect()
}

#[test]
fn deterministic_boundaries() {
    let data = seeded_bytes(1024 * 1024, 1);
    let chunker = small_chunker();
    let first = chunker.chunk_data(&data).unwrap();
    let second = chunker.chunk_data(&data).unwrap();
    assert_eq!(triples(&first), triples(&second));
    assert!(first.len() > 1, "1 MiB should split into several chunks");
}

#[test]
fn chunks_cover_input_exactly() {
    let data = seeded_bytes(100_000, 2);
    let chunker = small_chunker();
    let chunks = chunker.chunk_data(&data).unwrap();

    let mut expected_offset = 0u64;
    let mut concat = Vec::new();
    for chunk in &chunks {
        assert_eq!(chunk.offset, expected_offset, "gap or overlap");
        assert_eq!(chunk.length as usize, chunk.data.len());
        expected_offset += chunk.length;
        concat.extend_from_slice(&chunk.data);
    }
    assert_eq!(concat, data);
}

#[test]
fn chunk_sizes_respect_bounds() {
    let data = seeded_bytes(300_000, 3);
    let chunker = small_chunker();
    let chunks = chunker.chunk_data(&data).unwrap();

    for (i, chunk) in chunks.iter().enumerate() {
        assert!(chunk.length >= 1);
        assert!(
            chunk.length <= chunker.max_size() as u64,
            "chunk {i} exceeds max_size"
        );
        if i + 1 < chunks.len() {
            assert!(
                chunk.length >= chunker.min_size() as u64,
                "non-final chunk {i} below min_size"
            );
        }
    }
}

#[test]
fn digest_matches_chunk_bytes() {
    let data = seeded_bytes(50_000, 4);
    for chunk in small_chunker().chunk_data(&data).unwrap() {
        assert_eq!(chunk.digest, Digest::of_bytes(&chunk.data));
    }
}

#[test]
fn empty_input_yields_no_chunks() {
    assert!(small_chunker().chunk_data(b"").unwrap().is_empty());
}

#[test]
fn sub_minimum_input_is_one_chunk() {
    let chunks = small_chunker().chunk_data(&[7u8; 100]).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].offset, 0);
    assert_eq!(chunks[0].length, 100);
}

#[test]
fn single_byte_input() {
    let chunks = small_chunker().chunk_data(b"x").unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].length, 1);
}

#[test]
fn zero_window_splits_at_min_size() {
    // All-zero input keeps the rolling hash at zero, so the boundary
    // predicate fires at exactly min_size every time.
    let chunker = RabinChunker::new(256, 1024, 4096);
    let chunks = chunker.chunk_data(&[0u8; 10_000]).unwrap();
    assert_eq!(chunks.len(), 40);
    for chunk in &chunks[..39] {
        assert_eq!(chunk.length, 256);
    }
    assert_eq!(chunks[39].length, 10_000 - 39 * 256);
}

#[test]
fn degenerate_params_force_exact_chunks() {
    // min == avg == max: every boundary is the forced max-size split.
    let chunker = RabinChunker::new(512, 512, 512);
    let data = seeded_bytes(2000, 5);
    let chunks = chunker.chunk_data(&data).unwrap();
    assert_eq!(
        chunks.iter().map(|c| c.length).collect::<Vec<_>>(),
        vec![512, 512, 512, 464]
    );
}

/// Reader that hands out at most 7 bytes per read call.
struct TrickleReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl std::io::Read for TrickleReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(7).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[test]
fn boundaries_independent_of_read_pattern() {
    let data = seeded_bytes(64 * 1024, 6);
    let chunker = small_chunker();

    let from_slice = chunker.chunk_data(&data).unwrap();
    let from_cursor: Vec<Chunk> = chunker
        .chunk_stream(Cursor::new(&data))
        .collect::<crate::error::Result<_>>()
        .unwrap();
    let from_trickle: Vec<Chunk> = chunker
        .chunk_stream(TrickleReader { data: &data, pos: 0 })
        .collect::<crate::error::Result<_>>()
        .unwrap();

    assert_eq!(triples(&from_slice), triples(&from_cursor));
    assert_eq!(triples(&from_slice), triples(&from_trickle));
}

#[test]
fn single_byte_insert_disturbs_few_chunks() {
    // Edit locality on a 16 MiB stream with production parameters: one
    // inserted byte must invalidate O(1) chunks, not the whole file.
    let data = seeded_bytes(16 * 1024 * 1024, 7);
    let chunker = RabinChunker::default();

    let before: HashSet<String> = chunker
        .chunk_data(&data)
        .unwrap()
        .iter()
        .map(|c| c.digest.to_hex())
        .collect();

    let mut edited = data;
    edited.insert(1_000_000, 0xA5);
    let after = chunker.chunk_data(&edited).unwrap();

    let new_chunks = after
        .iter()
        .filter(|c| !before.contains(&c.digest.to_hex()))
        .count();
    assert!(
        new_chunks < 5,
        "a single-byte insert produced {new_chunks} new chunks"
    );
}

#[test]
fn zero_params_fall_back_to_defaults() {
    let chunker = RabinChunker::new(0, 0, 0);
    assert_eq!(chunker.min_size(), 512 * 1024);
    assert_eq!(chunker.avg_size(), 1024 * 1024);
    assert_eq!(chunker.max_size(), 4 * 1024 * 1024);
}

#[test]
fn fixed_chunker_exact_sizes() {
    let data = seeded_bytes(10_000, 8);
    let chunks = FixedChunker::new(4096).chunk_data(&data).unwrap();

    assert_eq!(
        chunks.iter().map(|c| c.length).collect::<Vec<_>>(),
        vec![4096, 4096, 1808]
    );
    let concat: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
    assert_eq!(concat, data);
}

#[test]
fn fixed_chunker_empty_input() {
    assert!(FixedChunker::new(1024).chunk_data(b"").unwrap().is_empty());
}
