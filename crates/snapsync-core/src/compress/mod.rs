use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapError};

/// Largest plaintext a single stored object may decode to. Chunks top out
/// at a few MiB, so anything bigger is a damaged or hostile frame.
const DECODE_LIMIT: usize = 64 * 1024 * 1024;

/// Per-object codec. The choice is fixed when a repository is created, but
/// every stored object still begins with a one-byte codec tag, so the read
/// path never has to guess which algorithm wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lz4,
    Zstd { level: i32 },
}

impl Compression {
    /// Parse the configured algorithm name ("zstd", "lz4", "none").
    pub fn from_config(algorithm: &str, zstd_level: i32) -> Result<Self> {
        match algorithm {
            "zstd" => Ok(Compression::Zstd { level: zstd_level }),
            "lz4" => Ok(Compression::Lz4),
            "none" => Ok(Compression::None),
            other => Err(SnapError::Config(format!(
                "unsupported compression algorithm '{other}'"
            ))),
        }
    }

    /// Wire tag written ahead of every stored object.
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Zstd { .. } => 2,
        }
    }
}

/// Compress `data` and frame it with the codec tag.
pub fn compress(codec: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let body = match codec {
        Compression::None => data.to_vec(),
        Compression::Lz4 => lz4_flex::compress_prepend_size(data),
        Compression::Zstd { level } => zstd::bulk::compress(data, level)
            .map_err(|e| SnapError::Compression(format!("zstd level {level}: {e}")))?,
    };

    let mut framed = Vec::with_capacity(1 + body.len());
    framed.push(codec.tag());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Decode a tagged object back to plaintext, dispatching on its tag byte.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let (&tag, body) = data
        .split_first()
        .ok_or_else(|| SnapError::Decompression("object is missing its codec tag".into()))?;
    match tag {
        0 => Ok(body.to_vec()),
        1 => decode_lz4(body),
        2 => decode_zstd(body),
        other => Err(SnapError::UnknownCompressionTag(other)),
    }
}

fn decode_lz4(body: &[u8]) -> Result<Vec<u8>> {
    // The block format leads with the plaintext length; reject an oversized
    // claim before any allocation happens.
    let Some((declared, _)) = body.split_first_chunk::<4>() else {
        return Err(SnapError::Decompression("truncated lz4 frame".into()));
    };
    if u32::from_le_bytes(*declared) as usize > DECODE_LIMIT {
        return Err(SnapError::Decompression(format!(
            "lz4 frame claims more than {DECODE_LIMIT} bytes"
        )));
    }
    lz4_flex::decompress_size_prepended(body)
        .map_err(|e| SnapError::Decompression(format!("lz4: {e}")))
}

fn decode_zstd(body: &[u8]) -> Result<Vec<u8>> {
    // Streaming decode with an incremental cap; a zstd bomb trips the limit
    // instead of ballooning memory.
    let mut decoder = zstd::stream::read::Decoder::with_buffer(body)
        .map_err(|e| SnapError::Decompression(format!("zstd: {e}")))?;
    let mut plain = Vec::new();
    let mut scratch = [0u8; 16 * 1024];
    loop {
        let n = decoder
            .read(&mut scratch)
            .map_err(|e| SnapError::Decompression(format!("zstd: {e}")))?;
        if n == 0 {
            return Ok(plain);
        }
        if plain.len() + n > DECODE_LIMIT {
            return Err(SnapError::Decompression(format!(
                "zstd frame exceeds the {DECODE_LIMIT}-byte decode limit"
            )));
        }
        plain.extend_from_slice(&scratch[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODECS: [Compression; 3] = [
        Compression::None,
        Compression::Lz4,
        Compression::Zstd { level: 3 },
    ];

    #[test]
    fn roundtrip_all_codecs() {
        let payloads: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"short".to_vec(),
            b"repetition repetition repetition repetition repetition".to_vec(),
            (0..50_000u32).map(|i| (i % 7) as u8).collect(),
        ];

        for codec in ALL_CODECS {
            for payload in &payloads {
                let framed = compress(codec, payload).unwrap();
                assert_eq!(&decompress(&framed).unwrap(), payload, "{codec:?}");
            }
        }
    }

    #[test]
    fn frame_starts_with_the_codec_tag() {
        assert_eq!(compress(Compression::None, b"x").unwrap()[0], 0);
        assert_eq!(compress(Compression::Lz4, b"x").unwrap()[0], 1);
        assert_eq!(compress(Compression::Zstd { level: 3 }, b"x").unwrap()[0], 2);
    }

    #[test]
    fn repetitive_data_shrinks() {
        let data = vec![0x42u8; 64 * 1024];
        for codec in [Compression::Lz4, Compression::Zstd { level: 3 }] {
            let framed = compress(codec, &data).unwrap();
            assert!(framed.len() < data.len(), "{codec:?}");
        }
    }

    #[test]
    fn decode_reads_the_tag_not_the_config() {
        // A frame written at zstd level 19 decodes with no codec knowledge.
        let data = b"written under one configuration, read under another";
        let framed = compress(Compression::Zstd { level: 19 }, data).unwrap();
        assert_eq!(decompress(&framed).unwrap(), data);
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(matches!(
            decompress(&[]),
            Err(SnapError::Decompression(_))
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            decompress(&[9, 1, 2, 3]),
            Err(SnapError::UnknownCompressionTag(9))
        ));
    }

    #[test]
    fn truncated_lz4_frame_is_rejected() {
        // Tag plus two bytes: not even a full length prefix.
        assert!(decompress(&[1, 0x00, 0x00]).is_err());
    }

    #[test]
    fn oversized_lz4_claim_is_rejected_before_allocation() {
        let mut bomb = vec![1u8];
        bomb.extend_from_slice(&(u32::MAX).to_le_bytes());
        bomb.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            decompress(&bomb),
            Err(SnapError::Decompression(_))
        ));
    }

    #[test]
    fn from_config_maps_names() {
        assert_eq!(
            Compression::from_config("zstd", 7).unwrap(),
            Compression::Zstd { level: 7 }
        );
        assert_eq!(Compression::from_config("lz4", 7).unwrap(), Compression::Lz4);
        assert_eq!(Compression::from_config("none", 7).unwrap(), Compression::None);
        assert!(matches!(
            Compression::from_config("gzip", 7),
            Err(SnapError::Config(_))
        ));
    }
}
