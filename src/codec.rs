//! Outer byte-compressor registry.
//!
//! The outer codec is the "external dependency exposing `compress(level,
//! bytes) -> bytes` / `decompress(bytes) -> bytes`" named out of scope by
//! the format spec — the *algorithm* is someone else's problem; this module
//! only owns the frozen on-disk identity (`outerCodecId: u8`) and the
//! dispatch table. A reader that meets an unrecognised id fails hard: there
//! is no negotiation and no silent fallback, mirroring the sibling archive
//! format this codec's container layout is descended from.

use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    None = 0,
    Zstd = 1,
    Lz4 = 2,
    Brotli = 3,
    Lzma = 4,
}

impl CodecId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CodecId::None),
            1 => Some(CodecId::Zstd),
            2 => Some(CodecId::Lz4),
            3 => Some(CodecId::Brotli),
            4 => Some(CodecId::Lzma),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Zstd => "zstd",
            CodecId::Lz4 => "lz4",
            CodecId::Brotli => "brotli",
            CodecId::Lzma => "lzma",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "zstd" => Some(CodecId::Zstd),
            "lz4" => Some(CodecId::Lz4),
            "brotli" => Some(CodecId::Brotli),
            "lzma" => Some(CodecId::Lzma),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum OuterCodecError {
    #[error("outer compression error: {0}")]
    Compression(String),
    #[error("outer decompression error: {0}")]
    Decompression(String),
    #[error("unrecognised outer codec id {0} — cannot decode without it")]
    UnavailableCodec(u8),
}

pub trait OuterCodec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, OuterCodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, OuterCodecError>;
}

struct NoneCodec;
impl OuterCodec for NoneCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::None
    }
    fn compress(&self, data: &[u8], _level: i32) -> Result<Vec<u8>, OuterCodecError> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, OuterCodecError> {
        Ok(data.to_vec())
    }
}

struct ZstdCodec;
impl OuterCodec for ZstdCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::Zstd
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, OuterCodecError> {
        zstd::encode_all(data, level).map_err(|e| OuterCodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, OuterCodecError> {
        zstd::decode_all(data).map_err(|e| OuterCodecError::Decompression(e.to_string()))
    }
}

struct Lz4Codec;
impl OuterCodec for Lz4Codec {
    fn codec_id(&self) -> CodecId {
        CodecId::Lz4
    }
    fn compress(&self, data: &[u8], _level: i32) -> Result<Vec<u8>, OuterCodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, OuterCodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| OuterCodecError::Decompression(e.to_string()))
    }
}

struct BrotliCodec;
impl OuterCodec for BrotliCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::Brotli
    }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, OuterCodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
            w.write_all(data)
                .map_err(|e| OuterCodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, OuterCodecError> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .map_err(|e| OuterCodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

struct LzmaCodec;
impl OuterCodec for LzmaCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::Lzma
    }
    fn compress(&self, data: &[u8], _level: i32) -> Result<Vec<u8>, OuterCodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| OuterCodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, OuterCodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| OuterCodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub fn get_codec(id: CodecId) -> Box<dyn OuterCodec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Zstd => Box::new(ZstdCodec),
        CodecId::Lz4 => Box::new(Lz4Codec),
        CodecId::Brotli => Box::new(BrotliCodec),
        CodecId::Lzma => Box::new(LzmaCodec),
    }
}

pub fn get_codec_by_u8(id: u8) -> Result<Box<dyn OuterCodec>, OuterCodecError> {
    CodecId::from_u8(id)
        .map(get_codec)
        .ok_or(OuterCodecError::UnavailableCodec(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_builtin_codec_roundtrips() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(64);
        for id in [CodecId::None, CodecId::Zstd, CodecId::Lz4, CodecId::Brotli, CodecId::Lzma] {
            let codec = get_codec(id);
            let compressed = codec.compress(&data, 3).unwrap();
            let decompressed = codec.decompress(&compressed).unwrap();
            assert_eq!(decompressed, data, "codec {:?} failed to roundtrip", id);
        }
    }

    #[test]
    fn unknown_codec_id_fails_hard() {
        assert!(matches!(get_codec_by_u8(200), Err(OuterCodecError::UnavailableCodec(200))));
    }
}
