//! Gzip Codec
//!
//! Compression collaborators for the compressing cache. The blocking
//! encoders run on tokio's blocking pool.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CacheError, Result};

/// Gzip-compresses `data` at the default level.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses gzip `data` into UTF-8 text.
pub fn gunzip(data: &[u8]) -> std::io::Result<String> {
    let mut decoder = GzDecoder::new(data);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(text)
}

// == Async Wrappers ==
pub async fn compress(text: String) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || gzip(text.as_bytes()))
        .await
        .map_err(|e| CacheError::Internal(format!("Compression task failed: {}", e)))?
        .map(Bytes::from)
        .map_err(|e| CacheError::Codec(format!("Gzip compression failed: {}", e)))
}

pub async fn decompress(bytes: Bytes) -> Result<String> {
    tokio::task::spawn_blocking(move || gunzip(&bytes))
        .await
        .map_err(|e| CacheError::Internal(format!("Decompression task failed: {}", e)))?
        .map_err(|e| CacheError::Codec(format!("Gzip decompression failed: {}", e)))
}
