//! Generic lossless byte-stream compression used by sender-side "auto
//! compress" and reversed on assembly. bzip2 is the corpus's choice
//! (`reticulum-legacy`'s `Cargo.toml` already depends on it; the teacher's
//! receiver decompresses with it but its sender never compresses — this
//! module supplies the missing compress half).

use std::io::{Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use crate::error::ParcelError;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, ParcelError> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| ParcelError::Codec(format!("compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ParcelError::Codec(format!("compression failed: {e}")))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, ParcelError> {
    let mut decoder = BzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ParcelError::Integrity)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data).unwrap();
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn compresses_repetitive_data_smaller() {
        let data = vec![0u8; 500_000];
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
    }
}
