// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! Streaming digests over a file, emitted as lowercase hex.

use crate::error::Result;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash algorithm selector. `None` means the digest field is unused for a
/// given bundle kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    None,
    Md5,
    Sha256,
}

/// MD5 hex length (32 chars).
pub const MD5_HEX_LEN: usize = 32;
/// SHA-256 hex length (64 chars).
pub const SHA256_HEX_LEN: usize = 64;

/// Rewind `reader` to the start, stream it through MD5, and return lowercase
/// hex. Leaves the stream position at EOF.
pub fn md5_hex<R: Read + Seek>(reader: &mut R) -> Result<String> {
    reader.seek(SeekFrom::Start(0))?;
    let mut hasher = Md5::new();
    stream_into(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Rewind `reader` to the start, stream it through SHA-256, and return
/// lowercase hex. Leaves the stream position at EOF.
pub fn sha256_hex<R: Read + Seek>(reader: &mut R) -> Result<String> {
    reader.seek(SeekFrom::Start(0))?;
    let mut hasher = Sha256::new();
    stream_into(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Digest raw bytes already in memory, no seek/rewind involved.
pub fn md5_hex_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub fn sha256_hex_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn stream_into<R: Read, D: Digest>(reader: &mut R, hasher: &mut D) -> Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn md5_hex_length_and_known_vector() {
        let mut data = Cursor::new(b"abc".to_vec());
        let digest = md5_hex(&mut data).unwrap();
        assert_eq!(digest.len(), MD5_HEX_LEN);
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sha256_hex_length_and_known_vector() {
        let mut data = Cursor::new(b"abc".to_vec());
        let digest = sha256_hex(&mut data).unwrap();
        assert_eq!(digest.len(), SHA256_HEX_LEN);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn leaves_stream_at_eof_and_rewinds_on_entry() {
        let mut data = Cursor::new(b"hello world".to_vec());
        let first = md5_hex(&mut data).unwrap();
        // stream is now at EOF; calling again rewinds and gets the same digest
        let second = md5_hex(&mut data).unwrap();
        assert_eq!(first, second);
        assert_eq!(data.position(), 11);
    }
}
