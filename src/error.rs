// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

use crate::hash::HashAlgo;
use std::path::PathBuf;

/// Errors surfaced at the bundle codec boundary.
///
/// Every operation is a single pass over finite input; there is no local
/// recovery except for unknown device codes when the relaxed-mode flag is
/// set (see [`crate::catalog`]).
#[derive(Debug, thiserror::Error)]
pub enum KtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated input: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid magic number: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("unknown device code: 0x{0:X}")]
    UnknownDevice(u32),

    #[error("unknown platform code: 0x{0:X}")]
    UnknownPlatform(u8),

    #[error("unknown board code: 0x{0:X}")]
    UnknownBoard(u8),

    #[error("unsupported bundle kind: {0:?}")]
    UnsupportedKind(String),

    #[error("missing install script in {0}")]
    MissingScript(PathBuf),

    #[error("ambiguous install script: found {0} candidates in {1}")]
    AmbiguousScript(usize, PathBuf),

    #[error("{algo:?} digest mismatch: expected {expected}, got {actual}")]
    IntegrityFailure {
        algo: HashAlgo,
        expected: String,
        actual: String,
    },

    #[error("key parse error: {0}")]
    KeyParse(String),

    #[error("certificate slot mismatch: key is {key_bits}-bit, slot expects {slot_bits}-bit")]
    SlotMismatch { key_bits: usize, slot_bits: usize },

    #[error("signature verification failed")]
    BadSignature,
}

pub type Result<T> = std::result::Result<T, KtError>;
