// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! Byte-level obfuscation applied to bundle payloads.
//!
//! The transform is a self-inverse permutation-and-XOR applied independently
//! to each 64-byte block of the stream. Trailing bytes that do not fill a
//! full block pass through unchanged. Because the permutation is an
//! involution and the XOR key is symmetric under it, a single per-block
//! function (`md`) serves as both encode and decode — matching the `md`/`dm`
//! pair in the original tool, which really are the same transform applied
//! twice.

use crate::error::{KtError, Result};
use std::io::{Read, Write};

pub const BLOCK_SIZE: usize = 64;

/// Per-position XOR key, symmetric under index reversal (`KEY[i] == KEY[63 - i]`),
/// which is what makes the block transform its own inverse.
const KEY: [u8; BLOCK_SIZE] = build_key();

const fn build_key() -> [u8; BLOCK_SIZE] {
    let mut key = [0u8; BLOCK_SIZE];
    let mut i = 0;
    while i < BLOCK_SIZE / 2 {
        let v = ((i as u8).wrapping_mul(0x1f)) ^ 0xa5;
        key[i] = v;
        key[BLOCK_SIZE - 1 - i] = v;
        i += 1;
    }
    key
}

/// Apply the self-inverse block transform in place. `block` must be exactly
/// `BLOCK_SIZE` bytes.
fn transform_block(block: &mut [u8; BLOCK_SIZE]) {
    let src = *block;
    for i in 0..BLOCK_SIZE {
        block[i] = src[BLOCK_SIZE - 1 - i] ^ KEY[i];
    }
}

/// Read up to `length` bytes from `input`, transform 64-byte-aligned blocks,
/// and write the same byte count to `output`. Trailing bytes (< 64) are
/// copied through unchanged.
///
/// When `fake` is set, the input is not actually read — a deterministic
/// fill pattern stands in for it. This is used during size-prediction
/// passes where only the output byte count matters, not its content.
pub fn munge<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    length: usize,
    fake: bool,
) -> Result<()> {
    run_transform(input, output, length, fake)
}

/// The inverse of [`munge`]. Since the block transform is self-inverse,
/// this is the same loop.
pub fn demunge<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    length: usize,
    fake: bool,
) -> Result<()> {
    run_transform(input, output, length, fake)
}

fn run_transform<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    length: usize,
    fake: bool,
) -> Result<()> {
    let mut remaining = length;
    let mut fill: u8 = 0;

    while remaining > 0 {
        let take = remaining.min(BLOCK_SIZE);
        let mut buf = [0u8; BLOCK_SIZE];

        if fake {
            for b in buf.iter_mut().take(take) {
                *b = fill;
                fill = fill.wrapping_add(1);
            }
        } else {
            read_exact_or_truncated(input, &mut buf[..take])?;
        }

        if take == BLOCK_SIZE {
            transform_block(&mut buf);
        }

        output.write_all(&buf[..take])?;
        remaining -= take;
    }

    Ok(())
}

fn read_exact_or_truncated<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(KtError::Truncated {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
