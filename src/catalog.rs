// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! Device/platform/board identifier lookups.
//!
//! The full historical device table is a "pure data catalog" external to
//! this crate's responsibility (spec §1); what lives here is the lookup
//! *logic* plus a representative subset of entries grounded in
//! `kindle_tool.h`, enough to exercise every code path (legacy single-byte
//! codes, the newer base-32-addressable range, and the unknown-code
//! fallback).

use crate::error::{KtError, Result};

/// Base-32 alphabet used for serial-derived device codes: digits plus
/// uppercase letters, excluding I/O/U (so the engraved serial never reads
/// as an ambiguous glyph).
const BASE32_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTVWXYZ";

/// A resolved device name, or the numeric code if it isn't in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceName {
    Known(&'static str),
    Unknown(u32),
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceName::Known(name) => write!(f, "{name}"),
            DeviceName::Unknown(code) => write!(f, "0x{code:04X}"),
        }
    }
}

/// Representative subset of `Device` (legacy single-byte and base-32 era).
const DEVICES: &[(u32, &str)] = &[
    (0x00, "KindleUnknown"),
    (0x08, "Kindle3WiFi"),
    (0x0E, "Kindle4NonTouch"),
    (0x24, "KindlePaperWhiteWiFi"),
    (0x13, "KindleVoyageWiFi"),
    (0xC6, "KindleBasic"),
    (0x201, "KindlePaperWhite3WiFi"),
    (0x202, "KindlePaperWhite3WiFi3G"),
    (0x20C, "KindleOasisWiFi"),
    (0x269, "KindleBasic2"),
];

/// Full `Platform` enum — there are few enough that the whole table is
/// carried (not a "pure data catalog" in the same sense as devices).
const PLATFORMS: &[(u8, &str)] = &[
    (0x00, "Plat_Unspecified"),
    (0x01, "MarioDeprecated"),
    (0x02, "Luigi"),
    (0x03, "Banjo"),
    (0x04, "Yoshi"),
    (0x05, "YoshimeProto"),
    (0x06, "Yoshime"),
    (0x07, "Wario"),
    (0x08, "Duet"),
    (0x09, "Heisenberg"),
    (0x0A, "Zelda"),
    (0x0B, "Rex"),
    (0x0C, "Bellatrix"),
    (0x0D, "Bellatrix3"),
    (0x0E, "Bellatrix4"),
];

/// Full `Board` enum (the original only ever shipped three live values).
const BOARDS: &[(u8, &str)] = &[
    (0x00, "Board_Unspecified"),
    (0x03, "Tequila"),
    (0x05, "Whitney"),
];

/// Whether unknown numeric codes are accepted (`Unknown(code)`) or
/// rejected. Surfaced from [`crate::config::Config::allow_unknown_device_codes`].
pub fn decode_device(code: u32, allow_unknown: bool) -> Result<DeviceName> {
    if let Some((_, name)) = DEVICES.iter().find(|(c, _)| *c == code) {
        return Ok(DeviceName::Known(name));
    }
    if allow_unknown {
        Ok(DeviceName::Unknown(code))
    } else {
        Err(KtError::UnknownDevice(code))
    }
}

pub fn decode_platform(code: u8) -> Result<&'static str> {
    PLATFORMS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .ok_or(KtError::UnknownPlatform(code))
}

pub fn decode_board(code: u8) -> Result<&'static str> {
    BOARDS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .ok_or(KtError::UnknownBoard(code))
}

fn base32_decode_char(c: u8) -> Option<u32> {
    BASE32_ALPHABET
        .iter()
        .position(|&b| b == c.to_ascii_uppercase())
        .map(|p| p as u32)
}

/// Decode a 3-character base-32 device code (e.g. `"0G1"`) into its numeric
/// form.
pub fn base32_decode(s: &str) -> Result<u32> {
    let bytes = s.as_bytes();
    if bytes.len() != 3 {
        return Err(KtError::InvalidHeader(format!(
            "base32 device code must be 3 characters, got {}",
            bytes.len()
        )));
    }
    let mut value = 0u32;
    for &b in bytes {
        let digit = base32_decode_char(b).ok_or_else(|| {
            KtError::InvalidHeader(format!("invalid base32 digit '{}' in device code", b as char))
        })?;
        value = value * BASE32_ALPHABET.len() as u32 + digit;
    }
    Ok(value)
}

/// Extract a device code from a 16-character serial number. If the fifth
/// character (index 4) is non-decimal, the device is encoded as base-32 in
/// characters 3..6; otherwise it's legacy hex in characters 1..2.
pub fn encode_device_from_serial(serial: &[u8; 16]) -> Result<u32> {
    let fifth = serial[4];
    if !fifth.is_ascii_digit() {
        let chunk = std::str::from_utf8(&serial[3..6])
            .map_err(|_| KtError::InvalidHeader("serial number is not valid ASCII".into()))?;
        base32_decode(chunk)
    } else {
        let chunk = std::str::from_utf8(&serial[1..3])
            .map_err(|_| KtError::InvalidHeader("serial number is not valid ASCII".into()))?;
        u32::from_str_radix(chunk, 16)
            .map_err(|_| KtError::InvalidHeader(format!("invalid hex device code '{chunk}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_device() {
        assert_eq!(
            decode_device(0x24, false).unwrap(),
            DeviceName::Known("KindlePaperWhiteWiFi")
        );
    }

    #[test]
    fn unknown_device_rejected_by_default() {
        assert!(matches!(
            decode_device(0xFFFF, false),
            Err(KtError::UnknownDevice(0xFFFF))
        ));
    }

    #[test]
    fn unknown_device_accepted_when_relaxed() {
        assert_eq!(
            decode_device(0xFFFF, true).unwrap(),
            DeviceName::Unknown(0xFFFF)
        );
    }

    #[test]
    fn platform_and_board_catalog_roundtrip_names() {
        assert_eq!(decode_platform(0x0C).unwrap(), "Bellatrix");
        assert_eq!(decode_board(0x00).unwrap(), "Board_Unspecified");
        assert!(decode_platform(0xFF).is_err());
        assert!(decode_board(0xFF).is_err());
    }

    #[test]
    fn base32_alphabet_excludes_i_o_u() {
        assert!(!BASE32_ALPHABET.contains(&b'I'));
        assert!(!BASE32_ALPHABET.contains(&b'O'));
        assert!(!BASE32_ALPHABET.contains(&b'U'));
    }

    #[test]
    fn base32_decode_is_positional_and_rejects_excluded_letters() {
        assert_eq!(base32_decode("000").unwrap(), 0);
        assert!(base32_decode("0I0").is_err());
        assert!(base32_decode("AB").is_err()); // wrong length
    }

    #[test]
    fn serial_selects_base32_when_fifth_char_nondecimal() {
        let mut serial = [b'0'; 16];
        serial[3] = b'0';
        serial[4] = b'G'; // non-decimal -> base32 path
        serial[5] = b'1';
        assert_eq!(
            encode_device_from_serial(&serial).unwrap(),
            base32_decode("0G1").unwrap()
        );
    }

    #[test]
    fn serial_selects_hex_when_fifth_char_decimal() {
        let mut serial = [b'0'; 16];
        serial[4] = b'5'; // decimal -> legacy hex path
        serial[1] = b'2';
        serial[2] = b'4';
        assert_eq!(encode_device_from_serial(&serial).unwrap(), 0x24);
    }
}
