// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! Fixed-width binary header codec for each bundle variant.
//!
//! All integers are little-endian. ASCII digest fields are not
//! null-terminated and are always exactly 32 (MD5) or 64 (SHA-256) bytes
//! wide. Header block sizes are constant per kind regardless of populated
//! content (60 bytes for OTA/Signature, 131072 for Recovery).

use crate::error::{KtError, Result};

pub const MAGIC_LEN: usize = 4;
pub const OTA_BLOCK_SIZE: usize = 60;
pub const SIGNATURE_BLOCK_SIZE: usize = 60;
pub const RECOVERY_BLOCK_SIZE: usize = 131_072;
pub const OTA_V2_PREFIX_SIZE: usize = 18;
pub const OTA_V2_TAIL_SIZE: usize = 36;

/// The bundle family, selected by the four-byte magic at file offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    UpdateSignature,
    OTAUpdate,
    OTAUpdateV2,
    RecoveryUpdate,
    RecoveryUpdateV2,
    UserDataPackage,
    AndroidUpdate,
    ComponentUpdate,
}

impl BundleKind {
    /// Select a variant from a four-byte magic. `header_rev` disambiguates
    /// `FB02`, which is RecoveryUpdate under header revision 1 and
    /// RecoveryUpdateV2 under revision 2 — callers that have not yet parsed
    /// the header pass `None` and get the v1 default; the orchestrator
    /// re-checks after decoding.
    pub fn from_magic(magic: &[u8; MAGIC_LEN], header_rev: Option<u32>) -> Result<Self> {
        Ok(match magic {
            b"SP01" => BundleKind::UpdateSignature,
            b"FC02" | b"FD03" => BundleKind::OTAUpdate,
            b"FC04" | b"FD04" | b"FL01" => BundleKind::OTAUpdateV2,
            b"FB01" => BundleKind::RecoveryUpdate,
            b"FB02" => {
                if header_rev == Some(2) {
                    BundleKind::RecoveryUpdateV2
                } else {
                    BundleKind::RecoveryUpdate
                }
            }
            b"UDP1" => BundleKind::UserDataPackage,
            b"AND1" => BundleKind::AndroidUpdate,
            b"CMP1" => BundleKind::ComponentUpdate,
            other => return Err(KtError::InvalidMagic(*other)),
        })
    }

    /// Fixed header block size for this kind, including the 4-byte magic.
    pub fn header_block_size(&self) -> usize {
        match self {
            BundleKind::RecoveryUpdate | BundleKind::RecoveryUpdateV2 => RECOVERY_BLOCK_SIZE,
            _ => OTA_BLOCK_SIZE,
        }
    }
}

/// `CertificateNumber` — selects RSA key length (128/128/256 raw signature
/// bytes for Developer/Prod1K/Prod2K).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateSlot {
    Developer,
    Prod1K,
    Prod2K,
    Unknown(u32),
}

impl CertificateSlot {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x00 => CertificateSlot::Developer,
            0x01 => CertificateSlot::Prod1K,
            0x02 => CertificateSlot::Prod2K,
            other => CertificateSlot::Unknown(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            CertificateSlot::Developer => 0x00,
            CertificateSlot::Prod1K => 0x01,
            CertificateSlot::Prod2K => 0x02,
            CertificateSlot::Unknown(v) => v,
        }
    }

    /// Raw RSA signature size in bytes for this slot's modulus.
    pub fn signature_len(self) -> usize {
        match self {
            CertificateSlot::Developer | CertificateSlot::Prod1K => 128,
            CertificateSlot::Prod2K => 256,
            CertificateSlot::Unknown(_) => 256,
        }
    }
}

/// UpdateSignature header: magic + certificate slot selector + padding,
/// 60-byte frame total (the remainder of the frame is the wrapped inner
/// bundle, not part of this struct).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSignatureHeader {
    pub certificate_slot: CertificateSlot,
}

impl UpdateSignatureHeader {
    pub fn encode(&self) -> [u8; SIGNATURE_BLOCK_SIZE] {
        let mut out = [0u8; SIGNATURE_BLOCK_SIZE];
        out[0..4].copy_from_slice(b"SP01");
        out[4..8].copy_from_slice(&self.certificate_slot.to_u32().to_le_bytes());
        // bytes 8..12 are the documented 4-byte padding; 12..60 unused in
        // this frame (the signature body reference lives alongside, not
        // packed into this struct).
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SIGNATURE_BLOCK_SIZE {
            return Err(KtError::InvalidHeader(format!(
                "UpdateSignature header too short: {} < {}",
                buf.len(),
                SIGNATURE_BLOCK_SIZE
            )));
        }
        let slot = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Ok(Self {
            certificate_slot: CertificateSlot::from_u32(slot),
        })
    }
}

/// OTA v1 header. `encode`/`decode` operate on the full `OTA_BLOCK_SIZE`
/// frame, the same convention every other header in this module uses:
/// bytes `0..MAGIC_LEN` are reserved for the magic the caller writes
/// alongside (and are ignored on decode), fields start at `MAGIC_LEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaHeader {
    pub source_rev: u32,
    pub target_rev: u32,
    pub device: u16,
    pub optional: u8,
    pub md5: String,
}

impl OtaHeader {
    pub fn encode(&self) -> [u8; OTA_BLOCK_SIZE] {
        let mut out = [0u8; OTA_BLOCK_SIZE];
        out[4..8].copy_from_slice(&self.source_rev.to_le_bytes());
        out[8..12].copy_from_slice(&self.target_rev.to_le_bytes());
        out[12..14].copy_from_slice(&self.device.to_le_bytes());
        out[14] = self.optional;
        out[15] = 0; // unused
        write_hex_field(&mut out[16..48], &self.md5);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < OTA_BLOCK_SIZE {
            return Err(KtError::InvalidHeader(format!(
                "OTA header too short: {} < {}",
                buf.len(),
                OTA_BLOCK_SIZE
            )));
        }
        Ok(Self {
            source_rev: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            target_rev: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            device: u16::from_le_bytes(buf[12..14].try_into().unwrap()),
            optional: buf[14],
            md5: read_hex_field(&buf[16..48])?,
        })
    }
}

/// One device's entry in the OTA v2 tail (36 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaV2Device {
    pub device: u16,
    pub critical: u8,
    pub md5: String,
}

impl OtaV2Device {
    fn encode(&self) -> [u8; OTA_V2_TAIL_SIZE] {
        let mut out = [0u8; OTA_V2_TAIL_SIZE];
        out[0..2].copy_from_slice(&self.device.to_le_bytes());
        out[2] = self.critical;
        out[3] = 0; // unused
        write_hex_field(&mut out[4..36], &self.md5);
        out
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            device: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            critical: buf[2],
            md5: read_hex_field(&buf[4..36])?,
        })
    }
}

/// OTA v2 header: bytes `0..MAGIC_LEN` reserved for the caller's magic,
/// then an 18-byte fixed prefix, then `num_devices` 36-byte tails.
/// Invariant: `num_devices >= 1`, each device entry distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaV2Header {
    pub source_rev: u64,
    pub target_rev: u64,
    pub devices: Vec<OtaV2Device>,
}

impl OtaV2Header {
    /// Total encoded length, including the reserved magic bytes: prefix +
    /// one tail per device, zero-padded up to the 60-byte OTA frame when
    /// `num_devices == 1`.
    pub fn encoded_len(&self) -> usize {
        let raw = MAGIC_LEN + OTA_V2_PREFIX_SIZE + self.devices.len() * OTA_V2_TAIL_SIZE;
        raw.max(OTA_BLOCK_SIZE)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.devices.is_empty() {
            return Err(KtError::InvalidHeader(
                "OTAv2 header requires at least one device".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for d in &self.devices {
            if !seen.insert(d.device) {
                return Err(KtError::InvalidHeader(format!(
                    "duplicate device code 0x{:X} in OTAv2 header",
                    d.device
                )));
            }
        }

        let mut out = vec![0u8; self.encoded_len()];
        out[4..12].copy_from_slice(&self.source_rev.to_le_bytes());
        out[12..20].copy_from_slice(&self.target_rev.to_le_bytes());
        out[20..22].copy_from_slice(&(self.devices.len() as u16).to_le_bytes());
        let mut off = MAGIC_LEN + OTA_V2_PREFIX_SIZE;
        for d in &self.devices {
            out[off..off + OTA_V2_TAIL_SIZE].copy_from_slice(&d.encode());
            off += OTA_V2_TAIL_SIZE;
        }
        // Any surplus within the 60-byte frame (num_devices == 1 case) is
        // left zeroed, as required.
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let prefix_end = MAGIC_LEN + OTA_V2_PREFIX_SIZE;
        if buf.len() < prefix_end {
            return Err(KtError::InvalidHeader(format!(
                "OTAv2 prefix too short: {} < {}",
                buf.len(),
                prefix_end
            )));
        }
        let source_rev = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let target_rev = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        let num_devices = u16::from_le_bytes(buf[20..22].try_into().unwrap()) as usize;
        if num_devices == 0 {
            return Err(KtError::InvalidHeader(
                "OTAv2 header declares zero devices".into(),
            ));
        }

        let needed = prefix_end + num_devices * OTA_V2_TAIL_SIZE;
        if buf.len() < needed {
            return Err(KtError::InvalidHeader(format!(
                "OTAv2 header too short for {} devices: {} < {}",
                num_devices,
                buf.len(),
                needed
            )));
        }

        let mut devices = Vec::with_capacity(num_devices);
        let mut off = prefix_end;
        for _ in 0..num_devices {
            devices.push(OtaV2Device::decode(&buf[off..off + OTA_V2_TAIL_SIZE])?);
            off += OTA_V2_TAIL_SIZE;
        }
        // Surplus bytes within the 60-byte frame (single-device case) are
        // ignored on decode.

        Ok(Self {
            source_rev,
            target_rev,
            devices,
        })
    }
}

/// Recovery v1 header. Occupies the first ~60 bytes of a 131072-byte block;
/// the remainder is unused padding the caller must still emit/skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryHeader {
    pub md5: String,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub device: u32,
}

impl RecoveryHeader {
    pub fn encode(&self) -> [u8; RECOVERY_BLOCK_SIZE] {
        let mut out = vec![0u8; RECOVERY_BLOCK_SIZE];
        write_hex_field(&mut out[12..44], &self.md5);
        out[44..48].copy_from_slice(&self.magic_1.to_le_bytes());
        out[48..52].copy_from_slice(&self.magic_2.to_le_bytes());
        out[52..56].copy_from_slice(&self.minor.to_le_bytes());
        out[56..60].copy_from_slice(&self.device.to_le_bytes());
        out.try_into().unwrap_or_else(|_| unreachable!())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECOVERY_BLOCK_SIZE {
            return Err(KtError::InvalidHeader(format!(
                "Recovery header block too short: {} < {}",
                buf.len(),
                RECOVERY_BLOCK_SIZE
            )));
        }
        Ok(Self {
            md5: read_hex_field(&buf[12..44])?,
            magic_1: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            magic_2: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            minor: u32::from_le_bytes(buf[52..56].try_into().unwrap()),
            device: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
        })
    }
}

/// Recovery v2 / H2 header, same 131072-byte outer block, different
/// interior layout (target_rev is a u64, plus platform/header_rev/board).
/// The digest field is a 32-byte MD5 hex string, same width as the v1
/// header's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryV2Header {
    pub target_rev: u64,
    pub md5: String,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub platform: u32,
    pub header_rev: u32,
    pub board: u32,
}

impl RecoveryV2Header {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; RECOVERY_BLOCK_SIZE];
        // 4 reserved bytes at offset 0.
        out[4..12].copy_from_slice(&self.target_rev.to_le_bytes());
        write_hex_field(&mut out[12..44], &self.md5);
        out[44..48].copy_from_slice(&self.magic_1.to_le_bytes());
        out[48..52].copy_from_slice(&self.magic_2.to_le_bytes());
        out[52..56].copy_from_slice(&self.minor.to_le_bytes());
        out[56..60].copy_from_slice(&self.platform.to_le_bytes());
        out[60..64].copy_from_slice(&self.header_rev.to_le_bytes());
        out[64..68].copy_from_slice(&self.board.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECOVERY_BLOCK_SIZE {
            return Err(KtError::InvalidHeader(format!(
                "RecoveryV2 header block too short: {} < {}",
                buf.len(),
                RECOVERY_BLOCK_SIZE
            )));
        }
        Ok(Self {
            target_rev: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            md5: read_hex_field(&buf[12..44])?,
            magic_1: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            magic_2: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            minor: u32::from_le_bytes(buf[52..56].try_into().unwrap()),
            platform: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
            header_rev: u32::from_le_bytes(buf[60..64].try_into().unwrap()),
            board: u32::from_le_bytes(buf[64..68].try_into().unwrap()),
        })
    }
}

fn write_hex_field(dst: &mut [u8], hex_str: &str) {
    debug_assert_eq!(dst.len(), hex_str.len());
    dst.copy_from_slice(hex_str.as_bytes());
}

fn read_hex_field(src: &[u8]) -> Result<String> {
    std::str::from_utf8(src)
        .map(|s| s.to_string())
        .map_err(|_| KtError::InvalidHeader("digest field is not valid ASCII".into()))
}
