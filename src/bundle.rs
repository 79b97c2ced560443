// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! End-to-end create/convert/extract flows wiring codec + hasher + header
//! codec + ID catalog + signer + archive pipeline together.
//!
//! Parse state machine: `Start -> ReadMagic -> SelectVariant -> ReadHeader
//! -> (VerifyEnvelope?) -> ReadPayload -> VerifyDigest -> Emit`. Any edge
//! failing aborts the whole operation (no retries, no partial output) —
//! every fallible step here returns early via `?`, so the function itself
//! is the state machine.

use crate::archive;
use crate::codec;
use crate::config::Config;
use crate::error::{KtError, Result};
use crate::hash::{self, HashAlgo};
use crate::header::{
    BundleKind, CertificateSlot, OtaHeader, OtaV2Device, OtaV2Header, RecoveryHeader,
    RecoveryV2Header, UpdateSignatureHeader, MAGIC_LEN, OTA_BLOCK_SIZE, RECOVERY_BLOCK_SIZE,
    SIGNATURE_BLOCK_SIZE,
};
use crate::signer;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

/// Caller-supplied fields for `create`. Which fields apply depends on
/// `kind`; unused fields are ignored.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub kind: BundleKind,
    pub source_rev: u64,
    pub target_rev: u64,
    pub devices: Vec<u16>,
    pub platform: u32,
    pub board: u32,
    pub minor: u32,
    pub certificate_slot: CertificateSlot,
}

/// The parsed result of `convert`: the recovered kind, relevant header
/// fields (for display/verification by the caller), and the plain
/// `tar.gz` bytes of the inner archive.
pub struct ConvertedBundle {
    pub kind: BundleKind,
    pub devices: Vec<u16>,
    pub platform: Option<u32>,
    pub board: Option<u32>,
    pub inner_archive: Vec<u8>,
}

/// Create a new signed, obfuscated bundle from `input_dir` (payload tree +
/// install script) and write it to `output`.
pub fn create<W: Write>(
    input_dir: &Path,
    signing_key: &RsaPrivateKey,
    opts: &CreateOptions,
    config: &Config,
    output: &mut W,
) -> Result<()> {
    // Build the inner tar.gz into a temp file.
    let mut inner_tmp = tempfile::tempfile_in(&config.temp_dir)?;
    archive::compose(input_dir, signing_key, &mut inner_tmp)?;
    inner_tmp.seek(std::io::SeekFrom::Start(0))?;
    let inner_len = inner_tmp.metadata()?.len() as usize;

    if is_opaque(opts.kind) {
        // Opaque passthrough kinds carry the composed archive as-is: no
        // obfuscation layer, no digest header.
        let magic = opaque_magic(opts.kind)?;
        output.write_all(magic)?;
        std::io::copy(&mut inner_tmp, output)?;
        return Ok(());
    }

    // Obfuscate the payload into a second temp file, so we can hash the
    // *post-obfuscation* bytes before emitting the header that precedes
    // them.
    let mut obfuscated_tmp = tempfile::tempfile_in(&config.temp_dir)?;
    codec::munge(&mut inner_tmp, &mut obfuscated_tmp, inner_len, false)?;

    let digest_algo = digest_algo_for(opts.kind);
    let md5 = match digest_algo {
        HashAlgo::Md5 => hash::md5_hex(&mut obfuscated_tmp)?,
        _ => String::new(),
    };
    obfuscated_tmp.seek(std::io::SeekFrom::Start(0))?;

    if opts.kind == BundleKind::UpdateSignature {
        // Wrap the obfuscated payload in a signature envelope: the
        // signature is RSA over the SHA-256 of the wrapped body.
        let mut wrapped = Vec::with_capacity(inner_len);
        std::io::copy(&mut obfuscated_tmp, &mut wrapped)?;
        let digest32 = sha256_digest32(&wrapped);
        let signature = signer::sign(&digest32, signing_key)?;

        let sig_header = UpdateSignatureHeader {
            certificate_slot: opts.certificate_slot,
        };
        output.write_all(&sig_header.encode())?;
        output.write_all(&signature)?;
        output.write_all(&wrapped)?;
    } else {
        let (magic, header_bytes) = build_header(opts, &md5)?;
        output.write_all(magic)?;
        output.write_all(&header_bytes[MAGIC_LEN..])?;
        std::io::copy(&mut obfuscated_tmp, output)?;
    }

    Ok(())
}

fn is_opaque(kind: BundleKind) -> bool {
    matches!(
        kind,
        BundleKind::UserDataPackage | BundleKind::AndroidUpdate | BundleKind::ComponentUpdate
    )
}

fn opaque_magic(kind: BundleKind) -> Result<&'static [u8; 4]> {
    match kind {
        BundleKind::UserDataPackage => Ok(b"UDP1"),
        BundleKind::AndroidUpdate => Ok(b"AND1"),
        BundleKind::ComponentUpdate => Ok(b"CMP1"),
        other => Err(KtError::UnsupportedKind(format!("{other:?}"))),
    }
}

fn digest_algo_for(kind: BundleKind) -> HashAlgo {
    match kind {
        BundleKind::OTAUpdate
        | BundleKind::OTAUpdateV2
        | BundleKind::RecoveryUpdate
        | BundleKind::RecoveryUpdateV2 => HashAlgo::Md5,
        _ => HashAlgo::None,
    }
}

fn sha256_digest32(data: &[u8]) -> [u8; 32] {
    let digest_hex = hash::sha256_hex_bytes(data);
    let bytes = hex::decode(digest_hex).expect("sha256_hex_bytes always emits valid hex");
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}

/// Returns `(magic, header_frame)` for OTA/OTAv2/Recovery/RecoveryV2 kinds.
/// `header_frame` is the full fixed-width frame with bytes `0..MAGIC_LEN`
/// reserved (the caller writes the real magic alongside, not from this
/// buffer's own placeholder bytes).
fn build_header(opts: &CreateOptions, md5: &str) -> Result<(&'static [u8; 4], Vec<u8>)> {
    match opts.kind {
        BundleKind::OTAUpdate => {
            let device = *opts
                .devices
                .first()
                .ok_or_else(|| KtError::InvalidHeader("OTA update requires a device".into()))?;
            let header = OtaHeader {
                source_rev: opts.source_rev as u32,
                target_rev: opts.target_rev as u32,
                device,
                optional: 0,
                md5: md5.to_string(),
            };
            Ok((b"FC02", header.encode().to_vec()))
        }
        BundleKind::OTAUpdateV2 => {
            if opts.devices.is_empty() {
                return Err(KtError::InvalidHeader(
                    "OTAv2 update requires at least one device".into(),
                ));
            }
            let devices = opts
                .devices
                .iter()
                .map(|&device| OtaV2Device {
                    device,
                    critical: 0,
                    md5: md5.to_string(),
                })
                .collect();
            let header = OtaV2Header {
                source_rev: opts.source_rev,
                target_rev: opts.target_rev,
                devices,
            };
            Ok((b"FC04", header.encode()?))
        }
        BundleKind::RecoveryUpdate => {
            let device = *opts
                .devices
                .first()
                .ok_or_else(|| KtError::InvalidHeader("Recovery update requires a device".into()))?;
            let header = RecoveryHeader {
                md5: md5.to_string(),
                magic_1: 0,
                magic_2: 0,
                minor: opts.minor,
                device: device as u32,
            };
            Ok((b"FB01", header.encode().to_vec()))
        }
        BundleKind::RecoveryUpdateV2 => {
            let header = RecoveryV2Header {
                target_rev: opts.target_rev,
                md5: md5.to_string(),
                magic_1: 0,
                magic_2: 0,
                minor: opts.minor,
                platform: opts.platform,
                header_rev: 2,
                board: opts.board,
            };
            Ok((b"FB02", header.encode()))
        }
        other @ (BundleKind::UpdateSignature
        | BundleKind::UserDataPackage
        | BundleKind::AndroidUpdate
        | BundleKind::ComponentUpdate) => Err(KtError::UnsupportedKind(format!("{other:?}"))),
    }
}

/// Convert a signed bundle: detect magic, decode header, verify envelope
/// (if any), strip header, deobfuscate, return the inner `tar.gz` bytes.
pub fn convert<R: Read + Seek>(
    input: &mut R,
    verify_key: Option<&RsaPublicKey>,
    config: &Config,
) -> Result<ConvertedBundle> {
    let mut magic = [0u8; MAGIC_LEN];
    read_exact(input, &mut magic)?;

    let mut probe_kind = BundleKind::from_magic(&magic, None)?;

    if probe_kind == BundleKind::UpdateSignature {
        let mut sig_header = [0u8; SIGNATURE_BLOCK_SIZE - MAGIC_LEN];
        read_exact(input, &mut sig_header)?;
        let mut full = [0u8; SIGNATURE_BLOCK_SIZE];
        full[0..4].copy_from_slice(&magic);
        full[4..].copy_from_slice(&sig_header);
        let sig_header = UpdateSignatureHeader::decode(&full)?;

        let sig_len = sig_header.certificate_slot.signature_len();
        let mut signature = vec![0u8; sig_len];
        read_exact(input, &mut signature)?;

        let mut wrapped = Vec::new();
        input.read_to_end(&mut wrapped)?;

        if let Some(pubkey) = verify_key {
            let digest32 = sha256_digest32(&wrapped);
            signer::verify(pubkey, &digest32, &signature)?;
        }

        let mut inner_cursor = std::io::Cursor::new(wrapped);
        return convert(&mut inner_cursor, None, config);
    }

    match probe_kind {
        BundleKind::OTAUpdate => {
            let mut body = [0u8; OTA_BLOCK_SIZE - MAGIC_LEN];
            read_exact(input, &mut body)?;
            let mut full = [0u8; OTA_BLOCK_SIZE];
            full[0..MAGIC_LEN].copy_from_slice(&magic);
            full[MAGIC_LEN..].copy_from_slice(&body);
            let header = OtaHeader::decode(&full)?;
            let payload = read_remaining_and_verify_md5(input, &header.md5)?;
            let inner_archive = deobfuscate(payload, config)?;
            Ok(ConvertedBundle {
                kind: probe_kind,
                devices: vec![header.device],
                platform: None,
                board: None,
                inner_archive,
            })
        }
        BundleKind::OTAUpdateV2 => {
            let mut prefix_and_tails = Vec::new();
            // Read the 18-byte prefix first to learn num_devices, then the
            // exact tail bytes it implies.
            let mut prefix = [0u8; 18];
            read_exact(input, &mut prefix)?;
            let num_devices = u16::from_le_bytes(prefix[16..18].try_into().unwrap()) as usize;
            prefix_and_tails.extend_from_slice(&prefix);
            let tail_bytes_needed = num_devices * 36;
            let mut tails = vec![0u8; tail_bytes_needed];
            read_exact(input, &mut tails)?;
            prefix_and_tails.extend_from_slice(&tails);
            // Surplus zero padding up to the 60-byte frame, if any.
            let consumed = prefix_and_tails.len();
            if consumed < OTA_BLOCK_SIZE - MAGIC_LEN {
                let mut pad = vec![0u8; OTA_BLOCK_SIZE - MAGIC_LEN - consumed];
                read_exact(input, &mut pad)?;
            }

            let mut full = Vec::with_capacity(MAGIC_LEN + prefix_and_tails.len());
            full.extend_from_slice(&magic);
            full.extend_from_slice(&prefix_and_tails);
            let header = OtaV2Header::decode(&full)?;
            let devices: Vec<u16> = header.devices.iter().map(|d| d.device).collect();
            // All devices in a single bundle share one md5 payload digest.
            let md5 = header
                .devices
                .first()
                .map(|d| d.md5.clone())
                .unwrap_or_default();
            let payload = read_remaining_and_verify_md5(input, &md5)?;
            let inner_archive = deobfuscate(payload, config)?;
            Ok(ConvertedBundle {
                kind: probe_kind,
                devices,
                platform: None,
                board: None,
                inner_archive,
            })
        }
        BundleKind::RecoveryUpdate | BundleKind::RecoveryUpdateV2 => {
            let mut body = vec![0u8; RECOVERY_BLOCK_SIZE - MAGIC_LEN];
            read_exact(input, &mut body)?;
            let mut full = vec![0u8; RECOVERY_BLOCK_SIZE];
            full[0..MAGIC_LEN].copy_from_slice(&magic);
            full[MAGIC_LEN..].copy_from_slice(&body);

            // FB02 needs header_rev to disambiguate v1/v2; peek it from the
            // v2 layout location before committing to a decode path.
            let header_rev_guess = u32::from_le_bytes(full[60..64].try_into().unwrap_or([0; 4]));
            probe_kind = BundleKind::from_magic(&magic, Some(header_rev_guess))?;

            if probe_kind == BundleKind::RecoveryUpdateV2 {
                let header = RecoveryV2Header::decode(&full)?;
                let payload = read_remaining_and_verify_md5(input, &header.md5)?;
                let inner_archive = deobfuscate(payload, config)?;
                Ok(ConvertedBundle {
                    kind: probe_kind,
                    devices: vec![],
                    platform: Some(header.platform),
                    board: Some(header.board),
                    inner_archive,
                })
            } else {
                let header = RecoveryHeader::decode(&full)?;
                let payload = read_remaining_and_verify_md5(input, &header.md5)?;
                let inner_archive = deobfuscate(payload, config)?;
                Ok(ConvertedBundle {
                    kind: probe_kind,
                    devices: vec![header.device as u16],
                    platform: None,
                    board: None,
                    inner_archive,
                })
            }
        }
        BundleKind::UserDataPackage | BundleKind::AndroidUpdate | BundleKind::ComponentUpdate => {
            // Opaque passthrough: no header, no obfuscation layer.
            let mut inner_archive = Vec::new();
            input.read_to_end(&mut inner_archive)?;
            Ok(ConvertedBundle {
                kind: probe_kind,
                devices: vec![],
                platform: None,
                board: None,
                inner_archive,
            })
        }
        BundleKind::UpdateSignature => unreachable!("handled above"),
    }
}

fn read_remaining_and_verify_md5<R: Read>(input: &mut R, expected: &str) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    input.read_to_end(&mut payload)?;
    let actual = hash::md5_hex(&mut std::io::Cursor::new(&payload))?;
    if actual != expected {
        return Err(KtError::IntegrityFailure {
            algo: HashAlgo::Md5,
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(payload)
}

fn deobfuscate(payload: Vec<u8>, config: &Config) -> Result<Vec<u8>> {
    let mut tmp_out = tempfile::tempfile_in(&config.temp_dir)?;
    codec::demunge(&mut std::io::Cursor::new(&payload), &mut tmp_out, payload.len(), false)?;
    tmp_out.seek(std::io::SeekFrom::Start(0))?;
    let mut out = Vec::new();
    tmp_out.read_to_end(&mut out)?;
    Ok(out)
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
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

/// Extract: convert, then stream the inner `tar.gz` into `dest_dir`.
pub fn extract<R: Read + Seek>(
    input: &mut R,
    verify_key: Option<&RsaPublicKey>,
    config: &Config,
    dest_dir: &Path,
) -> Result<()> {
    let converted = convert(input, verify_key, config)?;
    let gz = flate2::read::GzDecoder::new(std::io::Cursor::new(converted.inner_archive));
    let mut tar = tar::Archive::new(gz);
    std::fs::create_dir_all(dest_dir)?;
    tar.unpack(dest_dir)?;
    Ok(())
}

/// Convenience wrapper for callers working with files on disk rather than
/// in-memory streams. Stages into a temp file and renames on success so no
/// partial output is ever visible (spec §4.7 "no partial output").
pub fn create_to_file(
    input_dir: &Path,
    signing_key: &RsaPrivateKey,
    opts: &CreateOptions,
    config: &Config,
    output_path: &Path,
) -> Result<()> {
    let tmp_path = output_path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        if let Err(e) = create(input_dir, signing_key, opts, config, &mut tmp) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
    }
    std::fs::rename(&tmp_path, output_path)?;
    Ok(())
}
