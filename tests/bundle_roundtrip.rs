// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

use einktool::{
    bundle::{self, CreateOptions},
    config::Config,
    header::{BundleKind, CertificateSlot},
    signer,
};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

fn make_payload_dir() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("install.sh"), b"#!/bin/sh\necho installing\n").unwrap();
    fs::write(dir.path().join("firmware.bin"), b"pretend firmware bytes").unwrap();
    dir
}

fn keypair(bits: usize) -> (RsaPrivateKey, RsaPublicKey) {
    let private = RsaPrivateKey::new(&mut OsRng, bits).unwrap();
    let public = RsaPublicKey::from(&private);
    (private, public)
}

#[test]
fn ota_v1_round_trips_and_preserves_device() {
    let payload_dir = make_payload_dir();
    let (key, _pub) = keypair(1024);
    let config = Config::default();

    let opts = CreateOptions {
        kind: BundleKind::OTAUpdate,
        source_rev: 10,
        target_rev: 20,
        devices: vec![0x24],
        platform: 0,
        board: 0,
        minor: 0,
        certificate_slot: CertificateSlot::Developer,
    };

    let mut bundle_bytes = Vec::new();
    bundle::create(payload_dir.path(), &key, &opts, &config, &mut bundle_bytes).unwrap();

    let mut cursor = Cursor::new(bundle_bytes);
    let converted = bundle::convert(&mut cursor, None, &config).unwrap();

    assert_eq!(converted.kind, BundleKind::OTAUpdate);
    assert_eq!(converted.devices, vec![0x24]);
    assert!(!converted.inner_archive.is_empty());
}

#[test]
fn ota_v2_round_trips_multiple_devices() {
    let payload_dir = make_payload_dir();
    let (key, _pub) = keypair(1024);
    let config = Config::default();

    let opts = CreateOptions {
        kind: BundleKind::OTAUpdateV2,
        source_rev: 1,
        target_rev: 5,
        devices: vec![0x201, 0x202, 0x20C],
        platform: 0,
        board: 0,
        minor: 0,
        certificate_slot: CertificateSlot::Developer,
    };

    let mut bundle_bytes = Vec::new();
    bundle::create(payload_dir.path(), &key, &opts, &config, &mut bundle_bytes).unwrap();

    let mut cursor = Cursor::new(bundle_bytes);
    let converted = bundle::convert(&mut cursor, None, &config).unwrap();

    assert_eq!(converted.kind, BundleKind::OTAUpdateV2);
    assert_eq!(converted.devices, vec![0x201, 0x202, 0x20C]);
}

#[test]
fn recovery_v2_preserves_platform_and_board() {
    let payload_dir = make_payload_dir();
    let (key, _pub) = keypair(1024);
    let config = Config::default();

    let opts = CreateOptions {
        kind: BundleKind::RecoveryUpdateV2,
        source_rev: 0,
        target_rev: 99,
        devices: vec![],
        platform: 0x0C, // Bellatrix
        board: 0x05,    // Whitney
        minor: 3,
        certificate_slot: CertificateSlot::Developer,
    };

    let mut bundle_bytes = Vec::new();
    bundle::create(payload_dir.path(), &key, &opts, &config, &mut bundle_bytes).unwrap();

    let mut cursor = Cursor::new(bundle_bytes);
    let converted = bundle::convert(&mut cursor, None, &config).unwrap();

    assert_eq!(converted.kind, BundleKind::RecoveryUpdateV2);
    assert_eq!(converted.platform, Some(0x0C));
    assert_eq!(converted.board, Some(0x05));
}

#[test]
fn signature_envelope_round_trips_and_detects_tampering() {
    let payload_dir = make_payload_dir();
    let (key, pubkey) = keypair(1024);
    let config = Config::default();

    let opts = CreateOptions {
        kind: BundleKind::UpdateSignature,
        source_rev: 0,
        target_rev: 0,
        devices: vec![],
        platform: 0,
        board: 0,
        minor: 0,
        certificate_slot: CertificateSlot::Developer,
    };

    let mut bundle_bytes = Vec::new();
    bundle::create(payload_dir.path(), &key, &opts, &config, &mut bundle_bytes).unwrap();

    let mut cursor = Cursor::new(bundle_bytes.clone());
    bundle::convert(&mut cursor, Some(&pubkey), &config).unwrap();

    // Flip a byte inside the signed body; verification must now fail.
    let mut tampered = bundle_bytes;
    let flip_at = tampered.len() - 1;
    tampered[flip_at] ^= 0xFF;
    let mut cursor = Cursor::new(tampered);
    let err = bundle::convert(&mut cursor, Some(&pubkey), &config).unwrap_err();
    assert!(matches!(err, einktool::KtError::BadSignature));
}

#[test]
fn relaxed_config_accepts_unknown_device_codes() {
    let config = Config {
        temp_dir: std::env::temp_dir(),
        allow_unknown_device_codes: true,
    };
    let name = einktool::catalog::decode_device(0xBEEF, config.allow_unknown_device_codes).unwrap();
    assert_eq!(name, einktool::catalog::DeviceName::Unknown(0xBEEF));

    let strict = Config::default();
    assert!(einktool::catalog::decode_device(0xBEEF, strict.allow_unknown_device_codes).is_err());
}

#[test]
fn truncated_bundle_is_rejected_without_panicking() {
    let payload_dir = make_payload_dir();
    let (key, _pub) = keypair(1024);
    let config = Config::default();

    let opts = CreateOptions {
        kind: BundleKind::OTAUpdate,
        source_rev: 1,
        target_rev: 2,
        devices: vec![0x24],
        platform: 0,
        board: 0,
        minor: 0,
        certificate_slot: CertificateSlot::Developer,
    };

    let mut bundle_bytes = Vec::new();
    bundle::create(payload_dir.path(), &key, &opts, &config, &mut bundle_bytes).unwrap();

    let truncated = &bundle_bytes[..bundle_bytes.len() / 2];
    let mut cursor = Cursor::new(truncated.to_vec());
    let err = bundle::convert(&mut cursor, None, &config).unwrap_err();
    assert!(matches!(
        err,
        einktool::KtError::Truncated { .. } | einktool::KtError::IntegrityFailure { .. }
    ));
}

#[test]
fn signer_pem_roundtrip_matches_bundle_signing_key() {
    let (key, pubkey) = keypair(2048);
    let pem = {
        use rsa::pkcs8::EncodePrivateKey;
        key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap().to_string()
    };
    let loaded = signer::load_private_key_pem(&pem).unwrap();
    assert_eq!(RsaPublicKey::from(&loaded), pubkey);
}
