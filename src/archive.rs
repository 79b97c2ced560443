// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! Compose/decompose the inner gzipped tar archive: payload files, their
//! `.sig` siblings, and the `update-filelist.dat` manifest.

use crate::error::{KtError, Result};
use crate::hash::{md5_hex, sha256_hex_bytes};
use crate::signer;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "update-filelist.dat";

/// Manifest entry role, determined from the path suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Script,
    Bin,
    UImage,
}

impl EntryKind {
    pub fn from_path(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.eq_ignore_ascii_case("uImage") {
            EntryKind::UImage
        } else if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".ffs") {
            EntryKind::Script
        } else if name.len() >= 3 && name[name.len() - 3..].eq_ignore_ascii_case(".sh") {
            EntryKind::Script
        } else if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".bin") {
            EntryKind::Bin
        } else {
            EntryKind::File
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Script => "script",
            EntryKind::Bin => "bin",
            EntryKind::UImage => "uimage",
        }
    }
}

struct StagedEntry {
    rel_path: PathBuf,
    data: Vec<u8>,
    mode: u32,
    kind: EntryKind,
    md5: String,
    signature: Vec<u8>,
}

/// Walk `root` recursively and collect every regular file, relative to
/// `root`, sorted byte-wise ascending by path (spec §5: reproducible
/// manifest ordering).
fn collect_tree(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                walk(&path, root, out)?;
            } else {
                out.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort_by(|a, b| a.to_string_lossy().as_bytes().cmp(b.to_string_lossy().as_bytes()));
    Ok(out)
}

fn file_mode(path: &Path) -> Result<u32> {
    let meta = fs::metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(meta.permissions().mode() & 0o777)
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        Ok(0o644)
    }
}

/// Compose the inner archive: walk `input_dir`, sign and hash every file,
/// write the payload + `.sig` siblings + manifest as a gzipped tar into
/// `output`. Exactly one `.ffs`/`.sh` script must be present.
pub fn compose<W: Write>(input_dir: &Path, signing_key: &RsaPrivateKey, output: W) -> Result<()> {
    let rel_paths = collect_tree(input_dir)?;

    let mut staged = Vec::with_capacity(rel_paths.len());
    let mut script_count = 0usize;

    for rel in &rel_paths {
        let abs = input_dir.join(rel);
        let data = fs::read(&abs)?;
        let mode = file_mode(&abs)?;
        let kind = EntryKind::from_path(rel);
        if kind == EntryKind::Script {
            script_count += 1;
        }

        let mut cursor = Cursor::new(&data);
        let md5 = md5_hex(&mut cursor)?;
        let sha256 = sha256_hex_bytes(&data);
        let digest_bytes = hex::decode(&sha256).expect("sha256_hex_bytes always emits valid hex");
        let mut digest32 = [0u8; 32];
        digest32.copy_from_slice(&digest_bytes);
        let signature = signer::sign(&digest32, signing_key)?;

        staged.push(StagedEntry {
            rel_path: rel.clone(),
            data,
            mode,
            kind,
            md5,
            signature,
        });
    }

    if script_count == 0 {
        return Err(KtError::MissingScript(input_dir.to_path_buf()));
    }
    if script_count > 1 {
        return Err(KtError::AmbiguousScript(script_count, input_dir.to_path_buf()));
    }

    let gz = GzEncoder::new(output, Compression::default());
    let mut tar = tar::Builder::new(gz);

    let mut manifest = String::new();
    for entry in &staged {
        append_bytes(&mut tar, &entry.rel_path, &entry.data, entry.mode)?;

        let sig_path = sig_sibling(&entry.rel_path);
        append_bytes(&mut tar, &sig_path, &entry.signature, 0o644)?;

        manifest.push_str(&format!(
            "{} {:o} {} {} {} {}\n",
            entry.kind.as_str(),
            entry.mode,
            0,
            0,
            entry.rel_path.display(),
            entry.md5
        ));
    }

    append_bytes(&mut tar, Path::new(MANIFEST_NAME), manifest.as_bytes(), 0o644)?;

    let gz = tar.into_inner()?;
    gz.finish()?;
    Ok(())
}

fn sig_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sig");
    PathBuf::from(name)
}

fn append_bytes<W: Write>(tar: &mut tar::Builder<W>, path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    tar.append_data(&mut header, path, data)?;
    Ok(())
}

/// Decompose a gzipped tar `input` into `output_dir`, verifying each
/// payload file's `.sig` sibling against `pubkey`.
pub fn decompose<R: Read>(input: R, output_dir: &Path, pubkey: &RsaPublicKey) -> Result<()> {
    let gz = GzDecoder::new(input);
    let mut tar = tar::Archive::new(gz);
    fs::create_dir_all(output_dir)?;

    let mut payload_sha256: std::collections::HashMap<PathBuf, [u8; 32]> = std::collections::HashMap::new();
    let mut signatures: std::collections::HashMap<PathBuf, Vec<u8>> = std::collections::HashMap::new();

    for entry in tar.entries()? {
        let mut entry = entry?;
        let rel_path = entry.path()?.into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        let dest = output_dir.join(&rel_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, &data)?;

        if rel_path.extension().and_then(|e| e.to_str()) == Some("sig") {
            let target = strip_sig_suffix(&rel_path).unwrap_or_else(|| rel_path.with_extension(""));
            signatures.insert(target, data);
        } else if rel_path.file_name().and_then(|n| n.to_str()) != Some(MANIFEST_NAME) {
            let sha256 = sha256_hex_bytes(&data);
            let digest_bytes = hex::decode(&sha256).unwrap();
            let mut digest32 = [0u8; 32];
            digest32.copy_from_slice(&digest_bytes);
            payload_sha256.insert(rel_path, digest32);
        }
    }

    for (path, digest) in &payload_sha256 {
        let signature = signatures
            .get(path)
            .ok_or_else(|| KtError::InvalidHeader(format!("missing signature for {}", path.display())))?;
        signer::verify(pubkey, digest, signature)?;
    }

    Ok(())
}

fn strip_sig_suffix(path: &Path) -> Option<PathBuf> {
    let s = path.to_str()?;
    s.strip_suffix(".sig").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    #[test]
    fn entry_kind_from_suffix() {
        assert_eq!(EntryKind::from_path(Path::new("install.sh")), EntryKind::Script);
        assert_eq!(EntryKind::from_path(Path::new("install.ffs")), EntryKind::Script);
        assert_eq!(EntryKind::from_path(Path::new("firmware.bin")), EntryKind::Bin);
        assert_eq!(EntryKind::from_path(Path::new("uImage")), EntryKind::UImage);
        assert_eq!(EntryKind::from_path(Path::new("readme.txt")), EntryKind::File);
    }

    #[test]
    fn compose_requires_exactly_one_script() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), b"data").unwrap();
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let mut out = Vec::new();
        let err = compose(dir.path(), &key, &mut out).unwrap_err();
        assert!(matches!(err, KtError::MissingScript(_)));
    }

    #[test]
    fn compose_rejects_ambiguous_script() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.sh"), b"x").unwrap();
        fs::write(dir.path().join("b.ffs"), b"y").unwrap();
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let mut out = Vec::new();
        let err = compose(dir.path(), &key, &mut out).unwrap_err();
        assert!(matches!(err, KtError::AmbiguousScript(2, _)));
    }

    #[test]
    fn compose_then_decompose_roundtrips_and_verifies() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("install.sh"), b"#!/bin/sh\necho hi\n").unwrap();
        fs::write(dir.path().join("firmware.bin"), b"binary payload bytes").unwrap();

        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pubkey = RsaPublicKey::from(&key);

        let mut archive_bytes = Vec::new();
        compose(dir.path(), &key, &mut archive_bytes).unwrap();

        let out_dir = tempdir().unwrap();
        decompose(Cursor::new(&archive_bytes), out_dir.path(), &pubkey).unwrap();

        assert_eq!(
            fs::read(out_dir.path().join("firmware.bin")).unwrap(),
            b"binary payload bytes"
        );
        assert!(out_dir.path().join(MANIFEST_NAME).exists());
        assert!(out_dir.path().join("firmware.bin.sig").exists());

        let manifest = fs::read_to_string(out_dir.path().join(MANIFEST_NAME)).unwrap();
        assert!(manifest.ends_with('\n'));
        let mut lines: Vec<&str> = manifest.lines().collect();
        let sorted = {
            let mut s = lines.clone();
            s.sort();
            s
        };
        lines.sort();
        assert_eq!(lines, sorted);
    }

    #[test]
    fn decompose_rejects_tampered_payload() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("install.sh"), b"echo hi\n").unwrap();
        fs::write(dir.path().join("firmware.bin"), b"original bytes").unwrap();

        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pubkey = RsaPublicKey::from(&key);

        let mut archive_bytes = Vec::new();
        compose(dir.path(), &key, &mut archive_bytes).unwrap();

        // Re-sign with a different key so verification must fail.
        let other_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let other_pub = RsaPublicKey::from(&other_key);

        let out_dir = tempdir().unwrap();
        let err = decompose(Cursor::new(&archive_bytes), out_dir.path(), &other_pub).unwrap_err();
        assert!(matches!(err, KtError::BadSignature));
    }
}
