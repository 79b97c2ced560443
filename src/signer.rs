// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: trustedge — Privacy and trust at the edge.

//! RSA-PKCS#1-v1.5 signing/verification over SHA-256 digests.
//!
//! PEM ingestion accepts either PKCS#1 or PKCS#8, the same fallback order
//! `trustedge-core`'s asymmetric key loading uses for its DER forms.

use crate::error::{KtError, Result};
use crate::header::CertificateSlot;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Load a PEM-encoded RSA private key, trying PKCS#1 then PKCS#8.
pub fn load_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| KtError::KeyParse(format!("RSA private key: {e}")))
}

/// Load a PEM-encoded RSA public key, trying PKCS#1 then PKCS#8/SPKI.
pub fn load_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
        .map_err(|e| KtError::KeyParse(format!("RSA public key: {e}")))
}

/// Verify that `key`'s modulus size matches what `slot` expects.
pub fn check_slot(key_bits: usize, slot: CertificateSlot) -> Result<()> {
    let expected_bits = slot.signature_len() * 8;
    if key_bits != expected_bits {
        return Err(KtError::SlotMismatch {
            key_bits,
            slot_bits: expected_bits,
        });
    }
    Ok(())
}

/// Sign a SHA-256 digest with PKCS#1 v1.5 padding. Output length is
/// determined by the key's modulus size (1024 -> 128 bytes, 2048 -> 256).
pub fn sign(digest: &[u8; 32], key: &RsaPrivateKey) -> Result<Vec<u8>> {
    key.sign(Pkcs1v15Sign::new::<Sha256>(), digest)
        .map_err(|e| KtError::KeyParse(format!("RSA sign failed: {e}")))
}

/// Verify a PKCS#1 v1.5 signature over a SHA-256 digest.
pub fn verify(pubkey: &RsaPublicKey, digest: &[u8; 32], signature: &[u8]) -> Result<()> {
    pubkey
        .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
        .map_err(|_| KtError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;

    fn make_keypair(bits: usize) -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, bits).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    fn digest32(data: &[u8]) -> [u8; 32] {
        use sha2::{Digest, Sha256 as Sha2};
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha2::digest(data));
        out
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let (private, public) = make_keypair(2048);
        let digest = digest32(b"payload bytes");
        let signature = sign(&digest, &private).unwrap();
        assert_eq!(signature.len(), 256);
        verify(&public, &digest, &signature).unwrap();
    }

    #[test]
    fn flipping_a_byte_breaks_verification() {
        let (private, public) = make_keypair(2048);
        let digest = digest32(b"payload bytes");
        let mut signature = sign(&digest, &private).unwrap();
        signature[0] ^= 0xFF;
        assert!(matches!(
            verify(&public, &digest, &signature),
            Err(KtError::BadSignature)
        ));
    }

    #[test]
    fn pem_roundtrip_pkcs1() {
        let (private, _) = make_keypair(1024);
        let pem = private
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();
        let loaded = load_private_key_pem(&pem).unwrap();
        assert_eq!(loaded.size(), private.size());
    }

    #[test]
    fn malformed_pem_is_key_parse_error() {
        assert!(matches!(
            load_private_key_pem("not a pem"),
            Err(KtError::KeyParse(_))
        ));
    }

    #[test]
    fn slot_mismatch_is_detected() {
        let (private, _) = make_keypair(1024);
        let key_bits = private.size() * 8;
        assert!(check_slot(key_bits, CertificateSlot::Prod2K).is_err());
        assert!(check_slot(key_bits, CertificateSlot::Prod1K).is_ok());
    }

    #[test]
    fn public_pem_roundtrip() {
        let (_, public) = make_keypair(2048);
        let pem = public.to_public_key_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        let loaded = load_public_key_pem(&pem).unwrap();
        assert_eq!(loaded, public);
    }
}
