//! Envelope encryption of batch payloads: RSA PKCS#1 v1.5 under the
//! server's public key. The payload must fit a single RSA block
//! (key size − 11 bytes); an oversized batch fails the current tick.

use anyhow::{bail, Context};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

pub fn encrypt_with_key_file(body: &[u8], public_key_path: &str) -> anyhow::Result<Vec<u8>> {
    let pem = std::fs::read_to_string(public_key_path)
        .with_context(|| format!("unable to read public key '{public_key_path}'"))?;
    encrypt(body, &pem)
}

pub fn encrypt(body: &[u8], public_key_pem: &str) -> anyhow::Result<Vec<u8>> {
    if body.is_empty() || public_key_pem.is_empty() {
        bail!("public key or body is empty");
    }

    let public_key = RsaPublicKey::from_pkcs1_pem(public_key_pem)
        .context("failed to parse PKCS#1 public key")?;

    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, body)
        .context("failed to encrypt payload")
}
