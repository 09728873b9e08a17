//! Server half of the envelope: RSA PKCS#1 v1.5 decryption of batch
//! payloads under the private key.

use anyhow::{bail, Context};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

pub fn load_private_key(path: &str) -> anyhow::Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read private key '{path}'"))?;
    RsaPrivateKey::from_pkcs1_pem(&pem).context("failed to parse PKCS#1 private key")
}

pub fn decrypt(body: &[u8], private_key: &RsaPrivateKey) -> anyhow::Result<Vec<u8>> {
    if body.is_empty() {
        bail!("encrypted body is empty");
    }
    private_key
        .decrypt(Pkcs1v15Encrypt, body)
        .context("failed to decrypt payload")
}
