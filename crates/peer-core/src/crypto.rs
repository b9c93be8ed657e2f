use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

const NONCE_LEN: usize = 12;

/// AES-256-GCM at-rest encryption for user API keys.
///
/// Ciphertext layout: base64(nonce || ct). The key comes from
/// `ENCRYPTION_KEY` (base64, 32 bytes) and is required whenever users
/// carry their own provider keys; a missing key at decrypt time is fatal.
pub struct KeyCipher {
    cipher: Aes256Gcm,
}

impl KeyCipher {
    pub fn from_base64(key_b64: &str) -> Result<Self> {
        let bytes = B64.decode(key_b64).context("decode ENCRYPTION_KEY")?;
        if bytes.len() != 32 {
            return Err(anyhow!(
                "ENCRYPTION_KEY must be 32 bytes, got {}",
                bytes.len()
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encrypt: {e}"))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ct);
        Ok(B64.encode(out))
    }

    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String> {
        let bytes = B64.decode(ciphertext_b64).context("decode ciphertext")?;
        if bytes.len() <= NONCE_LEN {
            return Err(anyhow!("ciphertext too short"));
        }
        let (nonce, ct) = bytes.split_at(NONCE_LEN);
        let pt = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|e| anyhow!("decrypt: {e}"))?;
        String::from_utf8(pt).context("ciphertext not utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> KeyCipher {
        KeyCipher::from_base64(&B64.encode([7u8; 32])).unwrap()
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        let ct = c.encrypt("sk-test-123").unwrap();
        assert_ne!(ct, "sk-test-123");
        assert_eq!(c.decrypt(&ct).unwrap(), "sk-test-123");
    }

    #[test]
    fn distinct_nonces() {
        let c = cipher();
        assert_ne!(c.encrypt("x").unwrap(), c.encrypt("x").unwrap());
    }

    #[test]
    fn rejects_short_key() {
        assert!(KeyCipher::from_base64(&B64.encode([1u8; 16])).is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let c = cipher();
        let mut ct = c.encrypt("secret").unwrap();
        ct.replace_range(ct.len() - 2.., "AA");
        assert!(c.decrypt(&ct).is_err());
    }
}
