use anyhow::{Result, anyhow};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

/// Salt length matches the HMAC-SHA512 block size.
pub const SALT_LEN: usize = 64;

/// Salted HMAC-SHA512 password hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordHasher;

impl PasswordHasher {
    /// Returns `(hash, salt)` for a new password.
    pub fn create_hash(&self, password: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut salt = vec![0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let hash = compute(password, &salt)?;
        Ok((hash, salt))
    }

    #[must_use]
    pub fn verify(&self, password: &str, hash: &[u8], salt: &[u8]) -> bool {
        let Ok(computed) = compute(password, salt) else {
            return false;
        };

        if computed.len() != hash.len() {
            return false;
        }

        computed.ct_eq(hash).into()
    }
}

fn compute(password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha512::new_from_slice(salt).map_err(|e| anyhow!("Invalid HMAC key: {e}"))?;
    mac.update(password.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher;
        let (hash, salt) = hasher.create_hash("correct horse").unwrap();

        assert_eq!(salt.len(), SALT_LEN);
        assert_eq!(hash.len(), 64);
        assert!(hasher.verify("correct horse", &hash, &salt));
        assert!(!hasher.verify("wrong horse", &hash, &salt));
    }

    #[test]
    fn test_salts_differ() {
        let hasher = PasswordHasher;
        let (hash_a, salt_a) = hasher.create_hash("same").unwrap();
        let (hash_b, salt_b) = hasher.create_hash("same").unwrap();
        assert_ne!(salt_a, salt_b);
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn test_length_mismatch_is_false() {
        let hasher = PasswordHasher;
        let (hash, salt) = hasher.create_hash("pw").unwrap();
        assert!(!hasher.verify("pw", &hash[..32], &salt));
        assert!(!hasher.verify("pw", &[], &salt));
    }
}
