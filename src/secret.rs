//! Transfer-channel secret generation.
//!
//! Both transient instances receive the same randomly generated key through
//! their boot scripts and use it to authenticate and configure the transfer
//! channel. The key exists only for the lifetime of one run and is never
//! persisted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors raised while generating a transfer secret.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum SecretError {
    /// Raised when the requested size is zero or not a multiple of 8.
    #[error("key size must be a positive multiple of 8 bits, got {bits}")]
    InvalidKeySize {
        /// Requested size in bits.
        bits: u32,
    },
}

/// A base64-encoded random key shared by the two transfer instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferSecret {
    encoded: String,
}

impl TransferSecret {
    /// Generates a secret of `bits` random bits from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidKeySize`] when `bits` is zero or not a
    /// multiple of 8.
    pub fn generate(bits: u32) -> Result<Self, SecretError> {
        if bits == 0 || bits % 8 != 0 {
            return Err(SecretError::InvalidKeySize { bits });
        }
        let mut raw = vec![0_u8; (bits / 8) as usize];
        OsRng.fill_bytes(&mut raw);
        Ok(Self {
            encoded: STANDARD.encode(raw),
        })
    }

    /// Base64 encoding of the key, suitable for boot-script embedding.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(7)]
    #[case(1023)]
    fn rejects_sizes_that_are_not_byte_aligned(#[case] bits: u32) {
        let err = TransferSecret::generate(bits).expect_err("size should be rejected");
        assert_eq!(err, SecretError::InvalidKeySize { bits });
    }

    #[rstest]
    #[case(8, 1)]
    #[case(2048, 256)]
    fn encodes_the_requested_number_of_bytes(#[case] bits: u32, #[case] expected_bytes: usize) {
        let secret = TransferSecret::generate(bits).expect("generation should succeed");
        let decoded = STANDARD
            .decode(secret.encoded())
            .expect("output should be valid base64");
        assert_eq!(decoded.len(), expected_bytes);
    }

    #[rstest]
    fn successive_secrets_differ() {
        let first = TransferSecret::generate(128).expect("generation should succeed");
        let second = TransferSecret::generate(128).expect("generation should succeed");
        assert_ne!(first, second);
    }
}
