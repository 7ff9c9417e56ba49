use crate::error::{CredentialError, SetupError};
use crate::signing::SigningDigest;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const AES_BLOCK_SIZE: usize = 16;

/// Whatever encrypts a card's serial text before it goes on the wire.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CredentialError>;

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }
}

// AES-256-CBC with PKCS#7 padding, which is what the gate server decrypts with.
// The key is the signing digest, so the server can rebuild it from the secret
// key it agreed on with this device.
pub struct AesCbcCipher {
    key: [u8; 32],
    initialisation_vector: [u8; AES_BLOCK_SIZE],
}

impl AesCbcCipher {
    pub fn new(digest: &SigningDigest, iv: &[u8]) -> Result<Self, SetupError> {
        let initialisation_vector = <[u8; AES_BLOCK_SIZE]>::try_from(iv).map_err(|_| {
            SetupError::Cipher(format!(
                "IV must be {} bytes, got {}",
                AES_BLOCK_SIZE,
                iv.len()
            ))
        })?;

        Ok(AesCbcCipher {
            key: *digest.as_bytes(),
            initialisation_vector,
        })
    }

    /// Encrypts and decrypts a probe so a broken key or IV is caught before
    /// the first card is scanned.
    pub fn self_check(&self) -> Result<(), SetupError> {
        let probe = b"gate-reader-probe";
        let encrypted = self
            .encrypt(probe)
            .map_err(|e| SetupError::Cipher(e.to_string()))?;
        let decrypted = self
            .decrypt(&encrypted)
            .map_err(|e| SetupError::Cipher(e.to_string()))?;
        if decrypted != probe {
            return Err(SetupError::Cipher("probe did not survive a round trip".to_owned()));
        }
        Ok(())
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CredentialError> {
        Aes256CbcDec::new(&self.key.into(), &self.initialisation_vector.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CredentialError::EncryptionFailed(format!("bad padding: {}", e)))
    }
}

impl CredentialCipher for AesCbcCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CredentialError> {
        // PKCS#7 always pads, so a block-aligned input grows by a full block
        Ok(
            Aes256CbcEnc::new(&self.key.into(), &self.initialisation_vector.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        )
    }
}

#[cfg(test)]
mod cipher_tests {
    use super::*;
    use crate::signing::derive_signing_digest;

    fn default_cipher() -> AesCbcCipher {
        let digest = derive_signing_digest("example-secret-key", 123456789)
            .expect("Failed to derive digest");
        AesCbcCipher::new(&digest, b"1231231231231231").expect("Failed to build cipher")
    }

    #[test]
    fn known_ciphertexts() {
        let cipher = default_cipher();

        assert_eq!(
            hex::encode(cipher.encrypt(b"42").unwrap()),
            "b404eb10d1f4fa9b6216c2e721e4004d"
        );
        assert_eq!(
            hex::encode(cipher.encrypt(b"1234567890123456").unwrap()),
            "648f1ed42e182198569016cfdfda638e2185cc507b548aebe6c30ee6c172db45"
        );
        assert_eq!(
            hex::encode(cipher.encrypt(u64::MAX.to_string().as_bytes()).unwrap()),
            "728d905a70b81c502d07d8420dcc17dad73e8862c5e06a10ef706d2833c17610"
        );
    }

    #[test]
    fn ciphertext_is_block_aligned_for_every_serial_length() {
        let cipher = default_cipher();
        let mut serial: u64 = 1;
        loop {
            let text = serial.to_string();
            let encrypted = cipher.encrypt(text.as_bytes()).unwrap();
            assert_eq!(encrypted.len() % cipher.block_size(), 0);
            assert_eq!(encrypted.len(), (text.len() / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE);

            match serial.checked_mul(10) {
                Some(next) => serial = next + 7,
                None => break,
            }
        }
    }

    #[test]
    fn decrypt_recovers_serial_text() {
        let cipher = default_cipher();
        let encrypted = cipher.encrypt(b"4532356").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), b"4532356".to_vec());
    }

    #[test]
    fn self_check_passes() {
        assert!(default_cipher().self_check().is_ok());
    }

    #[test]
    fn wrong_iv_length_rejected() {
        let digest = derive_signing_digest("example-secret-key", 1).unwrap();
        assert!(matches!(
            AesCbcCipher::new(&digest, b"short"),
            Err(SetupError::Cipher(_))
        ));
    }
}
