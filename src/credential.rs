// Turns a scanned card's serial number into the JSON body the gate server expects.

use crate::cipher::CredentialCipher;
use crate::error::CredentialError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedCredential {
    pub ciphertext: Vec<u8>,
    pub len: usize,
}

impl EncryptedCredential {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.ciphertext)
    }
}

/// Wire body: `{"encrypted_data":[<byte>,...]}`. serde writes a `Vec<u8>` as
/// an array of integers, which is exactly what the server reads back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialEnvelope {
    pub encrypted_data: Vec<u8>,
}

impl CredentialEnvelope {
    /// Compact JSON, its length is the request's content length.
    pub fn to_body(&self) -> Vec<u8> {
        // A struct holding a Vec<u8> cannot fail to serialize
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl From<EncryptedCredential> for CredentialEnvelope {
    fn from(credential: EncryptedCredential) -> Self {
        CredentialEnvelope {
            encrypted_data: credential.ciphertext,
        }
    }
}

pub fn encrypt_serial(
    serial_number: u64,
    cipher: &dyn CredentialCipher,
) -> Result<EncryptedCredential, CredentialError> {
    let plaintext = serial_number.to_string();
    let ciphertext = cipher.encrypt(plaintext.as_bytes())?;

    if ciphertext.is_empty() || ciphertext.len() % cipher.block_size() != 0 {
        return Err(CredentialError::EncryptionFailed(format!(
            "ciphertext of {} bytes is not a whole number of {}-byte blocks",
            ciphertext.len(),
            cipher.block_size()
        )));
    }

    Ok(EncryptedCredential {
        len: ciphertext.len(),
        ciphertext,
    })
}

pub fn encode_credential(
    serial_number: u64,
    cipher: &dyn CredentialCipher,
) -> Result<CredentialEnvelope, CredentialError> {
    let credential = encrypt_serial(serial_number, cipher)?;
    tracing::debug!(
        len = credential.len,
        ciphertext = %credential.to_hex(),
        "encrypted card serial"
    );
    Ok(credential.into())
}
