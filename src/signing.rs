// Derives the HMAC digest shared with the gate server, and the optional step
// that attaches it to outgoing requests.

use crate::error::{SetupError, TransportError};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const DIGEST_LEN: usize = 32;

/// HMAC-SHA256 of the secret key's decimal text, keyed by the application secret.
///
/// The gate server runs the same derivation on its side of the key exchange and
/// uses the result as the AES key for incoming credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningDigest([u8; DIGEST_LEN]);

impl SigningDigest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes in hex, enough to tell two digests apart in logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// Never print the full key material
impl fmt::Debug for SigningDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningDigest({}..)", self.fingerprint())
    }
}

pub fn derive_signing_digest(
    shared_secret: &str,
    secret_key: u64,
) -> Result<SigningDigest, SetupError> {
    let secret_key_text = secret_key.to_string();
    tracing::debug!(
        payload_len = secret_key_text.len(),
        "deriving signing digest from secret key"
    );

    let mut mac = HmacSha256::new_from_slice(shared_secret.as_bytes())
        .map_err(|e| SetupError::Digest(e.to_string()))?;
    mac.update(secret_key_text.as_bytes());

    let digest: [u8; DIGEST_LEN] = mac.finalize().into_bytes().into();
    Ok(SigningDigest(digest))
}

/// Puts signing material onto an auth request before it is sent.
///
/// What the server expects here is not settled, so the step is pluggable and
/// the default attaches nothing.
pub trait AttachSigning: Send + Sync {
    fn attach(&self, digest: &SigningDigest, headers: &mut HeaderMap)
        -> Result<(), TransportError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignature;

impl AttachSigning for NoSignature {
    fn attach(&self, _: &SigningDigest, _: &mut HeaderMap) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Sends the digest as lowercase hex under a configured header.
#[derive(Debug, Clone)]
pub struct DigestHeader {
    name: HeaderName,
}

impl DigestHeader {
    pub fn new(name: &str) -> Result<Self, TransportError> {
        let name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                name: name.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(DigestHeader { name })
    }
}

impl AttachSigning for DigestHeader {
    fn attach(
        &self,
        digest: &SigningDigest,
        headers: &mut HeaderMap,
    ) -> Result<(), TransportError> {
        // hex is always a valid header value
        let value = HeaderValue::from_str(&digest.to_hex()).map_err(|e| {
            TransportError::InvalidHeader {
                name: self.name.to_string(),
                reason: e.to_string(),
            }
        })?;
        headers.insert(self.name.clone(), value);
        Ok(())
    }
}

/// Builds the attachment step from the optional `signature_header` setting.
pub fn attachment_from_config(
    header: Option<&str>,
) -> Result<Box<dyn AttachSigning>, TransportError> {
    match header {
        Some(name) => Ok(Box::new(DigestHeader::new(name)?)),
        None => Ok(Box::new(NoSignature)),
    }
}
