/// Signing Key Material
///
/// Loaded once at startup and passed explicitly to the token codec. Any
/// problem with the key file is reported as a `SecretError` and is fatal for
/// the process.

use std::fmt;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use crate::configuration::{SecretSettings, SigningAlgorithm};
use crate::error::SecretError;

/// Minimum HS256 secret size, matching the SHA-256 block security level
pub const MIN_HMAC_SECRET_LEN: usize = 32;

/// Process-wide signing key. Never printed; `Debug` only shows the fingerprint.
#[derive(Clone)]
pub struct SigningKey {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    fingerprint: String,
}

impl SigningKey {
    /// Load key material as described by the settings
    pub fn load(settings: &SecretSettings) -> Result<Self, SecretError> {
        let key = match settings.algorithm {
            SigningAlgorithm::HS256 => {
                let secret = read_key_file(&settings.key_path)?;
                Self::from_hmac_secret(&secret)?
            }
            SigningAlgorithm::RS256 => {
                let public_key_path = settings
                    .public_key_path
                    .as_deref()
                    .ok_or(SecretError::MissingPublicKey)?;
                let private_pem = read_key_file(&settings.key_path)?;
                let public_pem = read_key_file(public_key_path)?;
                Self::from_rsa_pem(&private_pem, &public_pem)?
            }
        };

        tracing::info!(
            algorithm = ?key.algorithm,
            fingerprint = %key.fingerprint,
            "Signing key loaded"
        );
        Ok(key)
    }

    /// Build an HS256 key from a shared secret. Trailing whitespace (such as
    /// the newline an editor leaves behind) is not part of the secret.
    pub fn from_hmac_secret(secret: &[u8]) -> Result<Self, SecretError> {
        let secret = trim_trailing_whitespace(secret);
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(SecretError::TooShort(MIN_HMAC_SECRET_LEN));
        }

        Ok(Self {
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            fingerprint: fingerprint(secret),
        })
    }

    /// Build an RS256 key from a PEM private key and its PEM public key
    pub fn from_rsa_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, SecretError> {
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| SecretError::InvalidEncoding(format!("private key: {}", e)))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| SecretError::InvalidEncoding(format!("public key: {}", e)))?;

        let key = Self {
            algorithm: Algorithm::RS256,
            encoding,
            decoding,
            fingerprint: fingerprint(public_pem),
        };
        key.probe()?;
        Ok(key)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Sign and verify a throwaway payload so a mismatched pair fails now
    /// rather than on the first login.
    fn probe(&self) -> Result<(), SecretError> {
        let mut claims = std::collections::HashMap::new();
        claims.insert("probe", true);

        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| SecretError::InvalidEncoding(e.to_string()))?;

        let mut validation = Validation::new(self.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        jsonwebtoken::decode::<serde_json::Value>(&token, &self.decoding, &validation)
            .map(|_| ())
            .map_err(|_| SecretError::KeyPairMismatch)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

fn read_key_file(path: &str) -> Result<Vec<u8>, SecretError> {
    std::fs::read(Path::new(path)).map_err(|e| SecretError::Unreadable {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// First 16 hex characters of the SHA-256 of the (public) key material
fn fingerprint(material: &[u8]) -> String {
    let digest = Sha256::digest(material);
    format!("{:x}", digest)[..16].to_string()
}
