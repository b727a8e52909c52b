/// Authentication module
///
/// Signing key material, the versioned token claims, the JWT codec and
/// password hashing.

mod claims;
mod jwt;
mod password;
mod secret;

pub use claims::{Claims, TokenType, CLAIMS_VERSION};
pub use jwt::{MintedToken, TokenCodec};
pub use password::PasswordHasher;
pub use secret::{SigningKey, MIN_HMAC_SECRET_LEN};

#[cfg(test)]
pub(crate) use password::fast_hasher;
