/// JWT Token Codec
///
/// Pure mint/verify over the signing key. Verification covers structure,
/// signature, issuer and the time window only; whether a token has been
/// revoked is decided by the session engine against the credential store.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenType, CLAIMS_VERSION};
use crate::auth::secret::SigningKey;
use crate::clock::Clock;
use crate::configuration::TokenSettings;
use crate::error::TokenError;

/// A freshly signed token together with the claims that went into it
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub claims: Claims,
}

impl MintedToken {
    pub fn token_id(&self) -> Uuid {
        self.claims.jti
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    key: Arc<SigningKey>,
    issuer: String,
    leeway_secs: i64,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(key: Arc<SigningKey>, settings: &TokenSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            issuer: settings.issuer.clone(),
            leeway_secs: settings.leeway_secs.max(0),
            clock,
        }
    }

    /// Sign a new token for `subject` on `device_code`.
    ///
    /// A fresh `jti` is generated for every call; `nbf` and `iat` are the
    /// current second and `exp` is `now + lifetime`.
    pub fn mint(
        &self,
        subject: Uuid,
        device_code: &str,
        token_type: TokenType,
        roles: &[String],
        lifetime: Duration,
    ) -> Result<MintedToken, TokenError> {
        let now = self.clock.now().timestamp();
        let claims = Claims {
            ver: CLAIMS_VERSION,
            jti: Uuid::new_v4(),
            sub: subject,
            device: device_code.to_string(),
            token_type,
            roles: roles.to_vec(),
            iat: now,
            nbf: now,
            exp: now + lifetime.num_seconds(),
            iss: self.issuer.clone(),
        };

        let token = encode(
            &Header::new(self.key.algorithm()),
            &claims,
            self.key.encoding_key(),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(MintedToken { token, claims })
    }

    /// Check signature and validity window and return the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.key.algorithm());
        // The time window is checked below against the injected clock
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<Claims>(token, self.key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                match e.kind() {
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                        TokenError::SignatureInvalid
                    }
                    ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
                        TokenError::Expired
                    }
                    _ => TokenError::Malformed,
                }
            })?;

        if claims.ver != CLAIMS_VERSION {
            return Err(TokenError::Malformed);
        }

        if !claims.is_current(self.clock.now(), self.leeway_secs) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SECRET: &[u8] = b"test-secret-key-at-least-32-characters-long";

    fn get_test_config() -> TokenSettings {
        TokenSettings {
            issuer: "test".to_string(),
            ..TokenSettings::default()
        }
    }

    fn codec_with(secret: &[u8], config: &TokenSettings, clock: Arc<ManualClock>) -> TokenCodec {
        let key = SigningKey::from_hmac_secret(secret).expect("Failed to build key");
        TokenCodec::new(Arc::new(key), config, clock)
    }

    fn setup() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (codec_with(SECRET, &get_test_config(), clock.clone()), clock)
    }

    #[test]
    fn test_mint_and_verify_token() {
        let (codec, clock) = setup();
        let user_id = Uuid::new_v4();
        let roles = vec!["admin".to_string()];

        let minted = codec
            .mint(user_id, "deviceX", TokenType::Access, &roles, Duration::seconds(60))
            .expect("Failed to mint token");
        let claims = codec.verify(&minted.token).expect("Failed to verify token");

        assert_eq!(claims, minted.claims);
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.device, "deviceX");
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.roles, roles);
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.nbf, clock.now().timestamp());
        assert_eq!(claims.exp, claims.iat + 60);
    }

    #[test]
    fn test_every_mint_gets_a_fresh_id() {
        let (codec, _) = setup();
        let user_id = Uuid::new_v4();

        let a = codec.mint(user_id, "d", TokenType::Refresh, &[], Duration::seconds(60)).unwrap();
        let b = codec.mint(user_id, "d", TokenType::Refresh, &[], Duration::seconds(60)).unwrap();

        assert_ne!(a.token_id(), b.token_id());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let (codec, _) = setup();

        assert_eq!(codec.verify("invalid.token.here"), Err(TokenError::Malformed));
        assert_eq!(codec.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_foreign_key_is_signature_invalid() {
        let clock = Arc::new(ManualClock::default());
        let config = get_test_config();
        let ours = codec_with(SECRET, &config, clock.clone());
        let theirs = codec_with(b"another-secret-key-at-least-32-characters", &config, clock);

        let minted = theirs
            .mint(Uuid::new_v4(), "d", TokenType::Access, &[], Duration::seconds(60))
            .unwrap();

        assert_eq!(ours.verify(&minted.token), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_expiry_follows_injected_clock() {
        let (codec, clock) = setup();
        let minted = codec
            .mint(Uuid::new_v4(), "d", TokenType::Access, &[], Duration::seconds(60))
            .unwrap();

        clock.advance(Duration::seconds(60));
        assert!(codec.verify(&minted.token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(codec.verify(&minted.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_not_valid_before_mint_time() {
        let (codec, clock) = setup();
        let minted = codec
            .mint(Uuid::new_v4(), "d", TokenType::Access, &[], Duration::seconds(60))
            .unwrap();

        clock.advance(Duration::seconds(-5));
        assert_eq!(codec.verify(&minted.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_leeway_tolerates_skew() {
        let clock = Arc::new(ManualClock::default());
        let config = TokenSettings {
            leeway_secs: 10,
            ..get_test_config()
        };
        let codec = codec_with(SECRET, &config, clock.clone());
        let minted = codec
            .mint(Uuid::new_v4(), "d", TokenType::Access, &[], Duration::seconds(60))
            .unwrap();

        clock.advance(Duration::seconds(65));
        assert!(codec.verify(&minted.token).is_ok());

        clock.advance(Duration::seconds(10));
        assert_eq!(codec.verify(&minted.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_issuer() {
        let clock = Arc::new(ManualClock::default());
        let minter = codec_with(SECRET, &get_test_config(), clock.clone());
        let verifier = codec_with(
            SECRET,
            &TokenSettings {
                issuer: "wrong-issuer".to_string(),
                ..get_test_config()
            },
            clock,
        );

        let minted = minter
            .mint(Uuid::new_v4(), "d", TokenType::Access, &[], Duration::seconds(60))
            .unwrap();

        assert_eq!(verifier.verify(&minted.token), Err(TokenError::Malformed));
    }

    #[test]
    fn test_unknown_claims_version_rejected() {
        let (codec, clock) = setup();
        let now = clock.now().timestamp();
        let claims = Claims {
            ver: CLAIMS_VERSION + 1,
            jti: Uuid::new_v4(),
            sub: Uuid::new_v4(),
            device: "d".to_string(),
            token_type: TokenType::Access,
            roles: vec![],
            iat: now,
            nbf: now,
            exp: now + 60,
            iss: "test".to_string(),
        };
        let token = encode(&Header::default(), &claims, codec.key.encoding_key()).unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn test_rs256_round_trip() {
        let key = SigningKey::from_rsa_pem(
            include_bytes!("../../tests/fixtures/rsa_private.pem"),
            include_bytes!("../../tests/fixtures/rsa_public.pem"),
        )
        .expect("Failed to load RSA key");
        let codec = TokenCodec::new(
            Arc::new(key),
            &get_test_config(),
            Arc::new(ManualClock::default()),
        );

        let minted = codec
            .mint(Uuid::new_v4(), "d", TokenType::Refresh, &[], Duration::seconds(60))
            .unwrap();

        assert_eq!(codec.verify(&minted.token).unwrap().token_type, TokenType::Refresh);
    }
}
