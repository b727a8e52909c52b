/// JWT Claims structure
///
/// The payload carried by every access and refresh token. The layout is
/// versioned through `ver`; tokens with an unknown version are rejected.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current claims layout version
pub const CLAIMS_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            _ => None,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Claims layout version
    pub ver: u8,
    /// Token ID, also the primary key of the persisted record
    pub jti: Uuid,
    /// Subject (user ID)
    pub sub: Uuid,
    /// Device code the session is bound to
    pub device: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Role names at mint time, opaque to this service
    #[serde(default)]
    pub roles: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.exp)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.iat)
    }

    /// Whether `now` lies within `[nbf - leeway, exp + leeway]`, at one second
    /// resolution.
    pub fn is_current(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        let now = now.timestamp();
        self.nbf - leeway_secs <= now && now <= self.exp + leeway_secs
    }
}

pub(crate) fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(nbf: i64, exp: i64) -> Claims {
        Claims {
            ver: CLAIMS_VERSION,
            jti: Uuid::new_v4(),
            sub: Uuid::new_v4(),
            device: "deviceX".to_string(),
            token_type: TokenType::Access,
            roles: vec![],
            iat: nbf,
            nbf,
            exp,
            iss: "test".to_string(),
        }
    }

    #[test]
    fn test_validity_window_is_inclusive() {
        let c = claims(1_000, 2_000);

        assert!(!c.is_current(timestamp_to_datetime(999), 0));
        assert!(c.is_current(timestamp_to_datetime(1_000), 0));
        assert!(c.is_current(timestamp_to_datetime(2_000), 0));
        assert!(!c.is_current(timestamp_to_datetime(2_001), 0));
    }

    #[test]
    fn test_leeway_widens_window() {
        let c = claims(1_000, 2_000);

        assert!(c.is_current(timestamp_to_datetime(995), 5));
        assert!(c.is_current(timestamp_to_datetime(2_005), 5));
        assert!(!c.is_current(timestamp_to_datetime(2_006), 5));
    }

    #[test]
    fn test_token_type_wire_names() {
        let json = serde_json::to_value(claims(0, 1)).unwrap();

        assert_eq!(json["typ"], "access");
        assert_eq!(TokenType::parse("refresh"), Some(TokenType::Refresh));
        assert_eq!(TokenType::parse("bearer"), None);
    }

    #[test]
    fn test_missing_roles_default_to_empty() {
        let mut json = serde_json::to_value(claims(0, 1)).unwrap();
        json.as_object_mut().unwrap().remove("roles");

        let parsed: Claims = serde_json::from_value(json).unwrap();
        assert!(parsed.roles.is_empty());
    }
}
