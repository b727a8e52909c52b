/// Error Handling Module
///
/// One error type per concern (validation, storage, token codec, key material,
/// authentication), all converging on `AppError`. `AppError::kind` collapses
/// everything into the five categories callers are allowed to observe.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Validation errors for caller-supplied input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(&'static str),
    TooLong(&'static str, usize),
    InvalidFormat(&'static str),
    InvalidIdentifier(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::InvalidIdentifier(field) => {
                write!(f, "invalid {} value", field)
            }
        }
    }
}

impl StdError for ValidationError {}

/// Credential store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UniqueViolation,
    RecordNotFound,
    Database(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UniqueViolation => write!(f, "unique violation"),
            StoreError::RecordNotFound => write!(f, "record not found"),
            StoreError::Database(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl StdError for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::RecordNotFound,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::UniqueViolation
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Token codec errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    SignatureInvalid,
    Expired,
    Signing(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "token is malformed"),
            TokenError::SignatureInvalid => write!(f, "token signature is invalid"),
            TokenError::Expired => write!(f, "token is outside its validity window"),
            TokenError::Signing(msg) => write!(f, "token signing failed: {}", msg),
        }
    }
}

impl StdError for TokenError {}

/// Signing key loading errors. Any of these is fatal at startup.
#[derive(Debug)]
pub enum SecretError {
    Unreadable { path: String, reason: String },
    InvalidEncoding(String),
    TooShort(usize),
    MissingPublicKey,
    KeyPairMismatch,
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretError::Unreadable { path, reason } => {
                write!(f, "cannot read key file {}: {}", path, reason)
            }
            SecretError::InvalidEncoding(msg) => write!(f, "key has invalid encoding: {}", msg),
            SecretError::TooShort(min) => {
                write!(f, "symmetric secret is too short (minimum {} bytes)", min)
            }
            SecretError::MissingPublicKey => {
                write!(f, "RS256 requires secret.public_key_path to be set")
            }
            SecretError::KeyPairMismatch => {
                write!(f, "private and public keys do not form a pair")
            }
        }
    }
}

impl StdError for SecretError {}

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    TokenNotFound,
    TokenRevoked,
    TokenExpired,
    TokenInvalid,
    InvalidTokenType,
    TokenMalformed,
    SignatureInvalid,
    MissingToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "invalid login or password"),
            AuthError::TokenNotFound => write!(f, "token not found"),
            AuthError::TokenRevoked => write!(f, "token is revoked"),
            AuthError::TokenExpired => write!(f, "token has expired"),
            AuthError::TokenInvalid => write!(f, "token is no longer valid"),
            AuthError::InvalidTokenType => write!(f, "invalid token type"),
            AuthError::TokenMalformed => write!(f, "token is malformed"),
            AuthError::SignatureInvalid => write!(f, "token signature is invalid"),
            AuthError::MissingToken => write!(f, "missing authentication token"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// The categories a caller can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    AlreadyExists,
    NotFound,
    Unauthenticated,
    Internal,
}

/// Central error type returned by the session engine
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    AlreadyExists(String),
    NotFound(String),
    Auth(AuthError),
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::InvalidArgument,
            AppError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AppError::NotFound(_) => ErrorKind::NotFound,
            // Refresh with an unknown id reports not-found, as the store does
            AppError::Auth(AuthError::TokenNotFound) => ErrorKind::NotFound,
            AppError::Auth(_) => ErrorKind::Unauthenticated,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The authentication failure, if this is one
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            AppError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::AlreadyExists(msg) => write!(f, "{}", msg),
            AppError::NotFound(msg) => write!(f, "{}", msg),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation => AppError::AlreadyExists("record already exists".to_string()),
            StoreError::RecordNotFound => AppError::NotFound("record not found".to_string()),
            StoreError::Database(msg) => AppError::Internal(msg),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => AppError::Auth(AuthError::TokenMalformed),
            TokenError::SignatureInvalid => AppError::Auth(AuthError::SignatureInvalid),
            TokenError::Expired => AppError::Auth(AuthError::TokenExpired),
            TokenError::Signing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

fn auth_code(e: &AuthError) -> &'static str {
    match e {
        AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
        AuthError::TokenNotFound => "TOKEN_NOT_FOUND",
        AuthError::TokenRevoked => "TOKEN_REVOKED",
        AuthError::TokenExpired => "TOKEN_EXPIRED",
        AuthError::TokenInvalid => "TOKEN_INVALID",
        AuthError::InvalidTokenType => "INVALID_TOKEN_TYPE",
        AuthError::TokenMalformed => "TOKEN_MALFORMED",
        AuthError::SignatureInvalid => "SIGNATURE_INVALID",
        AuthError::MissingToken => "MISSING_TOKEN",
    }
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let status = ResponseError::status_code(self);
        let (code, message) = match self {
            AppError::Validation(e) => ("INVALID_ARGUMENT".to_string(), e.to_string()),
            AppError::AlreadyExists(msg) => ("ALREADY_EXISTS".to_string(), msg.clone()),
            AppError::NotFound(msg) => ("NOT_FOUND".to_string(), msg.clone()),
            AppError::Auth(e) => (auth_code(e).to_string(), e.to_string()),
            // Never echo store or codec internals to the caller
            AppError::Internal(_) => (
                "INTERNAL_ERROR".to_string(),
                "Internal server error".to_string(),
            ),
        };

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message,
            code,
            status.as_u16(),
        );

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::AlreadyExists(msg) => {
                tracing::warn!(request_id = request_id, error = %msg, "Duplicate entry attempt");
            }
            AppError::NotFound(msg) => {
                tracing::info!(request_id = request_id, error = %msg, "Record not found");
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

/// Implement ResponseError for Actix-web integration
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
