//! Session tokens and role credentials.
//!
//! A session token is an HS256 JWT. The claims carry a single [`Role`] plus issue and expiry
//! times. Nothing outside this module looks at anything but the role.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use prism_core::{Identity, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token lifetime used when none is configured.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;

const TOKEN_ALG: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired, please log in again")]
    Expired,
    #[error("Incorrect password")]
    WrongPassword,
    /// The role exists but no password was configured for it.
    #[error("Server configuration error")]
    Unconfigured(Role),
    #[error("invalid session configuration: {0}")]
    Config(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Signing secret and token lifetime, resolved once at startup.
#[derive(Clone)]
pub struct SessionConfig {
    secret: Vec<u8>,
    ttl: Duration,
}

impl SessionConfig {
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the secret is blank or the lifetime is not positive.
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(AuthError::Config("session secret must not be empty".into()));
        }
        if ttl <= Duration::zero() {
            return Err(AuthError::Config("session lifetime must be positive".into()));
        }

        Ok(Self {
            secret: secret.into_bytes(),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Parse a token lifetime in hours from an optional environment value.
///
/// `None` or blank input yields [`DEFAULT_SESSION_TTL_HOURS`].
pub fn ttl_from_env_value(value: Option<String>) -> Result<Duration, AuthError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(value) = value else {
        return Ok(Duration::hours(DEFAULT_SESSION_TTL_HOURS));
    };

    match value.parse::<i64>() {
        Ok(hours) if hours > 0 => Ok(Duration::hours(hours)),
        _ => Err(AuthError::Config(format!(
            "session lifetime must be a positive number of hours, got '{value}'"
        ))),
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.role)
    }
}

/// A freshly signed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    ttl: Duration,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionKeys {
    pub fn new(cfg: SessionConfig) -> Self {
        let mut validation = Validation::new(TOKEN_ALG);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            ttl: cfg.ttl,
            encoding: EncodingKey::from_secret(&cfg.secret),
            decoding: DecodingKey::from_secret(&cfg.secret),
            validation,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, role: Role) -> Result<IssuedToken, AuthError> {
        self.issue_at(role, Utc::now())
    }

    pub fn issue_at(&self, role: Role, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(TOKEN_ALG), &claims, &self.encoding)
            .map_err(|e| AuthError::Config(format!("token encoding failed: {e}")))?;

        Ok(IssuedToken {
            token,
            role,
            expires_at,
        })
    }

    /// Signature and algorithm are checked before expiry, so a forged expired token is
    /// reported as invalid.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("ttl", &self.ttl)
            .field("alg", &TOKEN_ALG)
            .finish()
    }
}

// ============================================================================
// Role credentials
// ============================================================================

/// Shared password per role, read from `PWD_<ROLE>` variables.
#[derive(Clone, Default)]
pub struct RoleCredentials {
    passwords: HashMap<Role, String>,
}

impl RoleCredentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unconfigured.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let passwords = Role::ALL
            .into_iter()
            .filter_map(|role| {
                lookup(&Self::env_key(role))
                    .filter(|pw| !pw.is_empty())
                    .map(|pw| (role, pw))
            })
            .collect();
        Self { passwords }
    }

    pub fn with_password(mut self, role: Role, password: impl Into<String>) -> Self {
        self.passwords.insert(role, password.into());
        self
    }

    pub fn env_key(role: Role) -> String {
        format!("PWD_{}", role.as_str().to_uppercase())
    }

    pub fn configured_roles(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| self.passwords.contains_key(role))
            .collect()
    }

    pub fn check(&self, role: Role, password: &str) -> Result<(), AuthError> {
        let Some(expected) = self.passwords.get(&role) else {
            tracing::error!("Password not configured for role: {}", role);
            return Err(AuthError::Unconfigured(role));
        };

        if expected.as_bytes() == password.as_bytes() {
            Ok(())
        } else {
            Err(AuthError::WrongPassword)
        }
    }
}

impl std::fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("configured", &self.configured_roles())
            .finish()
    }
}
