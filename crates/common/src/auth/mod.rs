//! Authentication and principal utilities
//!
//! Identity is owned by an upstream session service. This module only:
//! - Models the authenticated principal and its role
//! - Validates HS256 bearer tokens into a principal
//! - Issues tokens for tests and tooling

use crate::errors::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of an authenticated principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Visitor,
    User,
    Owner,
    Reviewer,
    Admin,
}

impl Role {
    /// Roles allowed to review access requests and read unpublished manuscripts
    pub fn can_review(&self) -> bool {
        matches!(self, Role::Reviewer | Role::Admin)
    }
}

/// Authenticated caller as supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub email: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

impl Principal {
    pub fn new(id: Uuid, role: Role, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            role,
            email: email.into(),
            display_name: display_name.into(),
            institution: None,
        }
    }

    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Require the reviewer or admin role
    pub fn require_reviewer(&self) -> Result<()> {
        if self.role.can_review() {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "principal {} lacks the reviewer role",
                self.id
            )))
        }
    }

    /// Require the admin role
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "principal {} lacks the admin role",
                self.id
            )))
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    pub role: Role,

    pub email: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl JwtClaims {
    pub fn into_principal(self) -> Result<Principal> {
        let id = Uuid::parse_str(&self.sub).map_err(|_| AppError::InvalidToken)?;
        Ok(Principal {
            id,
            role: self.role,
            email: self.email,
            display_name: self.name,
            institution: self.institution,
        })
    }
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Generate a token for a principal
    pub fn generate_token(&self, principal: &Principal) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: principal.id.to_string(),
            role: principal.role,
            email: principal.email.clone(),
            name: principal.display_name.clone(),
            institution: principal.institution.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }

    /// Resolve a bearer token into a principal
    pub fn authenticate(&self, token: &str) -> Result<Principal> {
        self.validate_token(token)?.into_principal()
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal::new(Uuid::new_v4(), role, "jane@example.edu", "Jane Doe")
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", 3600);
        let original = principal(Role::Reviewer).with_institution("Inst");

        let token = manager.generate_token(&original).unwrap();
        let resolved = manager.authenticate(&token).unwrap();

        assert_eq!(resolved, original);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let issuer = JwtManager::new("secret-a", 3600);
        let verifier = JwtManager::new("secret-b", 3600);

        let token = issuer.generate_token(&principal(Role::User)).unwrap();
        assert!(matches!(verifier.authenticate(&token), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_role_checks() {
        assert!(principal(Role::Reviewer).require_reviewer().is_ok());
        assert!(principal(Role::Admin).require_reviewer().is_ok());
        assert!(principal(Role::User).require_reviewer().is_err());
        assert!(principal(Role::Reviewer).require_admin().is_err());
    }
}
