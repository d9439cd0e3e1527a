//! Connection authentication.
//!
//! A push-channel connection presents a bearer credential once, during the
//! handshake. The authenticator checks it and resolves it to a verified user
//! before any session state is created.

use crate::session::{UserId, UserIdentity};
use crate::store::{StoreError, UserStore};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Reasons a connection attempt is refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("Missing credential")]
    Missing,

    /// The credential is malformed, expired, badly signed, or names an
    /// unknown user.
    #[error("Invalid credential: {0}")]
    Invalid(String),

    /// The credential is valid but the account is not verified.
    #[error("Account not verified")]
    Unverified,

    /// The user store failed while resolving the credential.
    #[error("User lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing",
            AuthError::Invalid(_) => "invalid",
            AuthError::Unverified => "unverified",
            AuthError::Store(_) => "store",
        }
    }
}

/// Credential verification errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential expired")]
    Expired,

    #[error("Bad credential signature")]
    BadSignature,

    #[error("Malformed credential: {0}")]
    Malformed(String),
}

/// The verified content of a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub subject: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Checks a credential's signature and expiry.
pub trait CredentialVerifier: Send + Sync {
    /// Verify a token and return its subject.
    fn verify(&self, token: &str) -> Result<VerifiedCredential, CredentialError>;
}

/// JWT claims. Older tokens carry the subject as `id`.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(alias = "id")]
    sub: String,
    exp: i64,
    #[serde(default)]
    iat: i64,
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for an HMAC secret, allowing `leeway` seconds of
    /// clock skew on expiry.
    #[must_use]
    pub fn new(secret: &[u8], leeway: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a token for `subject`, valid for `ttl`.
    ///
    /// Tokens are normally issued by the identity service; this exists for
    /// tooling and tests.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<String, CredentialError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CredentialError::Malformed(e.to_string()))
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedCredential, CredentialError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                ErrorKind::InvalidSignature => CredentialError::BadSignature,
                _ => CredentialError::Malformed(e.to_string()),
            }
        })?;

        let expires_at = DateTime::from_timestamp(data.claims.exp, 0)
            .ok_or_else(|| CredentialError::Malformed("expiry out of range".to_string()))?;

        Ok(VerifiedCredential {
            subject: data.claims.sub,
            expires_at,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves handshake credentials to verified users.
#[derive(Clone)]
pub struct ConnectionAuthenticator {
    verifier: Arc<dyn CredentialVerifier>,
    users: Arc<dyn UserStore>,
}

impl ConnectionAuthenticator {
    #[must_use]
    pub fn new(verifier: Arc<dyn CredentialVerifier>, users: Arc<dyn UserStore>) -> Self {
        Self { verifier, users }
    }

    /// The user store credentials are resolved against.
    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Authenticate a credential.
    ///
    /// # Errors
    ///
    /// Returns `Missing`, `Invalid` or `Unverified` as described on
    /// [`AuthError`], or `Store` if the user lookup itself failed.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<UserIdentity, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;

        let verified = self.verifier.verify(token).map_err(|e| {
            debug!(error = %e, "Credential rejected");
            AuthError::Invalid(e.to_string())
        })?;

        let user = self
            .users
            .find_by_id(&verified.subject)
            .await
            .map_err(|e| {
                error!(user = %verified.subject, error = %e, "User lookup failed");
                AuthError::Store(e)
            })?
            .ok_or_else(|| AuthError::Invalid(format!("unknown user {}", verified.subject)))?;

        if !user.is_verified {
            return Err(AuthError::Unverified);
        }

        debug!(user = %user.id, expires_at = %verified.expires_at, "Credential accepted");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUserStore;

    const SECRET: &[u8] = b"test-secret";

    fn authenticator() -> (ConnectionAuthenticator, Arc<JwtVerifier>) {
        let verifier = Arc::new(JwtVerifier::new(SECRET, 0));
        let users: InMemoryUserStore = [
            UserIdentity::new("u-1", "alice", true),
            UserIdentity::new("u-2", "bob", false),
        ]
        .into_iter()
        .collect();
        let auth = ConnectionAuthenticator::new(verifier.clone(), Arc::new(users));
        (auth, verifier)
    }

    fn expired_token(subject: &str) -> String {
        let claims = Claims {
            sub: subject.to_string(),
            exp: Utc::now().timestamp() - 3600,
            iat: Utc::now().timestamp() - 7200,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn test_verified_user_is_admitted() {
        let (auth, verifier) = authenticator();
        let token = verifier.issue("u-1", Duration::from_secs(60)).unwrap();

        let user = auth.authenticate(Some(&token)).await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let (auth, _) = authenticator();

        assert!(matches!(auth.authenticate(None).await, Err(AuthError::Missing)));
        assert!(matches!(auth.authenticate(Some("  ")).await, Err(AuthError::Missing)));
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let (auth, _) = authenticator();
        let foreign = JwtVerifier::new(b"other-secret", 0)
            .issue("u-1", Duration::from_secs(60))
            .unwrap();

        for token in ["not-a-jwt".to_string(), foreign, expired_token("u-1")] {
            assert!(matches!(
                auth.authenticate(Some(&token)).await,
                Err(AuthError::Invalid(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_subject_is_invalid() {
        let (auth, verifier) = authenticator();
        let token = verifier.issue("ghost", Duration::from_secs(60)).unwrap();

        assert!(matches!(
            auth.authenticate(Some(&token)).await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_unverified_account() {
        let (auth, verifier) = authenticator();
        let token = verifier.issue("u-2", Duration::from_secs(60)).unwrap();

        assert!(matches!(
            auth.authenticate(Some(&token)).await,
            Err(AuthError::Unverified)
        ));
    }

    #[test]
    fn test_verifier_error_kinds() {
        let verifier = JwtVerifier::new(SECRET, 0);
        assert_eq!(
            verifier.verify(&expired_token("u-1")),
            Err(CredentialError::Expired)
        );

        let foreign = JwtVerifier::new(b"other-secret", 0)
            .issue("u-1", Duration::from_secs(60))
            .unwrap();
        assert_eq!(verifier.verify(&foreign), Err(CredentialError::BadSignature));
    }

    #[test]
    fn test_legacy_id_claim() {
        #[derive(Serialize)]
        struct Legacy<'a> {
            id: &'a str,
            exp: i64,
        }

        let token = encode(
            &Header::default(),
            &Legacy {
                id: "u-1",
                exp: Utc::now().timestamp() + 60,
            },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        let verified = JwtVerifier::new(SECRET, 0).verify(&token).unwrap();
        assert_eq!(verified.subject, "u-1");
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
