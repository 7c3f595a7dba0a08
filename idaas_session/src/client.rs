//! The remote identity service, as seen by a session

use std::{error, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::{AccessTokenRef, CaptchaTokenRef, Password, RefreshTokenRef, UserRecord};

pub mod dto;
#[cfg(feature = "http")]
mod http;

pub use dto::{CaptchaChallenge, LoginGrant, RenewedAccess};
#[cfg(feature = "http")]
pub use http::HttpAuthClient;

/// How long a remote call may take unless configured otherwise
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An error while talking to the identity service
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request could not be sent or its response could not be read
    #[error("error communicating with identity service")]
    Transport(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The identity service answered with a non-success status
    #[error("identity service responded with status {status}: {body}")]
    Rejected {
        /// The HTTP status code
        status: u16,
        /// The body of the error response
        body: String,
    },
    /// A success response did not have the expected shape
    #[error("error deserializing response body from identity service")]
    MalformedBody(#[from] serde_json::Error),
    /// A credential cannot be carried in a request header
    #[error("credential contains characters not allowed in a header")]
    InvalidHeader,
    /// The client could not be built from its configuration
    #[error("invalid identity service configuration")]
    Config(#[from] crate::config::ConfigError),
}

impl AuthError {
    /// The HTTP status reported by the identity service, if it got that far
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Identity material presented when logging in
///
/// At least one identifier is always present alongside the password.
#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    password: Password,
}

impl Credentials {
    /// Log in with an email address
    pub fn with_email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            username: None,
            password: Password::new(password.into()),
        }
    }

    /// Log in with a username
    pub fn with_username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: None,
            username: Some(username.into()),
            password: Password::new(password.into()),
        }
    }

    /// Also send a username
    pub fn and_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Also send an email address
    pub fn and_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// The email address, if given
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The username, if given
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

/// Who a single sign-on challenge should be delivered to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SsoIdentifier {
    /// Send the challenge by email
    Email(String),
    /// Send the challenge by phone
    Phone(String),
}

impl SsoIdentifier {
    /// The query parameter carrying this identifier
    pub fn query_pair(&self) -> (&'static str, &str) {
        match self {
            SsoIdentifier::Email(email) => ("email", email),
            SsoIdentifier::Phone(phone) => ("phone", phone),
        }
    }
}

/// The remote operations a session depends on
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Exchanges identity material for a refresh and access token
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginGrant, AuthError>;

    /// Asks the service to send a sign-on challenge, returning the raw status
    ///
    /// Any HTTP response is `Ok`; only transport problems are errors.
    async fn start_challenge(
        &self,
        captcha_token: &CaptchaTokenRef,
        captcha_code: &str,
        identifier: &SsoIdentifier,
    ) -> Result<u16, AuthError>;

    /// Obtains a fresh access token with a refresh token
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<RenewedAccess, AuthError>;

    /// Invalidates a refresh token
    async fn revoke(&self, refresh_token: &RefreshTokenRef) -> Result<(), AuthError>;

    /// Fetches the profile of the user an access token belongs to
    async fn fetch_profile(&self, access_token: &AccessTokenRef) -> Result<UserRecord, AuthError>;

    /// Issues a new captcha challenge
    async fn obtain_captcha(&self) -> Result<CaptchaChallenge, AuthError>;

    /// The longest any single call is allowed to take
    fn request_timeout(&self) -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }
}

#[async_trait]
impl<C: AuthClient + ?Sized> AuthClient for std::sync::Arc<C> {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginGrant, AuthError> {
        (**self).authenticate(credentials).await
    }

    async fn start_challenge(
        &self,
        captcha_token: &CaptchaTokenRef,
        captcha_code: &str,
        identifier: &SsoIdentifier,
    ) -> Result<u16, AuthError> {
        (**self)
            .start_challenge(captcha_token, captcha_code, identifier)
            .await
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<RenewedAccess, AuthError> {
        (**self).refresh(refresh_token).await
    }

    async fn revoke(&self, refresh_token: &RefreshTokenRef) -> Result<(), AuthError> {
        (**self).revoke(refresh_token).await
    }

    async fn fetch_profile(&self, access_token: &AccessTokenRef) -> Result<UserRecord, AuthError> {
        (**self).fetch_profile(access_token).await
    }

    async fn obtain_captcha(&self) -> Result<CaptchaChallenge, AuthError> {
        (**self).obtain_captcha().await
    }

    fn request_timeout(&self) -> Duration {
        (**self).request_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_serialize_only_given_identifiers() {
        let creds = Credentials::with_email("a@example.com", "pw");
        assert_eq!(
            serde_json::to_value(&creds).unwrap(),
            serde_json::json!({ "email": "a@example.com", "password": "pw" })
        );

        let creds = Credentials::with_username("alice", "pw").and_email("a@example.com");
        assert_eq!(
            serde_json::to_value(&creds).unwrap(),
            serde_json::json!({ "email": "a@example.com", "username": "alice", "password": "pw" })
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::with_username("alice", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn rejected_errors_expose_status() {
        let err = AuthError::Rejected {
            status: 401,
            body: String::new(),
        };
        assert_eq!(err.status(), Some(401));
        assert_eq!(AuthError::InvalidHeader.status(), None);
    }
}
