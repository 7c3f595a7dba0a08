//! DTOs exchanged with the identity service

use idaas_clock::UnixTime;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, CaptchaToken, RefreshToken, UserRecord};

/// Success bodies wrap their payload in a `data` member
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

/// The result of a successful login
///
/// Every member is optional on the wire; a grant without a refresh token is
/// rejected by the session rather than by the client.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    /// The new refresh token
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// When the refresh token expires
    #[serde(default)]
    pub refresh_token_expiry: UnixTime,
    /// The first access token
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    /// When the access token expires
    #[serde(default)]
    pub access_token_expiry: UnixTime,
    /// The user's profile
    #[serde(default)]
    pub user: Option<UserRecord>,
}

/// The result of a successful refresh
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewedAccess {
    /// The new access token
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    /// When the new access token expires
    #[serde(default)]
    pub expiry: UnixTime,
    /// A profile refreshed alongside the token
    #[serde(default)]
    pub user: Option<UserRecord>,
}

/// An issued captcha challenge
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CaptchaChallenge {
    /// The token to echo back when answering the challenge
    #[serde(alias = "captchaToken")]
    pub token: CaptchaToken,
    /// Everything else the service sent, such as the image to show
    #[serde(flatten)]
    pub challenge: serde_json::Map<String, serde_json::Value>,
}
