//! The in-memory and persisted shape of a session

use idaas_clock::UnixTime;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// A cached user profile
///
/// The record is opaque apart from its `user_id` member, which decides
/// whether a cached copy is good enough to serve without asking the backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRecord(serde_json::Map<String, serde_json::Value>);

impl UserRecord {
    /// Wraps a raw JSON object
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// The user identifier, if one is present and non-null
    pub fn user_id(&self) -> Option<&serde_json::Value> {
        self.0.get("user_id").filter(|v| !v.is_null())
    }

    /// Gets a profile member by name
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// The raw profile members
    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for UserRecord {
    fn from(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }
}

/// The credential bundle for one session
///
/// Expiries of [`UnixTime::EPOCH`] mean "never set". A cleared session has
/// every token absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    /// Authorizes issuance of access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// When the refresh token stops being valid
    #[serde(default)]
    pub refresh_token_expiry: UnixTime,
    /// Authorizes API calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    /// When the access token stops being valid
    #[serde(default)]
    pub access_token_expiry: UnixTime,
    /// Opportunistically cached profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
}

impl TokenState {
    /// True iff a refresh token is present and expires strictly after `now`
    pub fn has_valid_refresh(&self, now: UnixTime) -> bool {
        self.refresh_token.is_some() && self.refresh_token_expiry.is_after(now)
    }

    /// True iff an access token is present and expires strictly after `now`
    ///
    /// An access token without a refresh token is never valid.
    pub fn has_valid_access(&self, now: UnixTime) -> bool {
        self.refresh_token.is_some()
            && self.access_token.is_some()
            && self.access_token_expiry.is_after(now)
    }

    /// The current refresh token, if any
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// The current access token, if any
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Whether every token has been dropped
    pub fn is_cleared(&self) -> bool {
        self.refresh_token.is_none() && self.access_token.is_none()
    }

    /// Merges a partial update into this bundle
    pub fn apply(&mut self, update: &BundleUpdate) {
        update.refresh_token.apply_to(&mut self.refresh_token);
        update.access_token.apply_to(&mut self.access_token);
        update.user.apply_to(&mut self.user);

        if let Some(expiry) = update.refresh_token_expiry {
            self.refresh_token_expiry = expiry;
        }
        if let Some(expiry) = update.access_token_expiry {
            self.access_token_expiry = expiry;
        }
    }
}

/// A change to a single optional field
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Patch<T> {
    /// Leave the stored value untouched
    #[default]
    Keep,
    /// Replace the stored value
    Set(T),
    /// Remove the stored value
    Clear,
}

impl<T: Clone> Patch<T> {
    fn apply_to(&self, target: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(v) => *target = Some(v.clone()),
            Patch::Clear => *target = None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `None` clears the field
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

/// A partial update to a stored credential bundle
///
/// Fields left at their defaults keep whatever is stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BundleUpdate {
    /// Refresh token change
    pub refresh_token: Patch<RefreshToken>,
    /// New refresh token expiry, if changing
    pub refresh_token_expiry: Option<UnixTime>,
    /// Access token change
    pub access_token: Patch<AccessToken>,
    /// New access token expiry, if changing
    pub access_token_expiry: Option<UnixTime>,
    /// Cached profile change
    pub user: Patch<UserRecord>,
}

impl BundleUpdate {
    /// An update that makes the stored bundle equal to `state`
    pub fn replace_with(state: &TokenState) -> Self {
        Self {
            refresh_token: state.refresh_token.clone().into(),
            refresh_token_expiry: Some(state.refresh_token_expiry),
            access_token: state.access_token.clone().into(),
            access_token_expiry: Some(state.access_token_expiry),
            user: state.user.clone().into(),
        }
    }

    /// An update that clears every field
    pub fn clear_all() -> Self {
        Self::replace_with(&TokenState::default())
    }

    /// Whether applying this update leaves nothing of the previous bundle
    ///
    /// Stores can skip reading what they hold before writing such an update.
    pub fn replaces_everything(&self) -> bool {
        !matches!(self.refresh_token, Patch::Keep)
            && !matches!(self.access_token, Patch::Keep)
            && !matches!(self.user, Patch::Keep)
            && self.refresh_token_expiry.is_some()
            && self.access_token_expiry.is_some()
    }
}
