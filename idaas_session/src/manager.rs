//! Session orchestration: persistence, renewal and deauthorization

use std::{
    error, fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock as SyncRwLock,
    },
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use idaas_clock::{Clock, System, UnixTime};
use tokio::sync::{Mutex, RwLock};
use tracing::Instrument;

use crate::{
    braids::present,
    client::{AuthClient, AuthError, CaptchaChallenge, Credentials, SsoIdentifier},
    store::SecureStore,
    AccessToken, BundleUpdate, CaptchaToken, Patch, RefreshToken, RefreshTokenRef, SessionError,
    TokenState, UserRecord,
};


/// Why a session can no longer be used
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeauthReason {
    /// There is no refresh token at all
    NoSession,
    /// The refresh token has passed its expiry
    SessionExpired,
    /// The identity service answered a renewal without issuing an access token
    ///
    /// `status` is the HTTP status for non-success answers and `None` when a
    /// success response lacked a usable access token.
    RenewalRejected {
        /// The HTTP status, if the answer was not a success
        status: Option<u16>,
    },
    /// The renewal request never got an answer
    RenewalFailed,
}

/// Classification of a sign-on challenge request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SsoStatus {
    /// The challenge was sent
    Sent,
    /// No account matches the email or phone (404)
    IdentityNotFound,
    /// The captcha answer was wrong (401)
    InvalidCaptcha,
    /// Too many challenges were requested (429)
    RateLimited,
    /// Any other status
    Unexpected(u16),
    /// The service could not be reached
    TransportFailure,
    /// No captcha token has been obtained; nothing was sent
    CaptchaRequired,
}

impl SsoStatus {
    /// Classifies an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => SsoStatus::Sent,
            404 => SsoStatus::IdentityNotFound,
            401 => SsoStatus::InvalidCaptcha,
            429 => SsoStatus::RateLimited,
            other => SsoStatus::Unexpected(other),
        }
    }

    /// Whether the challenge went out
    pub fn is_sent(self) -> bool {
        self == SsoStatus::Sent
    }
}

/// Slack on top of the transport timeout for persisting a renewed token
const RENEWAL_GRACE: Duration = Duration::from_secs(5);

/// A callback told when a session becomes unrecoverable
pub type DeauthHandler = Arc<dyn Fn(DeauthReason) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RenewalOutcome {
    Current,
    Renewed,
    NoSession,
    Expired,
    Rejected,
    TransportFailure,
    StorageFailure,
    Superseded,
}

impl RenewalOutcome {
    fn is_valid(self) -> bool {
        matches!(self, RenewalOutcome::Current | RenewalOutcome::Renewed)
    }
}

type PendingRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

struct InFlight {
    generation: u64,
    pending: PendingRenewal,
}

struct Inner<K> {
    client: Box<dyn AuthClient>,
    store: Box<dyn SecureStore>,
    clock: K,
    state: RwLock<TokenState>,
    /// Held across persist-then-adopt so the two stay paired
    mutation: Mutex<()>,
    renewal: Mutex<Option<InFlight>>,
    generation: AtomicU64,
    deauth: SyncRwLock<Option<DeauthHandler>>,
    captcha: Mutex<Option<CaptchaToken>>,
}

/// Manages one session against the identity service
///
/// Holds the refresh and access tokens, renews the access token when it
/// expires, and persists every change through a [`SecureStore`] before it is
/// observable. Concurrent renewals collapse into a single remote call.
///
/// [`init`](Self::init) must be awaited before anything else; until it has
/// completed the manager behaves as a logged out session. Clones share the
/// same session.
#[must_use]
pub struct SessionManager<K = System> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for SessionManager<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for SessionManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

impl SessionManager<System> {
    /// Constructs a manager using the system clock
    pub fn new(client: impl AuthClient + 'static, store: impl SecureStore + 'static) -> Self {
        Self::with_clock(client, store, System)
    }

    /// Constructs a manager talking HTTP to the configured identity service
    #[cfg(feature = "http")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http")))]
    pub fn connect(
        config: &crate::SessionConfig,
        store: impl SecureStore + 'static,
    ) -> Result<Self, AuthError> {
        Ok(Self::new(crate::client::HttpAuthClient::new(config)?, store))
    }
}

impl<K> SessionManager<K>
where
    K: Clock + Send + Sync + 'static,
{
    /// Constructs a manager using a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(
        client: impl AuthClient + 'static,
        store: impl SecureStore + 'static,
        clock: K,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: Box::new(client),
                store: Box::new(store),
                clock,
                state: RwLock::new(TokenState::default()),
                mutation: Mutex::new(()),
                renewal: Mutex::new(None),
                generation: AtomicU64::new(0),
                deauth: SyncRwLock::new(None),
                captcha: Mutex::new(None),
            }),
        }
    }

    /// Registers the deauthorization handler while building the manager
    pub fn with_deauth_handler(self, handler: impl Fn(DeauthReason) + Send + Sync + 'static) -> Self {
        self.set_deauth_handler(handler);
        self
    }

    /// Registers the handler told when the session becomes unrecoverable
    ///
    /// Replaces any previously registered handler. It is called on the task
    /// that detected the condition, so it should return quickly. For failed
    /// renewals that is the background renewal task, which may be running on
    /// a runtime worker thread rather than on the caller's task.
    pub fn set_deauth_handler(&self, handler: impl Fn(DeauthReason) + Send + Sync + 'static) {
        let handler: DeauthHandler = Arc::new(handler);
        *self
            .inner
            .deauth
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Loads the credential bundle from storage
    ///
    /// Nothing stored yields an empty session. Calling this again reloads.
    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> Result<(), SessionError> {
        let _guard = self.inner.mutation.lock().await;
        let loaded = self.inner.store.load().await?.unwrap_or_default();

        tracing::debug!(
            has_refresh_token = loaded.refresh_token.is_some(),
            refresh_token_expiry = loaded.refresh_token_expiry.0,
            has_access_token = loaded.access_token.is_some(),
            access_token_expiry = loaded.access_token_expiry.0,
            "loaded credential bundle"
        );

        *self.inner.state.write().await = loaded;
        Ok(())
    }

    /// Whether the session can make authenticated calls
    ///
    /// This is not a pure query: with a valid refresh token but an expired
    /// access token it performs one renewal (a network call) and reports its
    /// result.
    pub async fn is_authenticated(&self) -> bool {
        let now = self.inner.clock.now();
        {
            let state = self.inner.state.read().await;
            if !state.has_valid_refresh(now) {
                return false;
            }
            if state.has_valid_access(now) {
                return true;
            }
        }

        self.ensure_access_token(false).await
    }

    /// Logs in, adopting the issued tokens on success
    ///
    /// On any failure the existing session is left untouched.
    #[tracing::instrument(skip_all)]
    pub async fn login(&self, credentials: &Credentials) -> bool {
        match self.try_login(credentials).await {
            Ok(()) => {
                tracing::info!("logged in");
                true
            }
            Err(error) => {
                tracing::warn!(error = (&error as &dyn error::Error), "login failed");
                false
            }
        }
    }

    async fn try_login(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let grant = self.inner.client.authenticate(credentials).await?;

        let refresh_token = present(grant.refresh_token).ok_or(SessionError::MissingField {
            field: "refreshToken",
        })?;

        let next = TokenState {
            refresh_token: Some(refresh_token),
            refresh_token_expiry: grant.refresh_token_expiry,
            access_token: present(grant.access_token),
            access_token_expiry: grant.access_token_expiry,
            user: grant.user,
        };

        let _guard = self.inner.mutation.lock().await;
        self.inner
            .store
            .save(&BundleUpdate::replace_with(&next))
            .await?;
        *self.inner.state.write().await = next;
        Ok(())
    }

    /// Fetches a captcha and remembers its token for [`start_sso`](Self::start_sso)
    pub async fn obtain_captcha(&self) -> Option<CaptchaChallenge> {
        match self.inner.client.obtain_captcha().await {
            Ok(challenge) => {
                *self.inner.captcha.lock().await = Some(challenge.token.clone());
                Some(challenge)
            }
            Err(error) => {
                tracing::warn!(error = (&error as &dyn error::Error), "unable to obtain captcha");
                None
            }
        }
    }

    /// Remembers a captcha token obtained some other way
    pub async fn set_captcha_token(&self, token: CaptchaToken) {
        *self.inner.captcha.lock().await = Some(token);
    }

    /// Asks the identity service to send a sign-on challenge
    ///
    /// Requires a captcha token from [`obtain_captcha`](Self::obtain_captcha)
    /// or [`set_captcha_token`](Self::set_captcha_token); without one nothing
    /// is sent. Does not change the session.
    pub async fn start_sso(&self, captcha_code: &str, identifier: &SsoIdentifier) -> SsoStatus {
        let Some(captcha_token) = self.inner.captcha.lock().await.clone() else {
            tracing::debug!("no captcha token; not requesting sign-on challenge");
            return SsoStatus::CaptchaRequired;
        };

        let status = match self
            .inner
            .client
            .start_challenge(&captcha_token, captcha_code, identifier)
            .await
        {
            Ok(status) => SsoStatus::from_status(status),
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to request sign-on challenge"
                );
                SsoStatus::TransportFailure
            }
        };

        if status.is_sent() {
            let mut captcha = self.inner.captcha.lock().await;
            if captcha.as_ref() == Some(&captcha_token) {
                *captcha = None;
            }
        }

        tracing::debug!(?status, "sign-on challenge requested");
        status
    }

    /// Makes sure a valid access token is held, renewing it if needed
    ///
    /// With `force`, renews even if the current access token is still valid.
    /// Concurrent callers share one renewal. A failed renewal deauthorizes
    /// the session and is not retried.
    ///
    /// Callers wait at most the client's request timeout plus a few seconds
    /// for the new token to be persisted. A caller that gives up sees `false`
    /// even if the renewal later succeeds and is adopted.
    pub async fn ensure_access_token(&self, force: bool) -> bool {
        self.renew(force).await.is_valid()
    }

    async fn renew(&self, force: bool) -> RenewalOutcome {
        let now = self.inner.clock.now();

        let pending = {
            let mut slot = self.inner.renewal.lock().await;
            let state = self.inner.state.read().await;

            let Some(refresh_token) = state.refresh_token.clone() else {
                drop(state);
                drop(slot);
                self.inner.notify_deauth(DeauthReason::NoSession);
                return RenewalOutcome::NoSession;
            };

            if let Some(in_flight) = slot.as_ref() {
                tracing::debug!("joining renewal already in flight");
                in_flight.pending.clone()
            } else if !force && state.has_valid_access(now) {
                return RenewalOutcome::Current;
            } else if !state.has_valid_refresh(now) {
                drop(state);
                drop(slot);
                self.inner.notify_deauth(DeauthReason::SessionExpired);
                return RenewalOutcome::Expired;
            } else {
                drop(state);
                let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel);
                let pending = Inner::spawn_renewal(Arc::clone(&self.inner), generation, refresh_token);
                *slot = Some(InFlight {
                    generation,
                    pending: pending.clone(),
                });
                pending
            }
        };

        let timeout = self.inner.client.request_timeout() + RENEWAL_GRACE;
        match tokio::time::timeout(timeout, pending).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for access token renewal"
                );
                RenewalOutcome::TransportFailure
            }
        }
    }

    /// Ends the session locally, then revokes it remotely on a best-effort basis
    ///
    /// Returns `false` if there was no session or the cleared bundle could
    /// not be persisted. The revocation's outcome does not affect the result.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) -> bool {
        let refresh_token = {
            let _guard = self.inner.mutation.lock().await;

            let Some(refresh_token) = self.inner.state.read().await.refresh_token.clone() else {
                tracing::debug!("no session to log out of");
                return false;
            };

            if let Err(error) = self.inner.store.clear().await {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to clear stored credentials; session kept"
                );
                return false;
            }

            *self.inner.state.write().await = TokenState::default();
            refresh_token
        };

        tracing::info!("session cleared");

        if let Err(error) = self.inner.client.revoke(&refresh_token).await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to revoke refresh token with identity service"
            );
        }

        true
    }

    /// Runs `action` with the current access token
    ///
    /// If the session is unrecoverable the deauthorization handler is told and
    /// `action` is not run, yielding `None`. An expired access token is renewed
    /// first; if that fails `action` still runs with whatever token is held
    /// and must cope with the service rejecting it.
    pub async fn run_authenticated<F, Fut, T>(&self, action: F) -> Option<T>
    where
        F: FnOnce(Option<AccessToken>) -> Fut,
        Fut: Future<Output = T>,
    {
        let now = self.inner.clock.now();
        let (has_refresh, valid_refresh, valid_access) = {
            let state = self.inner.state.read().await;
            (
                state.refresh_token.is_some(),
                state.has_valid_refresh(now),
                state.has_valid_access(now),
            )
        };

        if !valid_refresh {
            self.inner.notify_deauth(if has_refresh {
                DeauthReason::SessionExpired
            } else {
                DeauthReason::NoSession
            });
            return None;
        }

        if !valid_access && !self.ensure_access_token(false).await {
            tracing::debug!("running action without a renewed access token");
        }

        let access_token = self.inner.state.read().await.access_token.clone();
        Some(action(access_token).await)
    }

    /// Gets the user's profile, from cache unless `force_remote`
    ///
    /// `None` both when not authenticated and when the fetch failed; use
    /// [`is_authenticated`](Self::is_authenticated) to tell them apart.
    pub async fn fetch_user(&self, force_remote: bool) -> Option<UserRecord> {
        if !self.is_authenticated().await {
            return None;
        }

        let (cached, access_token) = {
            let state = self.inner.state.read().await;
            (
                state.user.clone().filter(|u| u.user_id().is_some()),
                state.access_token.clone(),
            )
        };

        if !force_remote {
            if let Some(user) = cached {
                tracing::trace!("serving cached user profile");
                return Some(user);
            }
        }

        match self.try_fetch_user(access_token?).await {
            Ok(user) => Some(user),
            Err(error) => {
                tracing::warn!(error = (&error as &dyn error::Error), "unable to fetch user profile");
                None
            }
        }
    }

    async fn try_fetch_user(&self, access_token: AccessToken) -> Result<UserRecord, SessionError> {
        let user = self.inner.client.fetch_profile(&access_token).await?;

        let _guard = self.inner.mutation.lock().await;
        if self.inner.state.read().await.refresh_token.is_none() {
            return Err(SessionError::SessionExpired);
        }

        let update = BundleUpdate {
            user: Patch::Set(user.clone()),
            ..BundleUpdate::default()
        };
        self.inner.store.save(&update).await?;
        self.inner.state.write().await.apply(&update);
        Ok(user)
    }

    /// The current access token, valid or not
    pub async fn access_token(&self) -> Option<AccessToken> {
        self.inner.state.read().await.access_token.clone()
    }

    /// A copy of the current credential bundle
    pub async fn snapshot(&self) -> TokenState {
        self.inner.state.read().await.clone()
    }

    /// The time according to this manager's clock
    pub fn now(&self) -> UnixTime {
        self.inner.clock.now()
    }
}

impl<K> Inner<K>
where
    K: Clock + Send + Sync + 'static,
{
    fn notify_deauth(&self, reason: DeauthReason) {
        let handler = self
            .deauth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => {
                tracing::info!(?reason, "session deauthorized");
                handler(reason);
            }
            None => {
                tracing::debug!(?reason, "session deauthorized; no handler registered");
            }
        }
    }

    /// Starts a renewal that completes even if every caller stops waiting
    fn spawn_renewal(inner: Arc<Self>, generation: u64, refresh_token: RefreshToken) -> PendingRenewal {
        let task_inner = Arc::clone(&inner);
        let task = tokio::spawn(
            async move {
                let outcome = task_inner.perform_renewal(&refresh_token).await;
                task_inner.finish_renewal(generation).await;
                outcome
            }
            .instrument(tracing::debug_span!("renewal", generation)),
        );

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(error = (&error as &dyn error::Error), "renewal task failed");
                    inner.finish_renewal(generation).await;
                    RenewalOutcome::TransportFailure
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn finish_renewal(&self, generation: u64) {
        let mut slot = self.renewal.lock().await;
        if slot.as_ref().map(|f| f.generation) == Some(generation) {
            *slot = None;
        }
    }

    async fn perform_renewal(&self, refresh_token: &RefreshTokenRef) -> RenewalOutcome {
        tracing::debug!("requesting new access token");

        let renewed = match self.client.refresh(refresh_token).await {
            Ok(renewed) => renewed,
            Err(error) => {
                tracing::warn!(error = (&error as &dyn error::Error), "access token renewal failed");
                return match error {
                    AuthError::Transport(_) => {
                        self.notify_deauth(DeauthReason::RenewalFailed);
                        RenewalOutcome::TransportFailure
                    }
                    _ => {
                        self.notify_deauth(DeauthReason::RenewalRejected {
                            status: error.status(),
                        });
                        RenewalOutcome::Rejected
                    }
                };
            }
        };

        let Some(access_token) = present(renewed.access_token) else {
            tracing::warn!("renewal response did not include an access token");
            self.notify_deauth(DeauthReason::RenewalRejected { status: None });
            return RenewalOutcome::Rejected;
        };

        let _guard = self.mutation.lock().await;
        if self.state.read().await.refresh_token() != Some(refresh_token) {
            tracing::debug!("session changed during renewal; discarding new access token");
            return RenewalOutcome::Superseded;
        }

        let update = BundleUpdate {
            access_token: Patch::Set(access_token),
            access_token_expiry: Some(renewed.expiry),
            user: renewed.user.map_or(Patch::Keep, Patch::Set),
            ..BundleUpdate::default()
        };

        if let Err(error) = self.store.save(&update).await {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "unable to persist renewed access token; keeping previous state"
            );
            return RenewalOutcome::StorageFailure;
        }

        self.state.write().await.apply(&update);
        tracing::info!(expiry = renewed.expiry.0, "access token renewed");
        RenewalOutcome::Renewed
    }
}
