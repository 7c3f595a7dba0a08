//! Client-side session management for an identity-as-a-service backend
//!
//! A [`SessionManager`] owns one user session: a long-lived refresh token, a
//! short-lived access token and an opportunistically cached user profile. It
//! persists every change through a [`SecureStore`] before the change becomes
//! observable, renews the access token when it has expired, and tells a
//! registered handler when the session can no longer be used so that the
//! application can send the user back to sign in.
//!
//! Renewal is single-flight. However many tasks find the access token expired
//! at once, only one refresh request goes to the identity service and every
//! caller observes its outcome.
//!
//! # General flow
//!
//! On start-up, build the manager against your identity service and a store,
//! register a deauthorization handler and load whatever was persisted by a
//! previous run. From then on, wrap calls to your own API in
//! [`run_authenticated`][SessionManager::run_authenticated], which hands over a
//! fresh access token.
//!
//! ```no_run
//! use idaas_session::{store::FileStore, Credentials, SessionConfig, SessionManager};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_env()?;
//! let manager = SessionManager::connect(&config, FileStore::new("credentials.json"))?
//!     .with_deauth_handler(|reason| eprintln!("signed out: {:?}", reason));
//!
//! manager.init().await?;
//!
//! if !manager.is_authenticated().await {
//!     let credentials = Credentials::with_email("user@example.com", "hunter2");
//!     if !manager.login(&credentials).await {
//!         return Err("login failed".into());
//!     }
//! }
//!
//! let greeting = manager
//!     .run_authenticated(|token| async move {
//!         // call your API with `token` as the bearer credential
//!         format!("authorized: {}", token.is_some())
//!     })
//!     .await;
//! println!("{:?}", greeting);
//!
//! manager.logout().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Passwordless sign-on
//!
//! Sign-on challenges are protected by a captcha. Obtain one with
//! [`obtain_captcha`][SessionManager::obtain_captcha], show it to the user,
//! and pass their answer to [`start_sso`][SessionManager::start_sso].
//!
//! # Storage
//!
//! [`FileStore`](store::FileStore) (feature `file`, on by default) keeps the
//! bundle in a file readable only by the owner. [`KeyringStore`] (feature
//! `keyring`) uses the platform's credential vault. [`InMemoryStore`] keeps
//! nothing across restarts and is handy for tests.
//!
#![cfg_attr(feature = "keyring", doc = "[`KeyringStore`]: store::KeyringStore")]
#![cfg_attr(not(feature = "keyring"), doc = "[`KeyringStore`]: store")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod client;
pub mod config;
mod error;
mod manager;
mod state;
pub mod store;

pub use braids::*;
pub use client::{AuthClient, AuthError, Credentials, SsoIdentifier};
pub use config::{ConfigError, SessionConfig};
pub use error::SessionError;
pub use manager::{DeauthHandler, DeauthReason, SessionManager, SsoStatus};
pub use state::{BundleUpdate, Patch, TokenState, UserRecord};
pub use store::{InMemoryStore, SecureStore, StoreError};
