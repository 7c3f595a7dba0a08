//! Where the identity service lives and how to talk to it

use std::time::Duration;

use idaas_clock::DurationSecs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{client::DEFAULT_REQUEST_TIMEOUT, store::DEFAULT_NAMESPACE};

/// The API version segment used when none is configured
pub const DEFAULT_API_VERSION: &str = "v1";

/// An invalid session configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No identity service domain was given
    #[error("identity service domain is not configured")]
    MissingDomain,
    /// The domain or origin does not form a valid URL
    #[error("invalid identity service address `{value}`")]
    InvalidUrl {
        /// The offending value
        value: String,
        /// Why it could not be parsed
        source: url::ParseError,
    },
    /// The request timeout is not a whole number of seconds
    #[error("invalid request timeout `{value}`")]
    InvalidTimeout {
        /// The offending value
        value: String,
        /// Why it could not be parsed
        source: std::num::ParseIntError,
    },
}

/// Configuration for a session against one identity service
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// The identity service's domain, e.g. `id.example.com`
    pub domain: String,
    /// Overrides the `https://{domain}` origin
    #[serde(default)]
    pub origin: Option<Url>,
    /// The API version path segment
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Upper bound on any single remote call
    #[serde(default = "default_request_timeout")]
    pub request_timeout: DurationSecs,
    /// Storage namespace for the credential bundle
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_owned()
}

fn default_request_timeout() -> DurationSecs {
    DEFAULT_REQUEST_TIMEOUT.into()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

impl SessionConfig {
    /// Constructs a configuration with defaults for everything but the domain
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            origin: None,
            api_version: default_api_version(),
            request_timeout: default_request_timeout(),
            namespace: default_namespace(),
        }
    }

    /// Reads the configuration from `IDAAS_*` environment variables
    ///
    /// `IDAAS_DOMAIN` is required; `IDAAS_ORIGIN`, `IDAAS_API_VERSION`,
    /// `IDAAS_REQUEST_TIMEOUT_SECS` and `IDAAS_NAMESPACE` are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let domain = get("IDAAS_DOMAIN").ok_or(ConfigError::MissingDomain)?;
        let mut config = Self::new(domain);

        if let Some(origin) = get("IDAAS_ORIGIN") {
            config.origin = Some(parse_url(&origin)?);
        }
        if let Some(version) = get("IDAAS_API_VERSION") {
            config.api_version = version;
        }
        if let Some(timeout) = get("IDAAS_REQUEST_TIMEOUT_SECS") {
            let secs = timeout
                .trim()
                .parse()
                .map_err(|source| ConfigError::InvalidTimeout {
                    value: timeout.clone(),
                    source,
                })?;
            config.request_timeout = DurationSecs(secs);
        }
        if let Some(namespace) = get("IDAAS_NAMESPACE") {
            config.namespace = namespace;
        }

        Ok(config)
    }

    /// Serves the API from `origin` instead of `https://{domain}`
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Uses a different API version segment
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Bounds every remote call by `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.into();
        self
    }

    /// Stores credentials under a different namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.into()
    }

    /// The origin all endpoints hang off, always ending in `/`
    pub fn origin(&self) -> Result<Url, ConfigError> {
        let mut origin = match &self.origin {
            Some(origin) => origin.clone(),
            None => parse_url(&format!("https://{}/", self.domain))?,
        };

        if !origin.path().ends_with('/') {
            let path = format!("{}/", origin.path());
            origin.set_path(&path);
        }

        Ok(origin)
    }

    /// The address of a named endpoint: `{origin}/{api_version}/{name}`
    pub fn endpoint(&self, name: &str) -> Result<Url, ConfigError> {
        let relative = format!("{}/{}", self.api_version.trim_matches('/'), name);
        self.origin()?
            .join(&relative)
            .map_err(|source| ConfigError::InvalidUrl {
                value: relative,
                source,
            })
    }
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        value: value.to_owned(),
        source,
    })
}
