//! An identity service client over HTTP

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, Response, Url};
use serde::de::DeserializeOwned;

use super::{
    dto::{self, CaptchaChallenge, LoginGrant, RenewedAccess},
    AuthClient, AuthError, Credentials, SsoIdentifier,
};
use crate::{
    config::{ConfigError, SessionConfig},
    AccessTokenRef, CaptchaTokenRef, RefreshTokenRef, UserRecord,
};

const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";
const ACCESS_TOKEN_HEADER: &str = "x-access-token";
const CAPTCHA_TOKEN_HEADER: &str = "x-captcha-token";
const CAPTCHA_CODE_HEADER: &str = "x-captcha-code";

#[derive(Debug, Clone)]
struct Endpoints {
    auth: Url,
    sso: Url,
    user: Url,
    captcha: Url,
}

impl Endpoints {
    fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            auth: config.endpoint("auth")?,
            sso: config.endpoint("sso")?,
            user: config.endpoint("user")?,
            captcha: config.endpoint("captcha")?,
        })
    }
}

/// An [`AuthClient`] speaking JSON over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: Client,
    endpoints: Endpoints,
    timeout: Duration,
}

impl HttpAuthClient {
    /// Constructs a client for the configured identity service
    pub fn new(config: &SessionConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(concat!("idaas_session/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(transport)?;

        Self::with_client(client, config)
    }

    /// Constructs a client reusing an existing `reqwest` client
    ///
    /// The configured request timeout still bounds single-flight waiters, so
    /// `client` should enforce a timeout no longer than it.
    pub fn with_client(client: Client, config: &SessionConfig) -> Result<Self, AuthError> {
        let endpoints = Endpoints::new(config)?;

        Ok(Self {
            client,
            endpoints,
            timeout: config.request_timeout(),
        })
    }
}

fn transport(err: reqwest::Error) -> AuthError {
    AuthError::Transport(Box::new(err))
}

fn secret_header(value: &str) -> Result<HeaderValue, AuthError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| AuthError::InvalidHeader)?;
    header.set_sensitive(true);
    Ok(header)
}

async fn read_data<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
    let status = resp.status();

    tracing::debug!(
        response.status = status.as_u16(),
        "received response from identity service"
    );

    if !status.is_success() {
        let body = resp.text().await.map_err(transport)?;
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = resp.bytes().await.map_err(transport)?;
    let envelope: dto::Envelope<T> = serde_json::from_slice(&body)?;
    Ok(envelope.data)
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            url = %self.endpoints.auth,
            credentials.email = credentials.email(),
            credentials.username = credentials.username(),
        ),
    )]
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginGrant, AuthError> {
        tracing::trace!("requesting session from identity service");

        let resp = self
            .client
            .post(self.endpoints.auth.clone())
            .json(credentials)
            .send()
            .await
            .map_err(transport)?;

        let grant: LoginGrant = read_data(resp).await?;

        tracing::info!(
            has_refresh_token = grant.refresh_token.is_some(),
            has_access_token = grant.access_token.is_some(),
            refresh_token_expiry = grant.refresh_token_expiry.0,
            access_token_expiry = grant.access_token_expiry.0,
            "received login grant"
        );

        Ok(grant)
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.endpoints.sso, identifier.kind))]
    async fn start_challenge(
        &self,
        captcha_token: &CaptchaTokenRef,
        captcha_code: &str,
        identifier: &SsoIdentifier,
    ) -> Result<u16, AuthError> {
        let (kind, value) = identifier.query_pair();
        tracing::Span::current().record("identifier.kind", kind);

        let resp = self
            .client
            .get(self.endpoints.sso.clone())
            .header(CAPTCHA_TOKEN_HEADER, secret_header(captcha_token.as_str())?)
            .header(CAPTCHA_CODE_HEADER, secret_header(captcha_code)?)
            .query(&[(kind, value)])
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status().as_u16();
        tracing::debug!(response.status = status, "sign-on challenge answered");
        Ok(status)
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.endpoints.auth))]
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<RenewedAccess, AuthError> {
        tracing::trace!("requesting access token from identity service");

        let resp = self
            .client
            .get(self.endpoints.auth.clone())
            .header(REFRESH_TOKEN_HEADER, secret_header(refresh_token.as_str())?)
            .send()
            .await
            .map_err(transport)?;

        let renewed: RenewedAccess = read_data(resp).await?;

        tracing::info!(
            has_access_token = renewed.access_token.is_some(),
            expiry = renewed.expiry.0,
            has_user = renewed.user.is_some(),
            "received renewed access token"
        );

        Ok(renewed)
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.endpoints.auth))]
    async fn revoke(&self, refresh_token: &RefreshTokenRef) -> Result<(), AuthError> {
        let resp = self
            .client
            .delete(self.endpoints.auth.clone())
            .header(REFRESH_TOKEN_HEADER, secret_header(refresh_token.as_str())?)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(response.status = status.as_u16(), "refresh token revoked");
            Ok(())
        } else {
            let body = resp.text().await.map_err(transport)?;
            Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.endpoints.user))]
    async fn fetch_profile(&self, access_token: &AccessTokenRef) -> Result<UserRecord, AuthError> {
        let resp = self
            .client
            .get(self.endpoints.user.clone())
            .header(ACCESS_TOKEN_HEADER, secret_header(access_token.as_str())?)
            .send()
            .await
            .map_err(transport)?;

        read_data(resp).await
    }

    #[tracing::instrument(err, skip_all, fields(url = %self.endpoints.captcha))]
    async fn obtain_captcha(&self) -> Result<CaptchaChallenge, AuthError> {
        let resp = self
            .client
            .get(self.endpoints.captcha.clone())
            .send()
            .await
            .map_err(transport)?;

        read_data(resp).await
    }

    fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use idaas_clock::UnixTime;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{AccessToken, CaptchaToken, RefreshToken};

    async fn client_for(server: &MockServer) -> HttpAuthClient {
        let config = SessionConfig::new("unused.example.com")
            .with_origin(Url::parse(&server.uri()).unwrap())
            .with_request_timeout(Duration::from_secs(5));
        HttpAuthClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn authenticate_posts_credentials_and_reads_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth"))
            .and(body_json(json!({ "email": "a@example.com", "password": "pw" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "refreshToken": "r1",
                    "refreshTokenExpiry": 4600,
                    "accessToken": "a1",
                    "accessTokenExpiry": 1300,
                    "user": { "user_id": 9 }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let grant = client
            .authenticate(&Credentials::with_email("a@example.com", "pw"))
            .await
            .unwrap();

        assert_eq!(grant.refresh_token, Some(RefreshToken::from_static("r1")));
        assert_eq!(grant.access_token, Some(AccessToken::from_static("a1")));
        assert_eq!(grant.refresh_token_expiry, UnixTime(4600));
        assert_eq!(grant.access_token_expiry, UnixTime(1300));
    }

    #[tokio::test]
    async fn authenticate_reports_rejection_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth"))
            .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .authenticate(&Credentials::with_username("alice", "pw"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn refresh_sends_refresh_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth"))
            .and(header(REFRESH_TOKEN_HEADER, "r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "accessToken": "a2", "expiry": 2000 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let renewed = client
            .refresh(RefreshTokenRef::from_str("r1"))
            .await
            .unwrap();

        assert_eq!(renewed.access_token, Some(AccessToken::from_static("a2")));
        assert_eq!(renewed.expiry, UnixTime(2000));
        assert_eq!(renewed.user, None);
    }

    #[tokio::test]
    async fn refresh_with_malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .refresh(RefreshTokenRef::from_str("r1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn revoke_deletes_with_refresh_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/auth"))
            .and(header(REFRESH_TOKEN_HEADER, "r1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.revoke(RefreshTokenRef::from_str("r1")).await.unwrap();
    }

    #[tokio::test]
    async fn start_challenge_returns_raw_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sso"))
            .and(header(CAPTCHA_TOKEN_HEADER, "c1"))
            .and(header(CAPTCHA_CODE_HEADER, "42"))
            .and(query_param("phone", "+15550100"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let status = client
            .start_challenge(
                CaptchaTokenRef::from_str("c1"),
                "42",
                &SsoIdentifier::Phone("+15550100".to_owned()),
            )
            .await
            .unwrap();

        assert_eq!(status, 429);
    }

    #[tokio::test]
    async fn fetch_profile_sends_access_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/user"))
            .and(header(ACCESS_TOKEN_HEADER, "a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "user_id": "u-1", "name": "Alice" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let user = client
            .fetch_profile(AccessTokenRef::from_str("a1"))
            .await
            .unwrap();

        assert_eq!(user.user_id(), Some(&json!("u-1")));
        assert_eq!(user.get("name"), Some(&json!("Alice")));
    }

    #[tokio::test]
    async fn obtain_captcha_reads_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/captcha"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "token": "c9", "image": "data:image/png;base64,AAAA" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let captcha = client.obtain_captcha().await.unwrap();

        assert_eq!(captcha.token, CaptchaToken::from_static("c9"));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = SessionConfig::new("unused.example.com")
            .with_origin(Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap())
            .with_request_timeout(Duration::from_secs(5));
        let client = HttpAuthClient::new(&config).unwrap();

        let err = client.obtain_captcha().await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)), "{:?}", err);
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn slow_service_times_out_as_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "accessToken": "late" } }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = SessionConfig::new("unused.example.com")
            .with_origin(Url::parse(&server.uri()).unwrap())
            .with_request_timeout(Duration::from_secs(1));
        let client = HttpAuthClient::new(&config).unwrap();

        let err = client
            .refresh(RefreshTokenRef::from_str("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)), "{:?}", err);
    }

    #[test]
    fn request_timeout_follows_configuration() {
        let config = SessionConfig::new("id.example.com").with_request_timeout(Duration::from_secs(7));
        let client = HttpAuthClient::new(&config).unwrap();
        assert_eq!(client.request_timeout(), Duration::from_secs(7));
    }
}
