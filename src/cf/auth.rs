//! UAA Authentication
//!
//! Acquires OAuth2 bearer tokens from the UAA token endpoint, caches the
//! current token and refreshes it shortly before it expires.
//!
//! Acquisition is delegated to a [`GrantStrategy`] chosen once per
//! [`TokenManager`]: plain password grant, password grant with an origin
//! login hint, or a token exchange layered on top of either.

use crate::error::{CfError, CfResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Refresh tokens this many seconds before they actually expire.
/// This prevents using tokens that are about to expire during a request.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 50;

/// Default token TTL if the endpoint does not report `expires_in`
const DEFAULT_TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

/// Claim carrying the token obtained through token exchange
pub const EXCHANGED_TOKEN_CLAIM: &str = "exchanged_token";

const REFRESH_TOKEN_CLAIM: &str = "refresh_token";

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// User credentials for the password grant.
///
/// The [`Debug`] impl redacts secrets.
#[derive(Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    /// Adopted verbatim on `init` instead of calling the token endpoint
    pub pre_supplied_token: Option<OAuth2Token>,
    /// Whether the manager may obtain a new token when this one nears expiry
    pub refreshable: bool,
}

impl Credentials {
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            client_id: "cf".to_string(),
            client_secret: String::new(),
            username: username.to_string(),
            password: password.to_string(),
            pre_supplied_token: None,
            refreshable: true,
        }
    }

    /// Credentials wrapping an existing token.
    pub fn with_token(token: OAuth2Token, refreshable: bool) -> Self {
        Self {
            client_id: "cf".to_string(),
            pre_supplied_token: Some(token),
            refreshable,
            ..Default::default()
        }
    }

    pub fn client(mut self, client_id: &str, client_secret: &str) -> Self {
        self.client_id = client_id.to_string();
        self.client_secret = client_secret.to_string();
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("pre_supplied_token", &self.pre_supplied_token.is_some())
            .field("refreshable", &self.refreshable)
            .finish()
    }
}

/// An OAuth2 access token. Replaced wholesale on refresh, never mutated.
#[derive(Clone, PartialEq)]
pub struct OAuth2Token {
    pub value: String,
    pub token_type: String,
    pub scopes: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub additional_claims: Map<String, Value>,
}

impl OAuth2Token {
    pub fn bearer(value: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.to_string(),
            token_type: "bearer".to_string(),
            scopes: BTreeSet::new(),
            expires_at,
            additional_claims: Map::new(),
        }
    }

    /// The value to send as bearer: the exchanged token when present.
    pub fn effective_value(&self) -> &str {
        self.additional_claims
            .get(EXCHANGED_TOKEN_CLAIM)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.value)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.additional_claims
            .get(REFRESH_TOKEN_CLAIM)
            .and_then(|v| v.as_str())
    }

    /// True once `now + margin` reaches the expiry instant.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now + margin >= self.expires_at
    }

    /// `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.effective_value())
    }

    fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let ttl = response.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        Self {
            value: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            scopes: response
                .scope
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            expires_at: now + Duration::seconds(ttl),
            additional_claims: response.extra,
        }
    }
}

impl fmt::Debug for OAuth2Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Token")
            .field("value", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field(
                "additional_claims",
                &self.additional_claims.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Token response from `POST /oauth/token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// The UAA token endpoint.
#[derive(Clone)]
pub struct AuthEndpoint {
    http: reqwest::Client,
    token_url: String,
}

impl AuthEndpoint {
    pub fn new(http: reqwest::Client, auth_url: &str) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/token", auth_url.trim_end_matches('/')),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// POST a form-encoded grant and parse the token response.
    /// Every failure surfaces as `AuthenticationFailed`.
    pub async fn request_token(
        &self,
        credentials: &Credentials,
        form: &[(&str, &str)],
    ) -> CfResult<OAuth2Token> {
        let grant = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("unknown");
        tracing::debug!("Requesting token from {} (grant_type={})", self.token_url, grant);

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| CfError::AuthenticationFailed(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let description = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error_description")
                        .or_else(|| v.get("error"))
                        .and_then(|d| d.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| super::http::sanitize_for_log(&body));
            return Err(CfError::AuthenticationFailed(format!(
                "Token endpoint returned {status}: {description}"
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            CfError::AuthenticationFailed(format!("Failed to parse token response: {e}"))
        })?;

        Ok(OAuth2Token::from_response(token_response, Utc::now()))
    }
}

/// A way of producing a fresh token from credentials.
#[async_trait]
pub trait GrantStrategy: Send + Sync {
    /// Obtain a brand new token.
    async fn acquire(&self, credentials: &Credentials) -> CfResult<OAuth2Token>;

    /// Replace a token that is about to expire.
    async fn refresh(
        &self,
        credentials: &Credentials,
        _current: &OAuth2Token,
    ) -> CfResult<OAuth2Token> {
        self.acquire(credentials).await
    }

    fn name(&self) -> &'static str;
}

/// Resource owner password grant.
pub struct PasswordGrant {
    endpoint: AuthEndpoint,
}

impl PasswordGrant {
    pub fn new(endpoint: AuthEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl GrantStrategy for PasswordGrant {
    async fn acquire(&self, credentials: &Credentials) -> CfResult<OAuth2Token> {
        password_grant(&self.endpoint, credentials, None).await
    }

    async fn refresh(
        &self,
        credentials: &Credentials,
        current: &OAuth2Token,
    ) -> CfResult<OAuth2Token> {
        refresh_or_acquire(&self.endpoint, credentials, current, None).await
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

/// Password grant routed to a specific identity provider origin.
pub struct LoginHintGrant {
    endpoint: AuthEndpoint,
    login_hint: String,
}

impl LoginHintGrant {
    pub fn new(endpoint: AuthEndpoint, origin: &str) -> Self {
        Self {
            endpoint,
            login_hint: serde_json::json!({ "origin": origin }).to_string(),
        }
    }
}

#[async_trait]
impl GrantStrategy for LoginHintGrant {
    async fn acquire(&self, credentials: &Credentials) -> CfResult<OAuth2Token> {
        password_grant(&self.endpoint, credentials, Some(&self.login_hint)).await
    }

    async fn refresh(
        &self,
        credentials: &Credentials,
        current: &OAuth2Token,
    ) -> CfResult<OAuth2Token> {
        refresh_or_acquire(&self.endpoint, credentials, current, Some(&self.login_hint)).await
    }

    fn name(&self) -> &'static str {
        "password+login_hint"
    }
}

/// Exchanges the token produced by another strategy.
///
/// The resulting token keeps the inner token's value and carries the
/// exchanged access token under [`EXCHANGED_TOKEN_CLAIM`].
pub struct TokenExchangeGrant {
    endpoint: AuthEndpoint,
    inner: Arc<dyn GrantStrategy>,
}

impl TokenExchangeGrant {
    pub fn new(endpoint: AuthEndpoint, inner: Arc<dyn GrantStrategy>) -> Self {
        Self { endpoint, inner }
    }

    async fn exchange(
        &self,
        credentials: &Credentials,
        subject: OAuth2Token,
    ) -> CfResult<OAuth2Token> {
        let form = [
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token", subject.value.as_str()),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
        ];
        let exchanged = self.endpoint.request_token(credentials, &form).await?;

        let mut token = subject;
        token.expires_at = token.expires_at.min(exchanged.expires_at);
        token
            .additional_claims
            .insert(EXCHANGED_TOKEN_CLAIM.to_string(), Value::String(exchanged.value));
        Ok(token)
    }
}

#[async_trait]
impl GrantStrategy for TokenExchangeGrant {
    async fn acquire(&self, credentials: &Credentials) -> CfResult<OAuth2Token> {
        let subject = self.inner.acquire(credentials).await?;
        self.exchange(credentials, subject).await
    }

    async fn refresh(
        &self,
        credentials: &Credentials,
        current: &OAuth2Token,
    ) -> CfResult<OAuth2Token> {
        let subject = self.inner.refresh(credentials, current).await?;
        self.exchange(credentials, subject).await
    }

    fn name(&self) -> &'static str {
        "token-exchange"
    }
}

async fn password_grant(
    endpoint: &AuthEndpoint,
    credentials: &Credentials,
    login_hint: Option<&str>,
) -> CfResult<OAuth2Token> {
    let mut form = vec![
        ("grant_type", "password"),
        ("username", credentials.username.as_str()),
        ("password", credentials.password.as_str()),
        ("response_type", "token"),
    ];
    if let Some(hint) = login_hint {
        form.push(("login_hint", hint));
    }
    endpoint.request_token(credentials, &form).await
}

/// Use the refresh token when one is held; fall back to a full password
/// grant when there is none or the endpoint rejects it.
async fn refresh_or_acquire(
    endpoint: &AuthEndpoint,
    credentials: &Credentials,
    current: &OAuth2Token,
    login_hint: Option<&str>,
) -> CfResult<OAuth2Token> {
    if let Some(refresh_token) = current.refresh_token() {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        match endpoint.request_token(credentials, &form).await {
            Ok(token) => return Ok(token),
            Err(e) => tracing::warn!("Refresh grant rejected, re-authenticating: {}", e),
        }
    }
    password_grant(endpoint, credentials, login_hint).await
}

/// Lifecycle of the managed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Uninitialized,
    HoldingToken,
}

struct Session {
    credentials: Credentials,
    token: Arc<OAuth2Token>,
}

/// Owns the current access token and refreshes it ahead of expiry.
///
/// Reads take a shared lock; refreshes are serialized so concurrent callers
/// observe a single refresh in flight.
pub struct TokenManager {
    strategy: Arc<dyn GrantStrategy>,
    session: RwLock<Option<Session>>,
    refresh_lock: Mutex<()>,
    margin: Duration,
}

impl TokenManager {
    pub fn new(strategy: Arc<dyn GrantStrategy>) -> Self {
        Self {
            strategy,
            session: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            margin: Duration::seconds(TOKEN_REFRESH_MARGIN_SECS),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn state(&self) -> TokenState {
        match *self.session.read().await {
            Some(_) => TokenState::HoldingToken,
            None => TokenState::Uninitialized,
        }
    }

    /// Adopt the pre-supplied token or acquire one through the strategy.
    pub async fn init(&self, credentials: Credentials) -> CfResult<Arc<OAuth2Token>> {
        let _guard = self.refresh_lock.lock().await;

        let token = match credentials.pre_supplied_token.clone() {
            Some(token) => {
                tracing::debug!("Adopting pre-supplied token");
                token
            },
            None => {
                let token = self.strategy.acquire(&credentials).await?;
                tracing::info!(
                    "Acquired token via {} grant, expires at {}",
                    self.strategy.name(),
                    token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                token
            },
        };

        let token = Arc::new(token);
        *self.session.write().await = Some(Session {
            credentials,
            token: token.clone(),
        });
        Ok(token)
    }

    /// Current token, refreshed first when it is within the margin.
    /// `None` while uninitialized.
    pub async fn get_token(&self) -> CfResult<Option<Arc<OAuth2Token>>> {
        let observed = {
            let session = self.session.read().await;
            let Some(session) = session.as_ref() else {
                return Ok(None);
            };
            if !self.needs_refresh(session) {
                return Ok(Some(session.token.clone()));
            }
            session.token.clone()
        };

        self.refresh(observed).await
    }

    /// Effective bearer value for outbound requests.
    pub async fn bearer(&self) -> CfResult<Option<String>> {
        Ok(self
            .get_token()
            .await?
            .map(|token| token.effective_value().to_string()))
    }

    /// Drop the token and credentials.
    pub async fn clear(&self) {
        let _guard = self.refresh_lock.lock().await;
        *self.session.write().await = None;
        tracing::debug!("Token cleared");
    }

    fn needs_refresh(&self, session: &Session) -> bool {
        session.credentials.refreshable && session.token.expires_within(self.margin, Utc::now())
    }

    async fn refresh(&self, observed: Arc<OAuth2Token>) -> CfResult<Option<Arc<OAuth2Token>>> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed or cleared while we waited.
        let credentials = {
            let session = self.session.read().await;
            let Some(session) = session.as_ref() else {
                return Ok(None);
            };
            if !Arc::ptr_eq(&session.token, &observed) || !self.needs_refresh(session) {
                return Ok(Some(session.token.clone()));
            }
            session.credentials.clone()
        };

        tracing::info!("Token expires within {}s, refreshing", self.margin.num_seconds());
        let token = Arc::new(self.strategy.refresh(&credentials, &observed).await?);

        let mut session = self.session.write().await;
        match session.as_mut() {
            Some(session) => session.token = token.clone(),
            None => return Ok(None),
        }
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Issues `token-<n>` valid for one hour and counts calls.
    struct CountingGrant {
        calls: AtomicUsize,
    }

    impl CountingGrant {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GrantStrategy for CountingGrant {
        async fn acquire(&self, _credentials: &Credentials) -> CfResult<OAuth2Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(OAuth2Token::bearer(
                &format!("token-{n}"),
                Utc::now() + Duration::hours(1),
            ))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct FailingGrant;

    #[async_trait]
    impl GrantStrategy for FailingGrant {
        async fn acquire(&self, _credentials: &Credentials) -> CfResult<OAuth2Token> {
            Err(CfError::AuthenticationFailed("bad credentials".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_uninitialized_returns_none() {
        let manager = TokenManager::new(CountingGrant::new());
        assert!(manager.get_token().await.unwrap().is_none());
        assert_eq!(manager.state().await, TokenState::Uninitialized);
    }

    #[tokio::test]
    async fn test_init_adopts_pre_supplied_token() {
        let grant = CountingGrant::new();
        let manager = TokenManager::new(grant.clone());
        let token = OAuth2Token::bearer("given", Utc::now() + Duration::hours(1));

        manager
            .init(Credentials::with_token(token, true))
            .await
            .unwrap();

        let current = manager.get_token().await.unwrap().unwrap();
        assert_eq!(current.value, "given");
        assert_eq!(grant.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let grant = CountingGrant::new();
        let manager = TokenManager::new(grant.clone());
        manager
            .init(Credentials::password("user", "pass"))
            .await
            .unwrap();

        let first = manager.get_token().await.unwrap().unwrap();
        let second = manager.get_token().await.unwrap().unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(grant.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let grant = CountingGrant::new();
        let manager = Arc::new(TokenManager::new(grant.clone()));
        let expiring = OAuth2Token::bearer("old", Utc::now() + Duration::seconds(10));
        manager
            .init(Credentials::with_token(expiring, true))
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_token().await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap().unwrap();
            assert_eq!(token.value, "token-1");
        }
        assert_eq!(grant.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_refreshable_token_is_returned_as_is() {
        let grant = CountingGrant::new();
        let manager = TokenManager::new(grant.clone());
        let expired = OAuth2Token::bearer("stale", Utc::now() - Duration::seconds(5));
        manager
            .init(Credentials::with_token(expired, false))
            .await
            .unwrap();

        let token = manager.get_token().await.unwrap().unwrap();
        assert_eq!(token.value, "stale");
        assert_eq!(grant.calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_returns_to_uninitialized() {
        let manager = TokenManager::new(CountingGrant::new());
        manager
            .init(Credentials::password("user", "pass"))
            .await
            .unwrap();
        manager.clear().await;

        assert!(manager.get_token().await.unwrap().is_none());
        assert_eq!(manager.state().await, TokenState::Uninitialized);
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_authentication_error() {
        let manager = TokenManager::new(Arc::new(FailingGrant));
        let err = manager
            .init(Credentials::password("user", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, CfError::AuthenticationFailed(_)));
        assert_eq!(manager.state().await, TokenState::Uninitialized);
    }

    #[test]
    fn test_exchanged_token_supersedes_value() {
        let mut token = OAuth2Token::bearer("raw", Utc::now());
        assert_eq!(token.effective_value(), "raw");

        token
            .additional_claims
            .insert(EXCHANGED_TOKEN_CLAIM.to_string(), Value::String("swapped".into()));
        assert_eq!(token.effective_value(), "swapped");
        assert_eq!(token.authorization_header(), "bearer swapped");
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        let token = OAuth2Token::bearer("t", now + Duration::seconds(49));
        assert!(token.expires_within(Duration::seconds(TOKEN_REFRESH_MARGIN_SECS), now));

        let token = OAuth2Token::bearer("t", now + Duration::seconds(120));
        assert!(!token.expires_within(Duration::seconds(TOKEN_REFRESH_MARGIN_SECS), now));
    }

    #[test]
    fn test_token_response_keeps_extra_claims() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "abc",
            "token_type": "bearer",
            "scope": "cloud_controller.read openid",
            "expires_in": 600,
            "refresh_token": "r-1",
            "jti": "xyz"
        }))
        .unwrap();

        let now = Utc::now();
        let token = OAuth2Token::from_response(response, now);
        assert_eq!(token.expires_at, now + Duration::seconds(600));
        assert!(token.scopes.contains("cloud_controller.read"));
        assert_eq!(token.refresh_token(), Some("r-1"));
        assert_eq!(token.additional_claims.get("jti").and_then(|v| v.as_str()), Some("xyz"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = Credentials::password("alice", "hunter2");
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("alice"));
    }
}
