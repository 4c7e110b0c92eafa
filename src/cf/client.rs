//! Cloud Controller Client
//!
//! HTTP implementation of [`ResourceProvider`], combining the token manager
//! and the HTTP wrapper. Understands both the V2 and V3 paging envelopes.

use super::auth::{
    AuthEndpoint, Credentials, GrantStrategy, LoginHintGrant, PasswordGrant, TokenExchangeGrant,
    TokenManager,
};
use super::http::CfHttpClient;
use super::provider::{ApiVersion, ListQuery, Page, RawRecord, ResourceProvider};
use crate::error::{CfError, CfResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Default number of records requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// How to log in against the UAA.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// UAA base URL; discovered from `/v2/info` when absent
    pub auth_url: Option<String>,
    /// Identity provider origin, sent as login hint
    pub origin: Option<String>,
    /// Exchange the password-grant token before use
    pub token_exchange: bool,
    pub page_size: Option<u32>,
}

/// Cloud Controller client
#[derive(Clone)]
pub struct CfClient {
    pub http: CfHttpClient,
    pub tokens: Arc<TokenManager>,
    api_url: String,
    page_size: u32,
}

impl CfClient {
    /// Create a client around an existing token manager
    pub fn new(api_url: &str, http: CfHttpClient, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            tokens,
            api_url: api_url.trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Discover the UAA, pick the grant strategy and log in
    pub async fn login(
        api_url: &str,
        credentials: Credentials,
        options: &LoginOptions,
    ) -> CfResult<Self> {
        let http = CfHttpClient::new()?;

        let auth_url = match &options.auth_url {
            Some(url) => url.clone(),
            None => discover_auth_url(&http, api_url).await?,
        };
        tracing::info!("Using UAA at {}", auth_url);

        let endpoint = AuthEndpoint::new(http.inner().clone(), &auth_url);
        let tokens = Arc::new(TokenManager::new(build_strategy(endpoint, options)));
        tokens.init(credentials).await?;

        let client = Self::new(api_url, http, tokens);
        Ok(match options.page_size {
            Some(size) => client.with_page_size(size),
            None => client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Build an absolute URL from an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    async fn bearer(&self) -> CfResult<String> {
        self.tokens
            .bearer()
            .await?
            .ok_or_else(|| CfError::Unauthorized("Not logged in".to_string()))
    }

    fn page_params(&self, version: ApiVersion, page: u32) -> Vec<(String, String)> {
        let size_param = match version {
            ApiVersion::V2 => "results-per-page",
            ApiVersion::V3 => "per_page",
        };
        vec![
            ("page".to_string(), page.to_string()),
            (size_param.to_string(), self.page_size.to_string()),
        ]
    }
}

/// Pick the grant strategy for a set of login options
pub fn build_strategy(endpoint: AuthEndpoint, options: &LoginOptions) -> Arc<dyn GrantStrategy> {
    let base: Arc<dyn GrantStrategy> = match &options.origin {
        Some(origin) => Arc::new(LoginHintGrant::new(endpoint.clone(), origin)),
        None => Arc::new(PasswordGrant::new(endpoint.clone())),
    };

    if options.token_exchange {
        Arc::new(TokenExchangeGrant::new(endpoint, base))
    } else {
        base
    }
}

/// Read the UAA URL from the Cloud Controller info endpoint
pub async fn discover_auth_url(http: &CfHttpClient, api_url: &str) -> CfResult<String> {
    let info_url = format!("{}/v2/info", api_url.trim_end_matches('/'));
    let info = http.get_anonymous(&info_url).await?;

    info.get("token_endpoint")
        .or_else(|| info.get("authorization_endpoint"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| CfError::Config(format!("{} does not advertise a token endpoint", info_url)))
}

/// Parse a list response envelope
pub fn parse_page(version: ApiVersion, response: Value) -> Page {
    let (total_pages, has_next) = match version {
        ApiVersion::V2 => (
            response.get("total_pages").and_then(|v| v.as_u64()),
            response.get("next_url").map(|v| !v.is_null()).unwrap_or(false),
        ),
        ApiVersion::V3 => {
            let pagination = response.get("pagination");
            (
                pagination
                    .and_then(|p| p.get("total_pages"))
                    .and_then(|v| v.as_u64()),
                pagination
                    .and_then(|p| p.get("next"))
                    .map(|v| !v.is_null())
                    .unwrap_or(false),
            )
        },
    };

    let resources = match response {
        Value::Object(mut map) => match map.remove("resources") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| RawRecord::from_value(version, item))
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Page {
        resources,
        total_pages: total_pages.and_then(|t| u32::try_from(t).ok()),
        has_next,
    }
}

#[async_trait]
impl ResourceProvider for CfClient {
    async fn list_page(&self, query: &ListQuery, page: u32) -> CfResult<Page> {
        let token = self.bearer().await?;
        let mut params = query.filters.clone();
        params.extend(self.page_params(query.version, page));

        let response = self.http.get(&self.url(&query.path), &token, &params).await?;
        Ok(parse_page(query.version, response))
    }

    async fn get(&self, version: ApiVersion, path: &str) -> CfResult<RawRecord> {
        let token = self.bearer().await?;
        let response = self.http.get(&self.url(path), &token, &[]).await?;
        Ok(RawRecord::from_value(version, response))
    }

    async fn create(&self, version: ApiVersion, path: &str, body: &Value) -> CfResult<RawRecord> {
        let token = self.bearer().await?;
        tracing::info!("Creating {}", path);
        let response = self.http.post(&self.url(path), &token, body).await?;
        Ok(RawRecord::from_value(version, response))
    }

    async fn update(&self, version: ApiVersion, path: &str, patch: &Value) -> CfResult<RawRecord> {
        let token = self.bearer().await?;
        tracing::info!("Updating {}", path);
        let response = match version {
            ApiVersion::V2 => self.http.put(&self.url(path), &token, patch).await?,
            ApiVersion::V3 => self.http.patch(&self.url(path), &token, patch).await?,
        };
        Ok(RawRecord::from_value(version, response))
    }

    async fn delete(&self, _version: ApiVersion, path: &str) -> CfResult<()> {
        let token = self.bearer().await?;
        tracing::info!("Deleting {}", path);
        // V3 answers 202 with a job link; acceptance is treated as completion.
        self.http.delete(&self.url(path), &token).await?;
        Ok(())
    }
}
