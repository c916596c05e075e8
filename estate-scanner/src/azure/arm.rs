// Azure Resource Manager REST paging

use super::{ArmCategory, ArmClientFactory, ArmScope, AzureCredentials};
use crate::error::{Result, ScanError};
use crate::http::{HttpOptions, build_client, read_body};
use crate::pager::Pager;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, trace};
use url::Url;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Login endpoint, tenant, client ID and scope.
type TokenKey = (String, String, String, String);

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ArmPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

/// Client-credentials token plus `nextLink` paging against ARM.
///
/// One HTTP client is shared by every category, and tokens are reused per
/// tenant and client until they near expiry. Clones share both.
#[derive(Debug, Clone, Default)]
pub struct ArmRestClient {
    options: HttpOptions,
    http: Arc<OnceCell<Client>>,
    tokens: Arc<Mutex<HashMap<TokenKey, CachedToken>>>,
}

impl ArmRestClient {
    pub fn new(options: HttpOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    async fn http(&self) -> Result<Client> {
        let client = self
            .http
            .get_or_try_init(|| async { build_client(&self.options) })
            .await?;
        Ok(client.clone())
    }

    async fn token(&self, http: &Client, creds: &AzureCredentials) -> Result<String> {
        let scope = format!("{}/.default", creds.management_endpoint.trim_end_matches('/'));
        let key = (
            creds.login_endpoint.clone(),
            creds.tenant_id.clone(),
            creds.client_id.clone(),
            scope.clone(),
        );
        // held across the request so concurrent categories share one fetch
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(&key).filter(|t| t.is_fresh()) {
            return Ok(cached.token.clone());
        }
        let fetched = self.request_token(http, creds, &scope).await?;
        let token = fetched.token.clone();
        tokens.insert(key, fetched);
        Ok(token)
    }

    async fn request_token(
        &self,
        http: &Client,
        creds: &AzureCredentials,
        scope: &str,
    ) -> Result<CachedToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            creds.login_endpoint.trim_end_matches('/'),
            creds.tenant_id
        );
        debug!(tenant = %creds.tenant_id, "requesting management token");
        let response = http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;
        // Token bodies are never traced.
        let body = read_body(response, false).await?;
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ScanError::ParseError(format!("token response: {}", e)))?;
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        })
    }
}

#[async_trait]
impl ArmClientFactory for ArmRestClient {
    async fn pager(
        &self,
        creds: &AzureCredentials,
        category: &ArmCategory,
        trace: bool,
    ) -> Result<Box<dyn Pager>> {
        let http = self.http().await?;
        let token = self.token(&http, creds).await?;
        let url = list_url(creds, category)?;
        Ok(Box::new(ArmPager {
            http,
            token,
            next: Some(url.to_string()),
            trace,
        }))
    }
}

/// First page URL for a category.
pub fn list_url(creds: &AzureCredentials, category: &ArmCategory) -> Result<Url> {
    let base = creds.management_endpoint.trim_end_matches('/');
    let raw = match category.scope {
        ArmScope::Subscription => format!(
            "{}/subscriptions/{}{}",
            base, creds.subscription_id, category.path
        ),
        ArmScope::Tenant => format!("{}{}", base, category.path),
    };
    let mut url = Url::parse(&raw).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("api-version", category.api_version);
        if let Some(filter) = category.filter {
            query.append_pair("$filter", filter);
        }
    }
    Ok(url)
}

pub struct ArmPager {
    http: Client,
    token: String,
    next: Option<String>,
    trace: bool,
}

#[async_trait]
impl Pager for ArmPager {
    fn has_more(&self) -> bool {
        self.next.is_some()
    }

    async fn next_page(&mut self) -> Result<Vec<Value>> {
        let Some(url) = self.next.take() else {
            return Ok(Vec::new());
        };
        if self.trace {
            trace!(%url, "GET");
        }
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let body = read_body(response, self.trace).await?;
        let page: ArmPage = serde_json::from_str(&body)
            .map_err(|e| ScanError::ParseError(format!("{}: {}", url, e)))?;
        self.next = page.next_link.filter(|link| !link.is_empty());
        Ok(page.value)
    }
}
