// Cloud Control ListResources paging

use super::session::{AwsCredentials, AwsSession};
use super::sigv4::{SigningParams, sign};
use super::{AwsCategory, CloudControlFactory};
use crate::error::{Result, ScanError};
use crate::http::{HttpOptions, build_client, read_body};
use crate::pager::Pager;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use url::Url;

pub const SERVICE: &str = "cloudcontrolapi";
const TARGET: &str = "CloudApiService.ListResources";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const MAX_RESULTS: u32 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListResourcesRequest<'a> {
    type_name: &'a str,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListResourcesResponse {
    #[serde(default)]
    resource_descriptions: Vec<Value>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CloudControlClient {
    options: HttpOptions,
}

impl CloudControlClient {
    pub fn new(options: HttpOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl CloudControlFactory for CloudControlClient {
    async fn pager(
        &self,
        session: &AwsSession,
        region: &str,
        category: &AwsCategory,
        trace: bool,
    ) -> Result<Box<dyn Pager>> {
        let options = HttpOptions {
            skip_tls_verify: session.skip_tls_verify || self.options.skip_tls_verify,
            ..self.options.clone()
        };
        Ok(Box::new(ListResourcesPager {
            http: build_client(&options)?,
            url: endpoint(session, region)?,
            credentials: session.credentials.clone(),
            region: region.to_string(),
            type_name: category.type_name,
            next_token: None,
            started: false,
            trace,
        }))
    }
}

/// Regional Cloud Control endpoint unless the session overrides it.
pub fn endpoint(session: &AwsSession, region: &str) -> Result<Url> {
    let raw = match &session.endpoint {
        Some(endpoint) => endpoint.clone(),
        None => format!("https://{}.{}.amazonaws.com/", SERVICE, region),
    };
    Url::parse(&raw).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))
}

pub struct ListResourcesPager {
    http: Client,
    url: Url,
    credentials: AwsCredentials,
    region: String,
    type_name: &'static str,
    next_token: Option<String>,
    started: bool,
    trace: bool,
}

#[async_trait]
impl Pager for ListResourcesPager {
    fn has_more(&self) -> bool {
        !self.started || self.next_token.is_some()
    }

    async fn next_page(&mut self) -> Result<Vec<Value>> {
        self.started = true;
        let body = serde_json::to_vec(&ListResourcesRequest {
            type_name: self.type_name,
            max_results: MAX_RESULTS,
            next_token: self.next_token.as_deref(),
        })
        .map_err(|e| ScanError::ParseError(e.to_string()))?;

        let signature = sign(
            &SigningParams {
                credentials: &self.credentials,
                region: &self.region,
                service: SERVICE,
                time: Utc::now(),
            },
            "POST",
            &self.url,
            &[("content-type", CONTENT_TYPE), ("x-amz-target", TARGET)],
            &body,
        );
        if self.trace {
            trace!(url = %self.url, type_name = self.type_name, next_token = ?self.next_token, "ListResources");
        }

        let mut request = self
            .http
            .post(self.url.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", TARGET);
        for (name, value) in signature.headers() {
            request = request.header(name, value);
        }
        let response = request.body(body).send().await?;
        let text = read_body(response, self.trace).await?;
        let page: ListResourcesResponse = serde_json::from_str(&text)
            .map_err(|e| ScanError::ParseError(format!("ListResources {}: {}", self.type_name, e)))?;

        self.next_token = page.next_token.filter(|t| !t.is_empty());
        Ok(page.resource_descriptions)
    }
}
