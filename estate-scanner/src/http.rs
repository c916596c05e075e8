use crate::error::{Result, ScanError};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::trace;

pub const USER_AGENT: &str = "Estate/0.1 (https://github.com/trapdoorsec/estate)";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Shared client settings for the provider REST clients.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout_secs: u64,
    pub skip_tls_verify: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            skip_tls_verify: false,
        }
    }
}

pub fn build_client(options: &HttpOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(options.timeout_secs))
        .connect_timeout(Duration::from_secs(options.timeout_secs.div_ceil(2)))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .danger_accept_invalid_certs(options.skip_tls_verify)
        .build()
        .map_err(ScanError::from)
}

/// Read a response body, turning non-2xx statuses into errors that carry the
/// body text. Bodies are logged when `trace` is set.
pub async fn read_body(response: Response, trace: bool) -> Result<String> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.text().await?;
    if trace {
        trace!(%url, %status, body = %body, "response");
    }
    if !status.is_success() {
        return Err(ScanError::Other(format!(
            "{} returned {}: {}",
            url,
            status,
            truncate(&body, 512)
        )));
    }
    Ok(body)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
