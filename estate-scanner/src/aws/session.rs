use crate::context::ScrapeContext;
use crate::error::{Result, ScanError};
use crate::spec::AwsSpec;
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything needed to talk to Cloud Control for one `aws` block.
#[derive(Debug, Clone)]
pub struct AwsSession {
    pub credentials: AwsCredentials,
    pub regions: Vec<String>,
    pub account_id: Option<String>,
    pub endpoint: Option<String>,
    pub skip_tls_verify: bool,
}

/// Resolve a block's session, falling back to the standard AWS environment
/// variables for anything the block leaves unset.
pub async fn resolve_session(ctx: &ScrapeContext, spec: &AwsSpec) -> Result<AwsSession> {
    resolve_session_with(ctx, spec, |name| std::env::var(name).ok()).await
}

pub async fn resolve_session_with<E>(
    ctx: &ScrapeContext,
    spec: &AwsSpec,
    env: E,
) -> Result<AwsSession>
where
    E: Fn(&str) -> Option<String> + Send + Sync,
{
    let mut account_id = spec.account_id.clone().filter(|a| !a.is_empty());

    let (access_key, secret_key, session_token, region) =
        if let Some(name) = spec.connection.as_deref().filter(|n| !n.is_empty()) {
            let connection = ctx
                .resolver()
                .hydrate_connection(name)
                .await
                .map_err(|e| ScanError::Connection(format!("could not hydrate connection: {}", e)))?
                .ok_or_else(|| ScanError::ConnectionNotFound(name.to_string()))?;
            if account_id.is_none() {
                account_id = connection.properties.get("account").cloned();
            }
            let region = connection.properties.get("region").cloned();
            (connection.username, connection.password, String::new(), region)
        } else {
            let resolver = ctx.resolver();
            let access_key = resolver
                .resolve_env(&spec.access_key)
                .await
                .map_err(|e| ScanError::Connection(format!("failed to get access key: {}", e)))?;
            let secret_key = resolver
                .resolve_env(&spec.secret_key)
                .await
                .map_err(|e| ScanError::Connection(format!("failed to get secret key: {}", e)))?;
            let session_token = resolver.resolve_env(&spec.session_token).await.map_err(|e| {
                ScanError::Connection(format!("failed to get session token: {}", e))
            })?;
            (access_key, secret_key, session_token, None)
        };

    let fallback = |current: String, var: &str| {
        if current.is_empty() {
            env(var).unwrap_or_default()
        } else {
            current
        }
    };
    let access_key = fallback(access_key, "AWS_ACCESS_KEY_ID");
    let secret_key = fallback(secret_key, "AWS_SECRET_ACCESS_KEY");
    let session_token = fallback(session_token, "AWS_SESSION_TOKEN");

    if access_key.is_empty() {
        return Err(ScanError::Connection(
            "failed to get credentials for aws: missing access key".to_string(),
        ));
    }
    if secret_key.is_empty() {
        return Err(ScanError::Connection(
            "failed to get credentials for aws: missing secret key".to_string(),
        ));
    }

    let regions = if !spec.region.is_empty() {
        spec.region.clone()
    } else {
        vec![
            region
                .or_else(|| env("AWS_REGION"))
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        ]
    };
    debug!(?regions, endpoint = ?spec.endpoint, "resolved aws session");

    Ok(AwsSession {
        credentials: AwsCredentials {
            access_key_id: access_key,
            secret_access_key: secret_key,
            session_token: Some(session_token).filter(|t| !t.is_empty()),
        },
        regions,
        account_id,
        endpoint: spec.endpoint.clone().filter(|e| !e.is_empty()),
        skip_tls_verify: spec.skip_tls_verify,
    })
}
