// Scrape specs: the provider blocks a scrape config asks for

use serde::{Deserialize, Serialize};

/// A credential field given either inline or by environment variable name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_env: Option<String>,
}

impl EnvVar {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            from_env: None,
        }
    }

    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            value: None,
            from_env: Some(name.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.as_deref().is_none_or(str::is_empty)
            && self.from_env.as_deref().is_none_or(str::is_empty)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    #[serde(rename = "tenantID", default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(rename = "clientID", default, skip_serializing_if = "EnvVar::is_empty")]
    pub client_id: EnvVar,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub client_secret: EnvVar,
    /// Category names to fetch; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(rename = "accountID", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub region: Vec<String>,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub access_key: EnvVar,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub secret_key: EnvVar,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub session_token: EnvVar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(rename = "skipTLSVerify", default, skip_serializing_if = "is_false")]
    pub skip_tls_verify: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

/// Provider blocks of a scrape config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azure: Vec<AzureSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aws: Vec<AwsSpec>,
}

impl ScrapeSpec {
    /// Canonical serialized form; equal specs produce byte-identical strings.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn is_empty(&self) -> bool {
        self.azure.is_empty() && self.aws.is_empty()
    }

    /// Names of the providers this spec configures, in declaration order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if !self.azure.is_empty() {
            names.push("azure");
        }
        if !self.aws.is_empty() {
            names.push("aws");
        }
        names
    }
}

/// Whether a category passes a block's `include` filter.
pub fn includes(include: &[String], category: &str) -> bool {
    include.is_empty() || include.iter().any(|c| c.eq_ignore_ascii_case(category))
}
