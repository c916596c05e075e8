// Azure Resource Manager scraper

pub mod arm;

use crate::context::ScrapeContext;
use crate::error::{ErrorScope, Result, ScanError};
use crate::pager::{Pager, fetch_category, str_field};
use crate::result::{AnalysisResult, ConfigResult, Containment, ExternalId, Hierarchy, ResultSet};
use crate::scraper::Scraper;
use crate::spec::{AzureSpec, ScrapeSpec, includes};
use arm::ArmRestClient;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_TYPE_PREFIX: &str = "Azure::";
pub const SUBSCRIPTION_TYPE: &str = "Azure::Subscription";
pub const RESOURCE_GROUP_TYPE: &str = "Azure::Microsoft.Resources/resourceGroups";

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Whether a category lists under a subscription or across the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmScope {
    Subscription,
    Tenant,
}

#[derive(Debug, Clone, Copy)]
pub struct ArmCategory {
    pub name: &'static str,
    pub config_class: &'static str,
    pub scope: ArmScope,
    /// List path relative to the scope, e.g. `/providers/Microsoft.Compute/virtualMachines`.
    pub path: &'static str,
    pub api_version: &'static str,
    pub filter: Option<&'static str>,
    /// Type to report instead of the item's own `type` field.
    pub fixed_type: Option<&'static str>,
    pub name_field: &'static str,
}

const fn category(
    name: &'static str,
    config_class: &'static str,
    path: &'static str,
    api_version: &'static str,
) -> ArmCategory {
    ArmCategory {
        name,
        config_class,
        scope: ArmScope::Subscription,
        path,
        api_version,
        filter: None,
        fixed_type: None,
        name_field: "name",
    }
}

/// Categories in fetch order.
pub const CATEGORIES: &[ArmCategory] = &[
    category("resourceGroups", "ResourceGroup", "/resourcegroups", "2021-04-01"),
    category(
        "virtualMachines",
        "VirtualMachine",
        "/providers/Microsoft.Compute/virtualMachines",
        "2023-03-01",
    ),
    category(
        "loadBalancers",
        "LoadBalancer",
        "/providers/Microsoft.Network/loadBalancers",
        "2023-04-01",
    ),
    category(
        "virtualNetworks",
        "VirtualNetwork",
        "/providers/Microsoft.Network/virtualNetworks",
        "2023-04-01",
    ),
    category(
        "containerRegistries",
        "ContainerRegistry",
        "/providers/Microsoft.ContainerRegistry/registries",
        "2023-07-01",
    ),
    category(
        "firewalls",
        "Firewall",
        "/providers/Microsoft.Network/azureFirewalls",
        "2023-04-01",
    ),
    ArmCategory {
        filter: Some(
            "resourceType eq 'Microsoft.DBforPostgreSQL/servers' or resourceType eq 'Microsoft.Sql/servers/databases'",
        ),
        ..category("databases", "RelationalDatabase", "/resources", "2021-04-01")
    },
    category(
        "managedClusters",
        "KubernetesCluster",
        "/providers/Microsoft.ContainerService/managedClusters",
        "2023-08-01",
    ),
    ArmCategory {
        scope: ArmScope::Tenant,
        fixed_type: Some("Subscription"),
        name_field: "displayName",
        ..category("subscriptions", "Subscription", "/subscriptions", "2020-01-01")
    },
    category(
        "storageAccounts",
        "StorageAccount",
        "/providers/Microsoft.Storage/storageAccounts",
        "2023-01-01",
    ),
    category(
        "appServices",
        "AppService",
        "/providers/Microsoft.Web/sites",
        "2022-09-01",
    ),
    category(
        "dnsZones",
        "DNSZone",
        "/providers/Microsoft.Network/dnszones",
        "2018-05-01",
    ),
    category(
        "privateDnsZones",
        "PrivateDNSZone",
        "/providers/Microsoft.Network/privateDnsZones",
        "2020-06-01",
    ),
    category(
        "trafficManagerProfiles",
        "TrafficManagerProfile",
        "/providers/Microsoft.Network/trafficmanagerprofiles",
        "2022-04-01",
    ),
    category(
        "networkSecurityGroups",
        "SecurityGroup",
        "/providers/Microsoft.Network/networkSecurityGroups",
        "2023-04-01",
    ),
    category(
        "publicIPAddresses",
        "PublicIPAddress",
        "/providers/Microsoft.Network/publicIPAddresses",
        "2023-04-01",
    ),
];

/// Advisor recommendations, fetched after the resource categories. Each one
/// becomes an analysis of the resource it names rather than an item.
pub const ADVISOR: ArmCategory = category(
    "advisor",
    "Recommendation",
    "/providers/Microsoft.Advisor/recommendations",
    "2020-01-01",
);

pub const ADVISOR_SOURCE: &str = "Azure Advisor";

/// Service principal credentials for one subscription block.
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub management_endpoint: String,
    pub login_endpoint: String,
}

/// Builds a pager for one category from resolved credentials.
#[async_trait]
pub trait ArmClientFactory: Send + Sync {
    async fn pager(
        &self,
        creds: &AzureCredentials,
        category: &ArmCategory,
        trace: bool,
    ) -> Result<Box<dyn Pager>>;
}

pub struct AzureScraper {
    clients: Arc<dyn ArmClientFactory>,
}

impl Default for AzureScraper {
    fn default() -> Self {
        Self::with_clients(Arc::new(ArmRestClient::default()))
    }
}

impl AzureScraper {
    pub fn with_clients(clients: Arc<dyn ArmClientFactory>) -> Self {
        Self { clients }
    }

    /// Fill in credentials from the named connection, or from the inline
    /// placeholders when no connection is named.
    async fn hydrate_connection(
        &self,
        ctx: &ScrapeContext,
        spec: &AzureSpec,
    ) -> Result<AzureCredentials> {
        let mut creds = AzureCredentials {
            subscription_id: spec.subscription_id.clone(),
            tenant_id: spec.tenant_id.clone().unwrap_or_default(),
            client_id: String::new(),
            client_secret: String::new(),
            management_endpoint: spec
                .management_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_MANAGEMENT_ENDPOINT.to_string()),
            login_endpoint: spec
                .login_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_LOGIN_ENDPOINT.to_string()),
        };

        if let Some(name) = spec.connection.as_deref().filter(|n| !n.is_empty()) {
            let connection = ctx
                .resolver()
                .hydrate_connection(name)
                .await
                .map_err(|e| ScanError::Connection(format!("could not hydrate connection: {}", e)))?
                .ok_or_else(|| ScanError::ConnectionNotFound(name.to_string()))?;
            creds.client_id = connection.username;
            creds.client_secret = connection.password;
            if let Some(tenant) = connection.properties.get("tenant") {
                creds.tenant_id = tenant.clone();
            }
        } else {
            creds.client_id = ctx
                .resolver()
                .resolve_env(&spec.client_id)
                .await
                .map_err(|e| ScanError::Connection(format!("failed to get client id: {}", e)))?;
            creds.client_secret = ctx
                .resolver()
                .resolve_env(&spec.client_secret)
                .await
                .map_err(|e| {
                    ScanError::Connection(format!("failed to get client secret: {}", e))
                })?;
        }

        for (field, value) in [
            ("subscription id", &creds.subscription_id),
            ("tenant id", &creds.tenant_id),
            ("client id", &creds.client_id),
            ("client secret", &creds.client_secret),
        ] {
            if value.is_empty() {
                return Err(ScanError::Connection(format!(
                    "failed to get credentials for azure: missing {}",
                    field
                )));
            }
        }
        Ok(creds)
    }

    async fn scrape_subscription(&self, ctx: &ScrapeContext, spec: &AzureSpec) -> ResultSet {
        let creds = match self.hydrate_connection(ctx, spec).await {
            Ok(creds) => creds,
            Err(e) => return ResultSet::failed("azure", CONFIG_TYPE_PREFIX, e),
        };

        info!(subscription = %creds.subscription_id, "scraping azure subscription");
        let mut set = ResultSet::new("azure", Some(hierarchy(&creds.subscription_id)));
        for category in CATEGORIES.iter().filter(|c| includes(&spec.include, c.name)) {
            let slice = self
                .fetch(ctx, &creds, category, |item| to_config_result(category, item))
                .await;
            set.results.extend(slice);
        }
        if includes(&spec.include, ADVISOR.name) {
            let slice = self
                .fetch(ctx, &creds, &ADVISOR, |item| {
                    ConfigResult::with_analysis(ADVISOR.config_class, to_analysis_result(item))
                })
                .await;
            set.results.extend(slice);
        }
        set
    }

    async fn fetch<F>(
        &self,
        ctx: &ScrapeContext,
        creds: &AzureCredentials,
        category: &ArmCategory,
        map: F,
    ) -> Vec<ConfigResult>
    where
        F: FnMut(Value) -> ConfigResult,
    {
        debug!(
            "fetching {} for subscription {}",
            category.name, creds.subscription_id
        );
        let scope = ErrorScope::category(CONFIG_TYPE_PREFIX, category.config_class);
        let client = self.clients.pager(creds, category, ctx.is_trace());
        fetch_category(ctx, category.name, &scope, client, map).await
    }
}

#[async_trait]
impl Scraper for AzureScraper {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn can_scrape(&self, spec: &ScrapeSpec) -> bool {
        !spec.azure.is_empty()
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Vec<ResultSet> {
        let mut sets = Vec::with_capacity(ctx.spec().azure.len());
        for spec in &ctx.spec().azure {
            sets.push(self.scrape_subscription(ctx, spec).await);
        }
        sets
    }
}

/// Subscription root with resource groups as containers.
pub fn hierarchy(subscription_id: &str) -> Hierarchy {
    Hierarchy {
        type_prefix: CONFIG_TYPE_PREFIX.to_string(),
        root_id: format!("/subscriptions/{}", subscription_id),
        root_type: SUBSCRIPTION_TYPE.to_string(),
        root_kind: "Subscription".to_string(),
        containment: Some(Containment {
            marker: "resourcegroups".to_string(),
            parent_type: RESOURCE_GROUP_TYPE.to_string(),
            parent_kind: "Resourcegroup".to_string(),
        }),
    }
}

fn to_config_result(category: &ArmCategory, item: Value) -> ConfigResult {
    let native_type = match category.fixed_type {
        Some(fixed) => fixed.to_string(),
        None => str_field(&item, "type"),
    };
    ConfigResult::new(
        arm_id(&str_field(&item, "id")),
        str_field(&item, category.name_field),
        category.config_class,
        arm_type(&native_type),
        item,
    )
}

/// Map an advisor recommendation onto the resource it is about.
fn to_analysis_result(item: Value) -> AnalysisResult {
    let properties = item.get("properties").cloned().unwrap_or(Value::Null);
    let target_id = properties
        .pointer("/resourceMetadata/resourceId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let problem = properties
        .pointer("/shortDescription/problem")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let type_id = str_field(&properties, "recommendationTypeId");
            if type_id.is_empty() {
                str_field(&item, "name")
            } else {
                type_id
            }
        });
    let messages = properties
        .pointer("/shortDescription/solution")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();

    AnalysisResult {
        target: ExternalId::new(
            arm_id(target_id),
            arm_type(&str_field(&properties, "impactedField")),
        ),
        analyzer: problem.clone(),
        analysis_type: analysis_type(&str_field(&properties, "category")).to_string(),
        severity: str_field(&properties, "impact").to_lowercase(),
        source: ADVISOR_SOURCE.to_string(),
        summary: problem,
        messages,
        analysis: properties,
    }
}

fn analysis_type(advisor_category: &str) -> &'static str {
    match advisor_category {
        "Cost" => "cost",
        "Security" => "security",
        "HighAvailability" => "availability",
        "Performance" => "performance",
        "OperationalExcellence" => "recommendation",
        _ => "other",
    }
}

/// ARM IDs are compared case-insensitively by Azure tooling (advisor
/// recommendations reference them in lower case), so store them lower-cased.
pub fn arm_id(id: &str) -> String {
    id.to_lowercase()
}

pub fn arm_type(native_type: &str) -> String {
    format!("{}{}", CONFIG_TYPE_PREFIX, native_type)
}
