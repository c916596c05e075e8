// AWS scraper over the Cloud Control API

pub mod cloudcontrol;
pub mod session;
pub mod sigv4;

use crate::context::ScrapeContext;
use crate::error::{ErrorScope, Result};
use crate::pager::{Pager, fetch_category, str_field};
use crate::result::{ConfigResult, Hierarchy, ResultSet};
use crate::scraper::Scraper;
use crate::spec::{AwsSpec, ScrapeSpec, includes};
use async_trait::async_trait;
use cloudcontrol::CloudControlClient;
use serde_json::{Value, json};
use session::{AwsSession, resolve_session};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_TYPE_PREFIX: &str = "AWS::";
pub const ACCOUNT_TYPE: &str = "AWS::::Account";

#[derive(Debug, Clone, Copy)]
pub struct AwsCategory {
    pub name: &'static str,
    pub config_class: &'static str,
    /// Cloud Control type name, already carrying the `AWS::` prefix.
    pub type_name: &'static str,
    /// Property holding the display name; `None` reads the `Name` tag.
    pub name_field: Option<&'static str>,
}

/// Categories in fetch order, repeated for every region.
pub const CATEGORIES: &[AwsCategory] = &[
    AwsCategory {
        name: "instances",
        config_class: "VirtualMachine",
        type_name: "AWS::EC2::Instance",
        name_field: None,
    },
    AwsCategory {
        name: "vpcs",
        config_class: "VirtualNetwork",
        type_name: "AWS::EC2::VPC",
        name_field: None,
    },
    AwsCategory {
        name: "subnets",
        config_class: "Subnet",
        type_name: "AWS::EC2::Subnet",
        name_field: None,
    },
    AwsCategory {
        name: "securityGroups",
        config_class: "SecurityGroup",
        type_name: "AWS::EC2::SecurityGroup",
        name_field: Some("GroupName"),
    },
    AwsCategory {
        name: "loadBalancers",
        config_class: "LoadBalancer",
        type_name: "AWS::ElasticLoadBalancingV2::LoadBalancer",
        name_field: Some("LoadBalancerName"),
    },
    AwsCategory {
        name: "eksClusters",
        config_class: "KubernetesCluster",
        type_name: "AWS::EKS::Cluster",
        name_field: Some("Name"),
    },
    AwsCategory {
        name: "rdsInstances",
        config_class: "RelationalDatabase",
        type_name: "AWS::RDS::DBInstance",
        name_field: Some("DBInstanceIdentifier"),
    },
    AwsCategory {
        name: "buckets",
        config_class: "ObjectStorage",
        type_name: "AWS::S3::Bucket",
        name_field: Some("BucketName"),
    },
    AwsCategory {
        name: "lambdaFunctions",
        config_class: "Function",
        type_name: "AWS::Lambda::Function",
        name_field: Some("FunctionName"),
    },
];

/// Builds a Cloud Control pager for one region and category.
#[async_trait]
pub trait CloudControlFactory: Send + Sync {
    async fn pager(
        &self,
        session: &AwsSession,
        region: &str,
        category: &AwsCategory,
        trace: bool,
    ) -> Result<Box<dyn Pager>>;
}

pub struct AwsScraper {
    clients: Arc<dyn CloudControlFactory>,
}

impl Default for AwsScraper {
    fn default() -> Self {
        Self::with_clients(Arc::new(CloudControlClient::default()))
    }
}

impl AwsScraper {
    pub fn with_clients(clients: Arc<dyn CloudControlFactory>) -> Self {
        Self { clients }
    }

    async fn scrape_account(&self, ctx: &ScrapeContext, spec: &AwsSpec) -> ResultSet {
        let session = match resolve_session(ctx, spec).await {
            Ok(session) => session,
            Err(e) => return ResultSet::failed("aws", CONFIG_TYPE_PREFIX, e),
        };

        info!(account = ?session.account_id, regions = ?session.regions, "scraping aws account");
        let mut set = ResultSet::new("aws", session.account_id.as_deref().map(hierarchy));
        if let Some(account_id) = session.account_id.as_deref() {
            set.results.push(account_result(account_id, &session.regions));
        }
        for region in &session.regions {
            for category in CATEGORIES.iter().filter(|c| includes(&spec.include, c.name)) {
                let label = format!("{}/{}", region, category.name);
                debug!("fetching {}", label);
                let scope = ErrorScope::category(CONFIG_TYPE_PREFIX, category.config_class);
                let client = self.clients.pager(&session, region, category, ctx.is_trace());
                let slice = fetch_category(ctx, &label, &scope, client, |item| {
                    to_config_result(category, item)
                })
                .await;
                set.results.extend(slice);
            }
        }
        set
    }
}

#[async_trait]
impl Scraper for AwsScraper {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn can_scrape(&self, spec: &ScrapeSpec) -> bool {
        !spec.aws.is_empty()
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Vec<ResultSet> {
        let mut sets = Vec::with_capacity(ctx.spec().aws.len());
        for spec in &ctx.spec().aws {
            sets.push(self.scrape_account(ctx, spec).await);
        }
        sets
    }
}

/// Account root; AWS identifiers carry no containment path.
pub fn hierarchy(account_id: &str) -> Hierarchy {
    Hierarchy {
        type_prefix: CONFIG_TYPE_PREFIX.to_string(),
        root_id: account_id.to_string(),
        root_type: ACCOUNT_TYPE.to_string(),
        root_kind: "Account".to_string(),
        containment: None,
    }
}

/// The account itself, so that ownership edges have a stored root to land on.
fn account_result(account_id: &str, regions: &[String]) -> ConfigResult {
    ConfigResult::new(
        account_id.to_string(),
        account_id.to_string(),
        "Account",
        ACCOUNT_TYPE.to_string(),
        json!({"AccountId": account_id, "Regions": regions}),
    )
}

fn to_config_result(category: &AwsCategory, item: Value) -> ConfigResult {
    let config = match item.get("Properties") {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };
    let name = match category.name_field {
        Some(field) => str_field(&config, field),
        None => name_tag(&config),
    };
    ConfigResult::new(
        str_field(&item, "Identifier"),
        name,
        category.config_class,
        category.type_name.to_string(),
        config,
    )
}

fn name_tag(config: &Value) -> String {
    config
        .get("Tags")
        .and_then(Value::as_array)
        .and_then(|tags| {
            tags.iter()
                .find(|t| t.get("Key").and_then(Value::as_str) == Some("Name"))
        })
        .map(|t| str_field(t, "Value"))
        .unwrap_or_default()
}
