// Persisted records

use estate_scanner::spec::ScrapeSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Where a scrape config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Managed by an external declarative resource; mutable in place.
    DeclarativeResource,
    File,
    Ui,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::DeclarativeResource => "declarative_resource",
            ConfigSource::File => "file",
            ConfigSource::Ui => "ui",
        }
    }
}

impl FromStr for ConfigSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declarative_resource" => Ok(ConfigSource::DeclarativeResource),
            "file" => Ok(ConfigSource::File),
            "ui" => Ok(ConfigSource::Ui),
            other => Err(format!("unknown config source {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub id: Uuid,
    pub name: String,
    pub source: ConfigSource,
    /// Canonical JSON of the scrape spec.
    pub spec: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl ScrapeConfig {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn parse_spec(&self) -> serde_json::Result<ScrapeSpec> {
        ScrapeSpec::from_json(&self.spec)
    }
}

/// A scrape config about to be persisted.
#[derive(Debug, Clone)]
pub struct ScrapeConfigDraft {
    pub source: ConfigSource,
    pub spec: ScrapeSpec,
    /// External identity of a declarative resource.
    pub uid: Option<Uuid>,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl ScrapeConfigDraft {
    pub fn file(spec: ScrapeSpec) -> Self {
        Self {
            source: ConfigSource::File,
            spec,
            uid: None,
            namespace: None,
            name: None,
        }
    }

    pub fn ui(spec: ScrapeSpec) -> Self {
        Self {
            source: ConfigSource::Ui,
            ..Self::file(spec)
        }
    }

    pub fn declarative(uid: Uuid, namespace: &str, name: &str, spec: ScrapeSpec) -> Self {
        Self {
            source: ConfigSource::DeclarativeResource,
            spec,
            uid: Some(uid),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
        }
    }

    /// `namespace/name` for declarative resources.
    pub fn qualified_name(&self) -> Option<String> {
        match (&self.namespace, &self.name) {
            (Some(ns), Some(name)) if !ns.is_empty() => Some(format!("{}/{}", ns, name)),
            (_, Some(name)) => Some(name.clone()),
            _ => None,
        }
    }
}

/// Result of persisting a draft.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub config: ScrapeConfig,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub id: Uuid,
    pub scraper_id: Option<Uuid>,
    pub external_id: String,
    pub config_type: String,
    pub config_class: String,
    pub name: String,
    pub config: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl ConfigItem {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Open,
    Resolved,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Open => "open",
            AnalysisStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AnalysisStatus::Open),
            "resolved" => Ok(AnalysisStatus::Resolved),
            other => Err(format!("unknown analysis status {}", other)),
        }
    }
}

/// A stored finding about one item. Findings that stop being reported are
/// resolved rather than deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAnalysis {
    pub id: Uuid,
    pub config_id: Uuid,
    pub scraper_id: Option<Uuid>,
    pub config_class: String,
    pub analyzer: String,
    pub analysis_type: String,
    pub severity: String,
    pub source: String,
    pub summary: String,
    pub messages: Vec<String>,
    pub analysis: Value,
    pub status: AnalysisStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub config_id: Uuid,
    pub related_id: Uuid,
    pub relation: String,
    pub scraper_id: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}
