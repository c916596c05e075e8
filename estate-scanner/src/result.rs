use crate::error::{ErrorScope, ResultError, ScanError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource identity: its provider-native identifier plus its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub external_id: String,
    pub config_type: String,
}

impl ExternalId {
    pub fn new(external_id: impl Into<String>, config_type: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            config_type: config_type.into(),
        }
    }
}

/// A directed edge proposed during a single run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipResult {
    pub config: ExternalId,
    pub related: ExternalId,
    pub relationship: String,
}

/// A provider-side finding about an item, e.g. an advisor recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// The item the finding is about.
    pub target: ExternalId,
    pub analyzer: String,
    pub analysis_type: String,
    pub severity: String,
    pub source: String,
    pub summary: String,
    pub messages: Vec<String>,
    /// Native payload of the finding.
    pub analysis: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResult {
    pub id: String,
    pub name: String,
    pub config_class: String,
    pub config_type: String,
    pub config: Value,
    pub relationships: Vec<RelationshipResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    pub error: Option<ResultError>,
}

impl ConfigResult {
    pub fn new(
        id: String,
        name: String,
        config_class: &str,
        config_type: String,
        config: Value,
    ) -> Self {
        Self {
            id,
            name,
            config_class: config_class.to_string(),
            config_type,
            config,
            relationships: Vec::new(),
            analysis: None,
            error: None,
        }
    }

    pub fn with_error(error: impl Into<ResultError>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty()
        }
    }

    /// A result that carries a finding instead of an item. It has no ID of
    /// its own; `config_class` names the category that produced it.
    pub fn with_analysis(config_class: &str, analysis: AnalysisResult) -> Self {
        Self {
            config_class: config_class.to_string(),
            analysis: Some(analysis),
            ..Self::empty()
        }
    }

    fn empty() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            config_class: String::new(),
            config_type: String::new(),
            config: Value::Null,
            relationships: Vec::new(),
            analysis: None,
            error: None,
        }
    }

    pub fn external_id(&self) -> ExternalId {
        ExternalId::new(self.id.clone(), self.config_type.clone())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// A discovered item, as opposed to an error or a finding.
    pub fn is_item(&self) -> bool {
        self.error.is_none() && self.analysis.is_none() && !self.id.is_empty()
    }
}

/// Append-only collector for one provider block.
///
/// Category fetches build their own `Vec<ConfigResult>` and hand it over with
/// [`ScrapeResults::extend`] once the fetch has returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeResults {
    items: Vec<ConfigResult>,
}

impl ScrapeResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ConfigResult) {
        self.items.push(result);
    }

    pub fn extend(&mut self, slice: Vec<ConfigResult>) {
        self.items.extend(slice);
    }

    pub fn error(&mut self, err: ScanError) {
        self.items.push(ConfigResult::with_error(err));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigResult> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ConfigResult> {
        self.items.iter_mut()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ResultError> {
        self.items.iter().filter_map(|r| r.error.as_ref())
    }

    pub fn into_vec(self) -> Vec<ConfigResult> {
        self.items
    }
}

impl From<Vec<ConfigResult>> for ScrapeResults {
    fn from(items: Vec<ConfigResult>) -> Self {
        Self { items }
    }
}

impl IntoIterator for ScrapeResults {
    type Item = ConfigResult;
    type IntoIter = std::vec::IntoIter<ConfigResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Structural parent derivable from an item's path-like ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Containment {
    /// Path segment (compared case-insensitively) that introduces the parent name.
    pub marker: String,
    pub parent_type: String,
    /// Label prefix for containment edges, e.g. `Resourcegroup`.
    pub parent_kind: String,
}

/// How the items of one result set hang together: the account-level root node
/// every item belongs to and, optionally, an intermediate container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    pub type_prefix: String,
    pub root_id: String,
    pub root_type: String,
    /// Label prefix for ownership edges, e.g. `Subscription`.
    pub root_kind: String,
    pub containment: Option<Containment>,
}

/// Everything one provider block produced in a run.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub provider: &'static str,
    pub hierarchy: Option<Hierarchy>,
    pub results: ScrapeResults,
}

impl ResultSet {
    pub fn new(provider: &'static str, hierarchy: Option<Hierarchy>) -> Self {
        Self {
            provider,
            hierarchy,
            results: ScrapeResults::new(),
        }
    }

    /// A result set for a provider block that failed before any category ran.
    /// Every stored item under `type_prefix` is left unverified.
    pub fn failed(provider: &'static str, type_prefix: &str, err: ScanError) -> Self {
        let mut set = Self::new(provider, None);
        set.results.push(ConfigResult::with_error(
            ResultError::from(err).with_scope(ErrorScope::provider(type_prefix)),
        ));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn item(id: &str) -> ConfigResult {
        ConfigResult::new(
            id.to_string(),
            String::new(),
            "VirtualMachine",
            "Azure::Microsoft.Compute/virtualMachines".to_string(),
            json!({}),
        )
    }

    #[test]
    fn test_extend_keeps_category_order_and_duplicates() {
        let mut results = ScrapeResults::new();
        results.extend(vec![item("a"), item("b")]);
        results.error(ScanError::page_fetch("loadBalancers", "boom"));
        results.extend(vec![item("a")]);

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "", "a"]);
        assert_eq!(results.errors().count(), 1);
    }

    #[test]
    fn test_error_result_has_no_id() {
        let result = ConfigResult::with_error(ScanError::Cancelled {
            category: "subnets".to_string(),
        });
        assert!(result.is_error());
        assert!(result.id.is_empty());
        let err = result.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.category.as_deref(), Some("subnets"));
    }

    #[test]
    fn test_failed_set_carries_connection_error() {
        let set = ResultSet::failed(
            "azure",
            "Azure::",
            ScanError::ConnectionNotFound("prod".into()),
        );
        assert!(set.hierarchy.is_none());
        let errors: Vec<_> = set.results.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Connection);
        assert_eq!(errors[0].message, "connection prod not found");
        assert_eq!(errors[0].scope, Some(ErrorScope::provider("Azure::")));
    }

    #[test]
    fn test_analysis_result_is_not_an_item() {
        let result = ConfigResult::with_analysis(
            "Recommendation",
            AnalysisResult {
                target: ExternalId::new("vm-1", "Azure::Microsoft.Compute/virtualMachines"),
                analyzer: "Right-size underutilized virtual machines".into(),
                analysis_type: "cost".into(),
                severity: "high".into(),
                source: "Azure Advisor".into(),
                summary: "Right-size underutilized virtual machines".into(),
                messages: vec![],
                analysis: json!({}),
            },
        );
        assert!(!result.is_item());
        assert!(!result.is_error());
        assert!(item("a").is_item());
    }
}
