// Tests for the reconciliation store

use estate_core::error::StoreError;
use estate_core::model::{AnalysisStatus, ConfigSource, ScrapeConfigDraft};
use estate_core::normalize::PayloadNormalizer;
use estate_core::relate::resolve_relationships;
use estate_core::store::{ReferenceTable, Store, StoreOptions};
use estate_scanner::azure::{self, arm_id};
use estate_scanner::error::{ErrorScope, ResultError};
use estate_scanner::result::{
    AnalysisResult, ConfigResult, ExternalId, RelationshipResult, ResultSet,
};
use estate_scanner::spec::{AwsSpec, AzureSpec, ScrapeSpec};
use estate_scanner::{ScanError, aws};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

fn create_test_store() -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(&temp_dir.path().join("test.db")).unwrap();
    (temp_dir, store)
}

fn azure_spec(subscription: &str) -> ScrapeSpec {
    ScrapeSpec {
        azure: vec![AzureSpec {
            connection: Some("prod".into()),
            subscription_id: subscription.into(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn register(store: &Store) -> Uuid {
    store
        .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec("sub-1")))
        .unwrap()
        .config
        .id
}

fn vm(id: &str) -> ConfigResult {
    ConfigResult::new(
        id.to_string(),
        id.rsplit('/').next().unwrap_or_default().to_string(),
        "VirtualMachine",
        "Azure::Microsoft.Compute/virtualMachines".to_string(),
        json!({"id": id}),
    )
}

fn item_id(store: &Store, external_id: &str) -> Uuid {
    store
        .get_config_item(external_id, "Azure::Microsoft.Compute/virtualMachines")
        .unwrap()
        .unwrap()
        .id
}

// ============================================================================
// Store Creation Tests
// ============================================================================

#[test]
fn test_store_creation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    assert!(Store::open(&path).is_ok());
    assert!(path.exists());
    // reopening an existing database keeps the schema
    assert!(Store::open(&path).is_ok());
}

#[test]
fn test_invalid_reference_table_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let result = Store::open_with(
        &temp_dir.path().join("test.db"),
        StoreOptions {
            reference_tables: vec![ReferenceTable::new("evidences", "config_id); --")],
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(StoreError::InvalidReference(_))));
}

// ============================================================================
// Scraper Config Tests
// ============================================================================

#[test]
fn test_identical_spec_registers_once() {
    let (_temp_dir, store) = create_test_store();

    let first = store
        .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec("sub-1")))
        .unwrap();
    let second = store
        .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec("sub-1")))
        .unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(first.config.id, second.config.id);
    assert_eq!(store.list_scrapers().unwrap().len(), 1);
    assert!(first.config.name.starts_with("azure-"));
    assert_eq!(first.config.source, ConfigSource::File);
}

#[test]
fn test_distinct_specs_get_distinct_names() {
    let (_temp_dir, store) = create_test_store();

    let a = store
        .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec("sub-1")))
        .unwrap();
    let b = store
        .upsert_scraper_config(&ScrapeConfigDraft::ui(azure_spec("sub-2")))
        .unwrap();
    let both = ScrapeSpec {
        aws: vec![AwsSpec::default()],
        ..azure_spec("sub-3")
    };
    let c = store
        .upsert_scraper_config(&ScrapeConfigDraft::file(both))
        .unwrap();

    assert_ne!(a.config.name, b.config.name);
    assert!(c.config.name.starts_with("azure-aws-"));
    assert_eq!(store.list_scrapers().unwrap().len(), 3);
}

#[test]
fn test_deleted_spec_can_be_registered_again() {
    let (_temp_dir, store) = create_test_store();
    let id = register(&store);
    store.delete_scraper_config(id).unwrap();

    let again = store
        .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec("sub-1")))
        .unwrap();
    assert!(again.changed);
    assert_ne!(again.config.id, id);
}

#[test]
fn test_declarative_resource_updates_in_place() {
    let (_temp_dir, store) = create_test_store();
    let uid = Uuid::new_v4();

    let created = store
        .upsert_scraper_config(&ScrapeConfigDraft::declarative(
            uid,
            "infra",
            "azure-prod",
            azure_spec("sub-1"),
        ))
        .unwrap();
    let unchanged = store
        .upsert_scraper_config(&ScrapeConfigDraft::declarative(
            uid,
            "infra",
            "azure-prod",
            azure_spec("sub-1"),
        ))
        .unwrap();
    let updated = store
        .upsert_scraper_config(&ScrapeConfigDraft::declarative(
            uid,
            "infra",
            "azure-prod",
            azure_spec("sub-2"),
        ))
        .unwrap();

    assert!(created.changed);
    assert_eq!(created.config.id, uid);
    assert_eq!(created.config.name, "infra/azure-prod");
    assert!(!unchanged.changed);
    assert!(updated.changed);

    let stored = store.find_scraper(uid).unwrap().unwrap();
    assert!(stored.spec.contains("sub-2"));
    assert_eq!(stored.source, ConfigSource::DeclarativeResource);
    assert_eq!(store.list_scrapers().unwrap().len(), 1);
}

#[test]
fn test_deleted_declarative_resource_is_not_revived() {
    let (_temp_dir, store) = create_test_store();
    let uid = Uuid::new_v4();
    let draft = ScrapeConfigDraft::declarative(uid, "infra", "azure-prod", azure_spec("sub-1"));
    store.upsert_scraper_config(&draft).unwrap();
    store.delete_scraper_config(uid).unwrap();

    let err = store.upsert_scraper_config(&draft).unwrap_err();
    assert!(matches!(err, StoreError::ScraperDeleted(id) if id == uid));
    assert!(store.find_scraper(uid).unwrap().unwrap().is_deleted());
}

// ============================================================================
// Cascade Delete Tests
// ============================================================================

#[test]
fn test_delete_detaches_referenced_and_deletes_the_rest() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2"), vm("/x/vm3")])
        .unwrap();
    store
        .insert_evidence(item_id(&store, "/x/vm2"), "port 22 open")
        .unwrap();

    let summary = store.delete_scraper_config(scraper).unwrap();
    assert_eq!(summary.detached, 1);
    assert_eq!(summary.deleted, 2);

    let vm2 = store
        .get_config_item("/x/vm2", "Azure::Microsoft.Compute/virtualMachines")
        .unwrap()
        .unwrap();
    assert_eq!(vm2.scraper_id, None);
    assert!(!vm2.is_deleted());

    for external_id in ["/x/vm1", "/x/vm3"] {
        let item = store
            .get_config_item(external_id, "Azure::Microsoft.Compute/virtualMachines")
            .unwrap()
            .unwrap();
        assert!(item.is_deleted());
        assert_eq!(item.scraper_id, Some(scraper));
    }
    assert!(store.find_scraper(scraper).unwrap().unwrap().is_deleted());
    assert!(store.list_scrapers().unwrap().is_empty());
}

#[test]
fn test_delete_with_null_references_still_deletes() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store.merge_run_results(scraper, &[vm("/x/vm1")]).unwrap();
    // evidence pinned to nothing must not turn NOT IN into unknown
    let conn = rusqlite::Connection::open(store.path()).unwrap();
    conn.execute(
        "INSERT INTO evidences (config_id, description, created_at) VALUES (NULL, 'orphan', 0)",
        [],
    )
    .unwrap();

    let summary = store.delete_scraper_config(scraper).unwrap();
    assert_eq!(summary.detached, 0);
    assert_eq!(summary.deleted, 1);
}

#[test]
fn test_delete_without_reference_tables_deletes_everything() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open_with(
        &temp_dir.path().join("test.db"),
        StoreOptions {
            reference_tables: Vec::new(),
            ..Default::default()
        },
    )
    .unwrap();
    let scraper = register(&store);
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2")])
        .unwrap();
    store
        .insert_evidence(item_id(&store, "/x/vm1"), "ignored")
        .unwrap();

    let summary = store.delete_scraper_config(scraper).unwrap();
    assert_eq!(summary.detached, 0);
    assert_eq!(summary.deleted, 2);
}

#[test]
fn test_delete_unknown_scraper() {
    let (_temp_dir, store) = create_test_store();
    let id = Uuid::new_v4();
    assert!(matches!(
        store.delete_scraper_config(id),
        Err(StoreError::NotFound(found)) if found == id
    ));
}

// ============================================================================
// Merge Tests
// ============================================================================

#[test]
fn test_merge_creates_then_updates() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let first = store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2")])
        .unwrap();
    assert_eq!((first.created, first.updated), (2, 0));

    let mut changed = vm("/x/vm1");
    changed.config = json!({"id": "/x/vm1", "size": "large"});
    let second = store
        .merge_run_results(scraper, &[changed, vm("/x/vm2")])
        .unwrap();
    assert_eq!((second.created, second.updated), (0, 2));

    let vm1 = store
        .get_config_item("/x/vm1", "Azure::Microsoft.Compute/virtualMachines")
        .unwrap()
        .unwrap();
    assert_eq!(vm1.config["size"], "large");
    assert_eq!(store.config_items_by_scraper(scraper).unwrap().len(), 2);
}

#[test]
fn test_duplicate_results_collapse_to_one_item() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let summary = store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm1")])
        .unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(store.config_items_by_scraper(scraper).unwrap().len(), 1);
}

#[test]
fn test_type_lookup_ignores_case() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store.merge_run_results(scraper, &[vm("/x/vm1")]).unwrap();

    let mut lower = vm("/x/vm1");
    lower.config_type = "azure::microsoft.compute/virtualmachines".to_string();
    let summary = store.merge_run_results(scraper, &[lower]).unwrap();
    assert_eq!((summary.created, summary.updated), (0, 1));
}

#[test]
fn test_unobserved_items_are_pruned() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2"), vm("/x/vm3")])
        .unwrap();
    store
        .insert_evidence(item_id(&store, "/x/vm3"), "keep me")
        .unwrap();

    let summary = store.merge_run_results(scraper, &[vm("/x/vm1")]).unwrap();
    assert!(summary.pruned);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.detached, 1);

    let items = store.config_items_by_scraper(scraper).unwrap();
    let active: Vec<_> = items.iter().filter(|i| !i.is_deleted()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].external_id, "/x/vm1");
}

#[test]
fn test_unscoped_errors_suspend_pruning() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2")])
        .unwrap();

    let partial = vec![
        vm("/x/vm1"),
        ConfigResult::with_error(ScanError::page_fetch("virtualMachines", "throttled")),
    ];
    let summary = store.merge_run_results(scraper, &partial).unwrap();
    assert!(!summary.pruned);
    assert_eq!(summary.deleted, 0);

    let vm2 = store
        .get_config_item("/x/vm2", "Azure::Microsoft.Compute/virtualMachines")
        .unwrap()
        .unwrap();
    assert!(!vm2.is_deleted());
}

fn vnet(id: &str) -> ConfigResult {
    ConfigResult::new(
        id.to_string(),
        String::new(),
        "VirtualNetwork",
        "Azure::Microsoft.Network/virtualNetworks".to_string(),
        json!({"id": id}),
    )
}

fn scoped_error(scope: ErrorScope) -> ConfigResult {
    ConfigResult::with_error(
        ResultError::from(ScanError::page_fetch("virtualMachines", "AuthorizationFailed"))
            .with_scope(scope),
    )
}

fn is_active(store: &Store, external_id: &str, config_type: &str) -> bool {
    store
        .get_config_item(external_id, config_type)
        .unwrap()
        .is_some_and(|item| !item.is_deleted())
}

#[test]
fn test_failed_category_only_protects_its_own_items() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store
        .merge_run_results(
            scraper,
            &[vm("/x/vm1"), vm("/x/vm2"), vnet("/x/net1"), vnet("/x/net2")],
        )
        .unwrap();

    let partial = vec![
        vm("/x/vm1"),
        scoped_error(ErrorScope::category("Azure::", "VirtualMachine")),
        vnet("/x/net1"),
    ];
    let summary = store.merge_run_results(scraper, &partial).unwrap();

    assert!(summary.pruned);
    assert_eq!(summary.unverified_scopes, 1);
    assert_eq!(summary.deleted, 1);
    // vm2 could not be verified, net2 was verifiably gone
    assert!(is_active(&store, "/x/vm2", "Azure::Microsoft.Compute/virtualMachines"));
    assert!(!is_active(&store, "/x/net2", "Azure::Microsoft.Network/virtualNetworks"));
    assert!(is_active(&store, "/x/net1", "Azure::Microsoft.Network/virtualNetworks"));
}

#[test]
fn test_failed_provider_block_protects_only_that_provider() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    let bucket = ConfigResult::new(
        "logs".to_string(),
        "logs".to_string(),
        "ObjectStorage",
        "AWS::S3::Bucket".to_string(),
        json!({}),
    );
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vnet("/x/net1"), bucket])
        .unwrap();

    let summary = store
        .merge_run_results(scraper, &[scoped_error(ErrorScope::provider("Azure::"))])
        .unwrap();

    assert!(summary.pruned);
    assert_eq!(summary.deleted, 1);
    assert!(is_active(&store, "/x/vm1", "Azure::Microsoft.Compute/virtualMachines"));
    assert!(is_active(&store, "/x/net1", "Azure::Microsoft.Network/virtualNetworks"));
    assert!(!is_active(&store, "logs", "AWS::S3::Bucket"));
}

#[test]
fn test_scopes_are_forgotten_between_runs() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2")])
        .unwrap();
    store
        .merge_run_results(
            scraper,
            &[
                vm("/x/vm1"),
                scoped_error(ErrorScope::category("Azure::", "VirtualMachine")),
            ],
        )
        .unwrap();

    let clean = store.merge_run_results(scraper, &[vm("/x/vm1")]).unwrap();
    assert_eq!(clean.unverified_scopes, 0);
    assert_eq!(clean.deleted, 1);
}

#[test]
fn test_prune_on_errors_option() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open_with(
        &temp_dir.path().join("test.db"),
        StoreOptions {
            prune_on_errors: true,
            ..Default::default()
        },
    )
    .unwrap();
    let scraper = register(&store);
    store
        .merge_run_results(scraper, &[vm("/x/vm1"), vm("/x/vm2")])
        .unwrap();

    let partial = vec![
        vm("/x/vm1"),
        ConfigResult::with_error(ScanError::page_fetch("virtualMachines", "throttled")),
    ];
    let summary = store.merge_run_results(scraper, &partial).unwrap();
    assert!(summary.pruned);
    assert_eq!(summary.deleted, 1);
}

#[test]
fn test_reobserved_item_is_revived_and_reowned() {
    let (_temp_dir, store) = create_test_store();
    let old = register(&store);
    store.merge_run_results(old, &[vm("/x/vm1")]).unwrap();
    store.delete_scraper_config(old).unwrap();

    let new = store
        .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec("sub-9")))
        .unwrap()
        .config
        .id;
    let summary = store.merge_run_results(new, &[vm("/x/vm1")]).unwrap();
    assert_eq!(summary.updated, 1);

    let item = store
        .get_config_item("/x/vm1", "Azure::Microsoft.Compute/virtualMachines")
        .unwrap()
        .unwrap();
    assert!(!item.is_deleted());
    assert_eq!(item.scraper_id, Some(new));
}

#[test]
fn test_merge_into_deleted_scraper_fails() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store.delete_scraper_config(scraper).unwrap();

    assert!(matches!(
        store.merge_run_results(scraper, &[vm("/x/vm1")]),
        Err(StoreError::ScraperDeleted(_))
    ));
}

// ============================================================================
// Relationship Tests
// ============================================================================

fn edge(source: &str, target: &str) -> RelationshipResult {
    RelationshipResult {
        config: ExternalId::new(source, "Azure::Microsoft.Compute/virtualMachines"),
        related: ExternalId::new(target, "Azure::Microsoft.Compute/virtualMachines"),
        relationship: "Peer".to_string(),
    }
}

#[test]
fn test_edges_upserted_idempotently() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let mut vm1 = vm("/x/vm1");
    vm1.relationships.push(edge("/x/vm2", "/x/vm1"));
    let results = vec![vm1, vm("/x/vm2")];

    let first = store.merge_run_results(scraper, &results).unwrap();
    let second = store.merge_run_results(scraper, &results).unwrap();
    assert_eq!(first.relationships, 1);
    assert_eq!(second.relationships, 1);

    let edges = store.relationships().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].config_id, item_id(&store, "/x/vm2"));
    assert_eq!(edges[0].related_id, item_id(&store, "/x/vm1"));
    assert_eq!(edges[0].scraper_id, Some(scraper));
}

#[test]
fn test_edges_to_unknown_items_are_skipped() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let mut vm1 = vm("/x/vm1");
    vm1.relationships.push(edge("/x/missing", "/x/vm1"));
    let summary = store.merge_run_results(scraper, &[vm1]).unwrap();

    assert_eq!(summary.relationships, 0);
    assert_eq!(summary.unresolved, 1);
    assert!(store.relationships().unwrap().is_empty());
}

fn resolved(set: ResultSet) -> Vec<ConfigResult> {
    let mut set = set;
    resolve_relationships(&mut set, &PayloadNormalizer::default());
    set.results.into_iter().collect()
}

#[test]
fn test_edges_point_from_item_to_parent() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    let mut set = ResultSet::new("azure", Some(azure::hierarchy("s")));
    set.results.push(ConfigResult::new(
        "/subscriptions/s/resourcegroups/web".to_string(),
        "web".to_string(),
        "ResourceGroup",
        azure::RESOURCE_GROUP_TYPE.to_string(),
        json!({}),
    ));
    set.results.push(vm("/subscriptions/s/resourcegroups/web/providers/x/vm1"));

    let summary = store.merge_run_results(scraper, &resolved(set)).unwrap();
    assert_eq!(summary.relationships, 1);

    let edges = store.relationships().unwrap();
    let rg = store
        .get_config_item("/subscriptions/s/resourcegroups/web", azure::RESOURCE_GROUP_TYPE)
        .unwrap()
        .unwrap();
    assert_eq!(
        edges[0].config_id,
        item_id(&store, "/subscriptions/s/resourcegroups/web/providers/x/vm1")
    );
    assert_eq!(edges[0].related_id, rg.id);
}

#[test]
fn test_mixed_case_subscription_edges_resolve() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    let subscription = "AB12-CD34";
    let mut set = ResultSet::new("azure", Some(azure::hierarchy(subscription)));
    set.results.push(ConfigResult::new(
        arm_id("/subscriptions/AB12-CD34"),
        "Production".to_string(),
        "Subscription",
        azure::SUBSCRIPTION_TYPE.to_string(),
        json!({}),
    ));
    set.results.push(ConfigResult::new(
        arm_id("/subscriptions/AB12-CD34/resourceGroups/Web"),
        "Web".to_string(),
        "ResourceGroup",
        azure::RESOURCE_GROUP_TYPE.to_string(),
        json!({}),
    ));
    set.results.push(vm(&arm_id(
        "/subscriptions/AB12-CD34/resourceGroups/Web/providers/Microsoft.Compute/virtualMachines/VM1",
    )));

    let summary = store.merge_run_results(scraper, &resolved(set)).unwrap();
    // rg -> subscription, vm -> subscription, vm -> rg
    assert_eq!(summary.relationships, 3);
    assert_eq!(summary.unresolved, 0);
}

#[test]
fn test_exact_id_wins_over_case_insensitive_match() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let mut vm1 = vm("/x/VM1");
    vm1.relationships.push(edge("/x/VM1", "/x/vm2"));
    let summary = store
        .merge_run_results(scraper, &[vm1, vm("/x/vm2"), vm("/x/VM2")])
        .unwrap();

    assert_eq!(summary.relationships, 1);
    let edges = store.relationships().unwrap();
    assert_eq!(edges[0].related_id, item_id(&store, "/x/vm2"));
}

#[test]
fn test_ambiguous_case_insensitive_match_is_unresolved() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let mut vm1 = vm("/x/vm1");
    vm1.relationships.push(edge("/x/vm1", "/x/Vm2"));
    let summary = store
        .merge_run_results(scraper, &[vm1, vm("/x/vm2"), vm("/x/VM2")])
        .unwrap();

    assert_eq!(summary.relationships, 0);
    assert_eq!(summary.unresolved, 1);
}

#[test]
fn test_aws_edges_land_on_account_root() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    let mut set = ResultSet::new("aws", Some(aws::hierarchy("123456789012")));
    set.results.push(ConfigResult::new(
        "123456789012".to_string(),
        "123456789012".to_string(),
        "Account",
        aws::ACCOUNT_TYPE.to_string(),
        json!({"AccountId": "123456789012"}),
    ));
    for (id, config_type) in [("vpc-1", "AWS::EC2::VPC"), ("i-1", "AWS::EC2::Instance")] {
        set.results.push(ConfigResult::new(
            id.to_string(),
            id.to_string(),
            "Test",
            config_type.to_string(),
            json!({}),
        ));
    }

    let summary = store.merge_run_results(scraper, &resolved(set)).unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(summary.relationships, 2);
    assert_eq!(summary.unresolved, 0);
}

// ============================================================================
// Analysis Tests
// ============================================================================

fn recommendation(target: &str, analyzer: &str) -> ConfigResult {
    ConfigResult::with_analysis(
        "Recommendation",
        AnalysisResult {
            target: ExternalId::new(target, "Azure::Microsoft.Compute/virtualMachines"),
            analyzer: analyzer.to_string(),
            analysis_type: "cost".to_string(),
            severity: "high".to_string(),
            source: "Azure Advisor".to_string(),
            summary: analyzer.to_string(),
            messages: vec!["resize it".to_string()],
            analysis: json!({"impact": "High"}),
        },
    )
}

#[test]
fn test_analyses_attach_to_items_and_resolve_when_gone() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let first = store
        .merge_run_results(
            scraper,
            &[vm("/x/vm1"), recommendation("/x/vm1", "Right-size")],
        )
        .unwrap();
    assert_eq!(first.analyses, 1);
    assert_eq!(first.created, 1);

    let analyses = store.config_analyses(item_id(&store, "/x/vm1")).unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].status, AnalysisStatus::Open);
    assert_eq!(analyses[0].analysis_type, "cost");
    assert_eq!(analyses[0].messages, vec!["resize it"]);
    assert_eq!(analyses[0].scraper_id, Some(scraper));

    let second = store.merge_run_results(scraper, &[vm("/x/vm1")]).unwrap();
    assert_eq!(second.resolved_analyses, 1);
    let analyses = store.config_analyses(item_id(&store, "/x/vm1")).unwrap();
    assert_eq!(analyses[0].status, AnalysisStatus::Resolved);

    let third = store
        .merge_run_results(
            scraper,
            &[vm("/x/vm1"), recommendation("/x/vm1", "Right-size")],
        )
        .unwrap();
    assert_eq!(third.analyses, 1);
    let analyses = store.config_analyses(item_id(&store, "/x/vm1")).unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].status, AnalysisStatus::Open);
}

#[test]
fn test_analysis_of_unknown_item_is_unresolved() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);

    let summary = store
        .merge_run_results(scraper, &[recommendation("/x/missing", "Right-size")])
        .unwrap();
    assert_eq!(summary.analyses, 0);
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.created, 0);
}

#[test]
fn test_failed_advisor_keeps_analyses_open() {
    let (_temp_dir, store) = create_test_store();
    let scraper = register(&store);
    store
        .merge_run_results(
            scraper,
            &[vm("/x/vm1"), recommendation("/x/vm1", "Right-size")],
        )
        .unwrap();

    let summary = store
        .merge_run_results(
            scraper,
            &[
                vm("/x/vm1"),
                scoped_error(ErrorScope::category("Azure::", "Recommendation")),
            ],
        )
        .unwrap();
    assert_eq!(summary.resolved_analyses, 0);
    let analyses = store.config_analyses(item_id(&store, "/x/vm1")).unwrap();
    assert_eq!(analyses[0].status, AnalysisStatus::Open);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_merges_for_different_scrapers_wait_for_the_write_lock() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        Store::open_with(
            &temp_dir.path().join("test.db"),
            StoreOptions {
                busy_timeout: Duration::from_secs(30),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let scrapers: Vec<Uuid> = (0..4)
        .map(|n| {
            store
                .upsert_scraper_config(&ScrapeConfigDraft::file(azure_spec(&format!("sub-{}", n))))
                .unwrap()
                .config
                .id
        })
        .collect();

    let handles: Vec<_> = scrapers
        .iter()
        .enumerate()
        .map(|(n, &scraper)| {
            let store = store.clone();
            std::thread::spawn(move || {
                let results: Vec<_> = (0..50).map(|i| vm(&format!("/s{}/vm{}", n, i))).collect();
                store.merge_run_results(scraper, &results)
            })
        })
        .collect();
    for handle in handles {
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.created, 50);
    }

    for scraper in scrapers {
        assert_eq!(store.config_items_by_scraper(scraper).unwrap().len(), 50);
    }
}

#[test]
fn test_concurrent_merges_for_one_scraper() {
    let (_temp_dir, store) = create_test_store();
    let store = Arc::new(store);
    let scraper = register(&store);

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let store = store.clone();
            std::thread::spawn(move || {
                let results: Vec<_> = (0..10).map(|i| vm(&format!("/x/vm{}", i + n))).collect();
                store.merge_run_results(scraper, &results).unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let active = store
        .config_items_by_scraper(scraper)
        .unwrap()
        .into_iter()
        .filter(|i| !i.is_deleted())
        .count();
    // the last merge to commit owns exactly its own ten items
    assert_eq!(active, 10);
}
