// Run orchestration: scrape, normalize and resolve, merge

use crate::error::RunError;
use crate::normalize::PayloadNormalizer;
use crate::relate::resolve_relationships;
use crate::store::{MergeSummary, Store};
use chrono::Utc;
use estate_scanner::connection::ConnectionResolver;
use estate_scanner::context::ScrapeContext;
use estate_scanner::error::{ErrorKind, ResultError};
use estate_scanner::scraper::Registry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scraper_id: Uuid,
    pub scraper_name: String,
    pub started_at: i64,
    pub finished_at: i64,
    /// Items discovered per config type.
    pub discovered: BTreeMap<String, usize>,
    /// Findings reported about items.
    pub analyses: usize,
    pub errors: Vec<ResultError>,
    pub merge: MergeSummary,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn total_discovered(&self) -> usize {
        self.discovered.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Entry point for "run now" on a stored scraper.
pub struct Runner {
    store: Arc<Store>,
    registry: Arc<Registry>,
    resolver: Arc<dyn ConnectionResolver>,
    normalizer: PayloadNormalizer,
    trace: bool,
}

impl Runner {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        resolver: Arc<dyn ConnectionResolver>,
    ) -> Self {
        Self {
            store,
            registry,
            resolver,
            normalizer: PayloadNormalizer::default(),
            trace: false,
        }
    }

    pub fn with_normalizer(mut self, normalizer: PayloadNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Scrape, resolve and merge one scraper. Fetch failures are reported in
    /// the summary; only a missing scraper or a failed merge is an error.
    pub async fn run_now(
        &self,
        scraper_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let started_at = Utc::now().timestamp();
        let store = self.store.clone();
        let scraper = tokio::task::spawn_blocking(move || store.find_scraper(scraper_id))
            .await??
            .ok_or(RunError::ScraperNotFound(scraper_id))?;
        if scraper.is_deleted() {
            return Err(RunError::ScraperDeleted(scraper_id));
        }
        let spec = scraper.parse_spec().map_err(|e| RunError::InvalidSpec {
            id: scraper_id,
            reason: e.to_string(),
        })?;

        info!(id = %scraper_id, name = %scraper.name, providers = ?spec.provider_names(), "starting run");
        let ctx = ScrapeContext::new(spec, self.resolver.clone())
            .with_trace(self.trace)
            .with_cancellation(cancel.clone());
        let mut sets = self.registry.scrape(&ctx).await;

        let mut edges = 0;
        for set in &mut sets {
            edges += resolve_relationships(set, &self.normalizer);
        }

        let mut discovered: BTreeMap<String, usize> = BTreeMap::new();
        let mut analyses = 0;
        let mut errors = Vec::new();
        let mut results = Vec::new();
        for set in sets {
            for result in set.results {
                if let Some(err) = &result.error {
                    errors.push(err.clone());
                } else if result.analysis.is_some() {
                    analyses += 1;
                } else {
                    *discovered.entry(result.config_type.clone()).or_default() += 1;
                }
                results.push(result);
            }
        }
        for err in &errors {
            warn!(id = %scraper_id, error = %err, "scrape error");
        }
        info!(
            id = %scraper_id,
            items = results.len() - errors.len() - analyses,
            analyses,
            edges,
            errors = errors.len(),
            "scrape finished"
        );

        let store = self.store.clone();
        let merge =
            tokio::task::spawn_blocking(move || store.merge_run_results(scraper_id, &results))
                .await??;

        let cancelled =
            cancel.is_cancelled() || errors.iter().any(|e| e.kind == ErrorKind::Cancelled);
        Ok(RunSummary {
            scraper_id,
            scraper_name: scraper.name,
            started_at,
            finished_at: Utc::now().timestamp(),
            discovered,
            analyses,
            errors,
            merge,
            cancelled,
        })
    }
}
