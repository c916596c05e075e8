// SQLite reconciliation store

use crate::error::{Result, StoreError};
use crate::model::{
    ConfigAnalysis, ConfigItem, ConfigSource, Relationship, ScrapeConfig,
    ScrapeConfigDraft, Upserted,
};
use chrono::Utc;
use estate_scanner::error::{ErrorKind, ErrorScope};
use estate_scanner::result::{AnalysisResult, ConfigResult, ExternalId};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A `table.column` holding config item IDs that must survive a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTable {
    pub table: String,
    pub column: String,
}

impl ReferenceTable {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if is_identifier(&self.table) && is_identifier(&self.column) {
            Ok(())
        } else {
            Err(StoreError::InvalidReference(format!(
                "{}.{}",
                self.table, self.column
            )))
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub reference_tables: Vec<ReferenceTable>,
    /// How long a writer waits for SQLite's write lock before failing with
    /// `database is locked`. Raise it when merges for many scrapers share
    /// one database.
    pub busy_timeout: Duration,
    /// Prune unobserved items even where the run's errors leave them
    /// unverified.
    pub prune_on_errors: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reference_tables: vec![ReferenceTable::new("evidences", "config_id")],
            busy_timeout: Duration::from_secs(5),
            prune_on_errors: false,
        }
    }
}

/// Outcome of detaching or deleting items a scraper no longer vouches for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CascadeSummary {
    pub detached: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub created: usize,
    pub updated: usize,
    pub relationships: usize,
    /// Edges and analyses whose endpoint is not a stored item.
    pub unresolved: usize,
    pub analyses: usize,
    pub resolved_analyses: usize,
    pub detached: usize,
    pub deleted: usize,
    pub pruned: bool,
    /// Failed categories or provider blocks whose items were kept unpruned.
    pub unverified_scopes: usize,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Inventory database.
///
/// Every operation opens its own connection. Writers take SQLite's write
/// lock up front (`BEGIN IMMEDIATE`), so merges for different scrapers are
/// serialised on the database file while merges for the same scraper are
/// also serialised in process. A writer that cannot get the lock within
/// [`StoreOptions::busy_timeout`] fails with a database error.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    options: StoreOptions,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        for reference in &options.reference_tables {
            reference.validate()?;
        }
        let store = Store {
            path: path.to_path_buf(),
            options,
            locks: Mutex::new(HashMap::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS config_scrapers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source TEXT NOT NULL CHECK(source IN ('declarative_resource', 'file', 'ui')),
    spec TEXT NOT NULL,       -- canonical JSON
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_config_scrapers_spec ON config_scrapers(spec);

CREATE TABLE IF NOT EXISTS config_items (
    id TEXT PRIMARY KEY,
    scraper_id TEXT,          -- NULL once detached
    external_id TEXT NOT NULL,
    type TEXT NOT NULL COLLATE NOCASE,
    config_class TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    config TEXT NOT NULL,     -- normalized JSON payload
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,

    FOREIGN KEY(scraper_id) REFERENCES config_scrapers(id),
    UNIQUE(external_id, type)
);

CREATE INDEX IF NOT EXISTS idx_config_items_scraper ON config_items(scraper_id);

CREATE TABLE IF NOT EXISTS config_relationships (
    config_id TEXT NOT NULL,
    related_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    scraper_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,

    PRIMARY KEY(config_id, related_id, relation),
    FOREIGN KEY(config_id) REFERENCES config_items(id),
    FOREIGN KEY(related_id) REFERENCES config_items(id),
    FOREIGN KEY(scraper_id) REFERENCES config_scrapers(id)
);

CREATE INDEX IF NOT EXISTS idx_config_relationships_related ON config_relationships(related_id);

-- Provider findings about items, e.g. advisor recommendations
CREATE TABLE IF NOT EXISTS config_analysis (
    id TEXT PRIMARY KEY,
    config_id TEXT NOT NULL,
    scraper_id TEXT,
    config_class TEXT NOT NULL,
    analyzer TEXT NOT NULL,
    analysis_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    source TEXT NOT NULL,
    summary TEXT NOT NULL,
    messages TEXT NOT NULL,   -- JSON array
    analysis TEXT NOT NULL,   -- native JSON payload
    status TEXT NOT NULL CHECK(status IN ('open', 'resolved')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,

    FOREIGN KEY(config_id) REFERENCES config_items(id),
    FOREIGN KEY(scraper_id) REFERENCES config_scrapers(id),
    UNIQUE(config_id, analyzer)
);

CREATE INDEX IF NOT EXISTS idx_config_analysis_scraper ON config_analysis(scraper_id);

-- Analyst evidence pinned to config items
CREATE TABLE IF NOT EXISTS evidences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_id TEXT,
    description TEXT NOT NULL,
    created_at INTEGER NOT NULL,

    FOREIGN KEY(config_id) REFERENCES config_items(id)
);

CREATE INDEX IF NOT EXISTS idx_evidences_config ON evidences(config_id);
            ",
        )?;
        Ok(())
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drop a deleted scraper's lock. A merge still waiting on the old lock
    /// sees the scraper as deleted once it gets it.
    fn forget_lock(&self, id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(&id);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // Scraper configs

    /// Persist a scrape config.
    ///
    /// File and UI configs are matched by spec equality and never modified;
    /// declarative resources are keyed by their UID and updated in place.
    pub fn upsert_scraper_config(&self, draft: &ScrapeConfigDraft) -> Result<Upserted> {
        let spec = draft.spec.to_canonical_json()?;
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = current_timestamp();

        let upserted = match (draft.source, draft.uid) {
            (ConfigSource::DeclarativeResource, Some(uid)) => {
                let name = draft
                    .qualified_name()
                    .unwrap_or_else(|| generate_name(&draft.spec.provider_names(), &spec));
                upsert_declarative(&tx, uid, &name, &spec, now)?
            }
            (source, _) => {
                if let Some(existing) = find_active_by_spec(&tx, &spec)? {
                    debug!(id = %existing.id, "scrape config already registered");
                    Upserted {
                        config: existing,
                        changed: false,
                    }
                } else {
                    let config = ScrapeConfig {
                        id: Uuid::new_v4(),
                        name: generate_name(&draft.spec.provider_names(), &spec),
                        source,
                        spec,
                        created_at: now,
                        updated_at: now,
                        deleted_at: None,
                    };
                    insert_scraper(&tx, &config)?;
                    Upserted {
                        config,
                        changed: true,
                    }
                }
            }
        };

        tx.commit()?;
        if upserted.changed {
            info!(id = %upserted.config.id, name = %upserted.config.name, "scrape config saved");
        }
        Ok(upserted)
    }

    pub fn find_scraper(&self, id: Uuid) -> Result<Option<ScrapeConfig>> {
        let conn = self.connect()?;
        find_scraper_in(&conn, id)
    }

    /// Active scrape configs, oldest first.
    pub fn list_scrapers(&self) -> Result<Vec<ScrapeConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, source, spec, created_at, updated_at, deleted_at
             FROM config_scrapers WHERE deleted_at IS NULL ORDER BY created_at, name",
        )?;
        let scrapers = stmt
            .query_map([], scraper_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scrapers)
    }

    /// Soft-delete a scraper and release its items: referenced items are
    /// detached, the rest soft-deleted. Its open analyses are resolved.
    pub fn delete_scraper_config(&self, id: Uuid) -> Result<CascadeSummary> {
        let lock = self.lock_for(id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if find_scraper_in(&tx, id)?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        let now = current_timestamp();
        tx.execute(
            "UPDATE config_scrapers SET deleted_at = COALESCE(deleted_at, ?2), updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), now],
        )?;
        let summary = self.release_owned(&tx, id, false, now)?;
        resolve_analyses(&tx, id, false, now)?;
        tx.commit()?;
        drop(guard);
        self.forget_lock(id);

        info!(
            %id,
            detached = summary.detached,
            deleted = summary.deleted,
            "scrape config deleted"
        );
        Ok(summary)
    }

    // Run merge

    /// Reconcile one run's results into the store for `scraper_id`.
    pub fn merge_run_results(
        &self,
        scraper_id: Uuid,
        results: &[ConfigResult],
    ) -> Result<MergeSummary> {
        let lock = self.lock_for(scraper_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match find_scraper_in(&tx, scraper_id)? {
            None => return Err(StoreError::NotFound(scraper_id)),
            Some(scraper) if scraper.is_deleted() => {
                return Err(StoreError::ScraperDeleted(scraper_id));
            }
            Some(_) => {}
        }

        let now = current_timestamp();
        let owner = scraper_id.to_string();
        let mut summary = MergeSummary::default();
        let mut observed: HashSet<Uuid> = HashSet::new();

        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS observed_items (id TEXT PRIMARY KEY);
             CREATE TEMP TABLE IF NOT EXISTS observed_analyses (id TEXT PRIMARY KEY);
             CREATE TEMP TABLE IF NOT EXISTS unverified_scopes (
                 type_prefix TEXT NOT NULL,
                 config_class TEXT
             );
             DELETE FROM observed_items;
             DELETE FROM observed_analyses;
             DELETE FROM unverified_scopes;",
        )?;

        for result in results.iter().filter(|r| r.is_item()) {
            let payload = serde_json::to_string(&result.config)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM config_items WHERE external_id = ?1 AND type = ?2",
                    params![&result.id, &result.config_type],
                    |row| row.get(0),
                )
                .optional()?;

            let item_id = match existing {
                Some(raw) => {
                    tx.execute(
                        "UPDATE config_items
                         SET scraper_id = ?2, config_class = ?3, name = ?4, config = ?5,
                             updated_at = ?6, deleted_at = NULL
                         WHERE id = ?1",
                        params![&raw, &owner, &result.config_class, &result.name, &payload, now],
                    )?;
                    let id = parse_uuid(&raw)?;
                    if !observed.contains(&id) {
                        summary.updated += 1;
                    }
                    id
                }
                None => {
                    let id = Uuid::new_v4();
                    tx.execute(
                        "INSERT INTO config_items (
                            id, scraper_id, external_id, type, config_class, name, config,
                            created_at, updated_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                        params![
                            id.to_string(),
                            &owner,
                            &result.id,
                            &result.config_type,
                            &result.config_class,
                            &result.name,
                            &payload,
                            now,
                        ],
                    )?;
                    summary.created += 1;
                    id
                }
            };

            if observed.insert(item_id) {
                tx.execute(
                    "INSERT INTO observed_items (id) VALUES (?1)",
                    params![item_id.to_string()],
                )?;
            }
        }

        for result in results.iter().filter(|r| !r.is_error()) {
            for edge in &result.relationships {
                let (Some(source), Some(target)) =
                    (lookup_item(&tx, &edge.config)?, lookup_item(&tx, &edge.related)?)
                else {
                    debug!(
                        source = %edge.config.external_id,
                        target = %edge.related.external_id,
                        relation = %edge.relationship,
                        "skipping edge with unknown endpoint"
                    );
                    summary.unresolved += 1;
                    continue;
                };
                tx.execute(
                    "INSERT INTO config_relationships (
                        config_id, related_id, relation, scraper_id, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                    ON CONFLICT(config_id, related_id, relation)
                    DO UPDATE SET scraper_id = excluded.scraper_id, updated_at = excluded.updated_at",
                    params![source, target, &edge.relationship, &owner, now],
                )?;
                summary.relationships += 1;
            }
        }

        let mut seen_analyses: HashSet<String> = HashSet::new();
        for result in results.iter().filter(|r| !r.is_error()) {
            let Some(analysis) = &result.analysis else {
                continue;
            };
            let Some(config_id) = lookup_item(&tx, &analysis.target)? else {
                debug!(
                    target = %analysis.target.external_id,
                    analyzer = %analysis.analyzer,
                    "skipping analysis of unknown item"
                );
                summary.unresolved += 1;
                continue;
            };
            let id = upsert_analysis(&tx, &config_id, &owner, &result.config_class, analysis, now)?;
            if seen_analyses.insert(id.clone()) {
                tx.execute(
                    "INSERT INTO observed_analyses (id) VALUES (?1)",
                    params![id],
                )?;
                summary.analyses += 1;
            }
        }

        let failed_scopes: Vec<Option<&ErrorScope>> = results
            .iter()
            .filter_map(|r| r.error.as_ref())
            .map(|e| match e.kind {
                ErrorKind::Cancelled => None,
                _ => e.scope.as_ref(),
            })
            .collect();
        let run_unverified = failed_scopes.iter().any(Option::is_none);
        if run_unverified && !self.options.prune_on_errors {
            warn!(
                %scraper_id,
                "run reported errors outside any category, leaving unobserved items in place"
            );
        } else {
            if !self.options.prune_on_errors {
                let scopes: HashSet<&ErrorScope> = failed_scopes.into_iter().flatten().collect();
                for scope in &scopes {
                    tx.execute(
                        "INSERT INTO unverified_scopes (type_prefix, config_class) VALUES (?1, ?2)",
                        params![&scope.type_prefix, &scope.config_class],
                    )?;
                }
                if !scopes.is_empty() {
                    warn!(
                        %scraper_id,
                        scopes = scopes.len(),
                        "keeping unobserved items of failed categories"
                    );
                }
                summary.unverified_scopes = scopes.len();
            }
            let cascade = self.release_owned(&tx, scraper_id, true, now)?;
            summary.detached = cascade.detached;
            summary.deleted = cascade.deleted;
            summary.resolved_analyses = resolve_analyses(&tx, scraper_id, true, now)?;
            summary.pruned = true;
        }

        tx.commit()?;
        info!(
            %scraper_id,
            created = summary.created,
            updated = summary.updated,
            relationships = summary.relationships,
            unresolved = summary.unresolved,
            analyses = summary.analyses,
            detached = summary.detached,
            deleted = summary.deleted,
            unverified_scopes = summary.unverified_scopes,
            "merged run results"
        );
        Ok(summary)
    }

    /// Detach referenced and soft-delete unreferenced active items owned by
    /// `scraper_id`. With `unobserved_only`, items in `observed_items` and
    /// items under an `unverified_scopes` entry are kept.
    fn release_owned(
        &self,
        tx: &Transaction<'_>,
        scraper_id: Uuid,
        unobserved_only: bool,
        now: i64,
    ) -> Result<CascadeSummary> {
        let referenced = self.referenced_subquery();
        let observed = if unobserved_only {
            " AND id NOT IN (SELECT id FROM observed_items)
              AND NOT EXISTS (
                  SELECT 1 FROM unverified_scopes u
                  WHERE substr(config_items.type, 1, length(u.type_prefix)) = u.type_prefix COLLATE NOCASE
                    AND (u.config_class IS NULL OR u.config_class = config_items.config_class)
              )"
        } else {
            ""
        };
        let owner = scraper_id.to_string();

        let detached = tx.execute(
            &format!(
                "UPDATE config_items SET scraper_id = NULL, updated_at = ?2
                 WHERE scraper_id = ?1 AND deleted_at IS NULL
                   AND id IN ({}){}",
                referenced, observed
            ),
            params![&owner, now],
        )?;
        let deleted = tx.execute(
            &format!(
                "UPDATE config_items SET deleted_at = ?2, updated_at = ?2
                 WHERE scraper_id = ?1 AND deleted_at IS NULL
                   AND id NOT IN ({}){}",
                referenced, observed
            ),
            params![&owner, now],
        )?;
        Ok(CascadeSummary { detached, deleted })
    }

    /// Union of item IDs named by the reference tables. Identifiers were
    /// validated when the store was opened.
    fn referenced_subquery(&self) -> String {
        if self.options.reference_tables.is_empty() {
            return "SELECT NULL WHERE 0".to_string();
        }
        self.options
            .reference_tables
            .iter()
            .map(|r| {
                format!(
                    "SELECT {col} FROM {table} WHERE {col} IS NOT NULL",
                    col = r.column,
                    table = r.table
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ")
    }

    // Queries

    pub fn get_config_item(&self, external_id: &str, config_type: &str) -> Result<Option<ConfigItem>> {
        let conn = self.connect()?;
        let item = conn
            .query_row(
                &format!("{} WHERE external_id = ?1 AND type = ?2", ITEM_COLUMNS),
                params![external_id, config_type],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Items currently owned by a scraper, including soft-deleted ones.
    pub fn config_items_by_scraper(&self, scraper_id: Uuid) -> Result<Vec<ConfigItem>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE scraper_id = ?1 ORDER BY created_at, external_id",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![scraper_id.to_string()], item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn active_config_items(&self) -> Result<Vec<ConfigItem>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE deleted_at IS NULL ORDER BY type, external_id",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map([], item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn relationships(&self) -> Result<Vec<Relationship>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT config_id, related_id, relation, scraper_id, created_at, updated_at
             FROM config_relationships ORDER BY relation, config_id, related_id",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok(Relationship {
                    config_id: uuid_column(row, 0)?,
                    related_id: uuid_column(row, 1)?,
                    relation: row.get(2)?,
                    scraper_id: optional_uuid_column(row, 3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Analyses of an item, newest first.
    pub fn config_analyses(&self, config_id: Uuid) -> Result<Vec<ConfigAnalysis>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE config_id = ?1 ORDER BY updated_at DESC, analyzer",
            ANALYSIS_COLUMNS
        ))?;
        let analyses = stmt
            .query_map(params![config_id.to_string()], analysis_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(analyses)
    }

    /// Pin evidence to an item so cascades detach it instead of deleting it.
    pub fn insert_evidence(&self, config_id: Uuid, description: &str) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO evidences (config_id, description, created_at) VALUES (?1, ?2, ?3)",
            params![config_id.to_string(), description, current_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

const SCRAPER_COLUMNS: &str =
    "SELECT id, name, source, spec, created_at, updated_at, deleted_at FROM config_scrapers";

const ITEM_COLUMNS: &str = "SELECT id, scraper_id, external_id, type, config_class, name, config, \
     created_at, updated_at, deleted_at FROM config_items";

const ANALYSIS_COLUMNS: &str = "SELECT id, config_id, scraper_id, config_class, analyzer, \
     analysis_type, severity, source, summary, messages, analysis, status, created_at, updated_at \
     FROM config_analysis";

fn find_scraper_in(conn: &Connection, id: Uuid) -> Result<Option<ScrapeConfig>> {
    let scraper = conn
        .query_row(
            &format!("{} WHERE id = ?1", SCRAPER_COLUMNS),
            params![id.to_string()],
            scraper_from_row,
        )
        .optional()?;
    Ok(scraper)
}

fn find_active_by_spec(conn: &Connection, spec: &str) -> Result<Option<ScrapeConfig>> {
    let scraper = conn
        .query_row(
            &format!(
                "{} WHERE spec = ?1 AND deleted_at IS NULL ORDER BY created_at LIMIT 1",
                SCRAPER_COLUMNS
            ),
            params![spec],
            scraper_from_row,
        )
        .optional()?;
    Ok(scraper)
}

fn insert_scraper(conn: &Connection, config: &ScrapeConfig) -> Result<()> {
    conn.execute(
        "INSERT INTO config_scrapers (id, name, source, spec, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            config.id.to_string(),
            &config.name,
            config.source.as_str(),
            &config.spec,
            config.created_at,
            config.updated_at,
        ],
    )?;
    Ok(())
}

fn upsert_declarative(
    conn: &Connection,
    uid: Uuid,
    name: &str,
    spec: &str,
    now: i64,
) -> Result<Upserted> {
    match find_scraper_in(conn, uid)? {
        Some(existing) if existing.is_deleted() => Err(StoreError::ScraperDeleted(uid)),
        Some(existing) if existing.name == name && existing.spec == spec => Ok(Upserted {
            config: existing,
            changed: false,
        }),
        Some(mut existing) => {
            conn.execute(
                "UPDATE config_scrapers SET name = ?2, spec = ?3, updated_at = ?4 WHERE id = ?1",
                params![uid.to_string(), name, spec, now],
            )?;
            existing.name = name.to_string();
            existing.spec = spec.to_string();
            existing.updated_at = now;
            Ok(Upserted {
                config: existing,
                changed: true,
            })
        }
        None => {
            let config = ScrapeConfig {
                id: uid,
                name: name.to_string(),
                source: ConfigSource::DeclarativeResource,
                spec: spec.to_string(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            insert_scraper(conn, &config)?;
            Ok(Upserted {
                config,
                changed: true,
            })
        }
    }
}

/// Resolve an edge or analysis endpoint to an active item. An exact ID
/// match wins; otherwise a case-insensitive match is used when it is unique.
fn lookup_item(conn: &Connection, id: &ExternalId) -> Result<Option<String>> {
    let exact = conn
        .query_row(
            "SELECT id FROM config_items
             WHERE external_id = ?1 AND type = ?2 AND deleted_at IS NULL",
            params![&id.external_id, &id.config_type],
            |row| row.get(0),
        )
        .optional()?;
    if exact.is_some() {
        return Ok(exact);
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id FROM config_items
         WHERE external_id = ?1 COLLATE NOCASE AND type = ?2 AND deleted_at IS NULL
         LIMIT 2",
    )?;
    let mut matches = stmt
        .query_map(params![&id.external_id, &id.config_type], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if matches.len() == 1 {
        Ok(matches.pop())
    } else {
        Ok(None)
    }
}

/// Insert or refresh the analysis keyed by `(config_id, analyzer)` and
/// reopen it. Returns its ID.
fn upsert_analysis(
    tx: &Transaction<'_>,
    config_id: &str,
    owner: &str,
    config_class: &str,
    analysis: &AnalysisResult,
    now: i64,
) -> Result<String> {
    let messages = serde_json::to_string(&analysis.messages)?;
    let payload = serde_json::to_string(&analysis.analysis)?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM config_analysis WHERE config_id = ?1 AND analyzer = ?2",
            params![config_id, &analysis.analyzer],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE config_analysis
                 SET scraper_id = ?2, config_class = ?3, analysis_type = ?4, severity = ?5,
                     source = ?6, summary = ?7, messages = ?8, analysis = ?9,
                     status = 'open', updated_at = ?10
                 WHERE id = ?1",
                params![
                    &id,
                    owner,
                    config_class,
                    &analysis.analysis_type,
                    &analysis.severity,
                    &analysis.source,
                    &analysis.summary,
                    &messages,
                    &payload,
                    now,
                ],
            )?;
            Ok(id)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO config_analysis (
                    id, config_id, scraper_id, config_class, analyzer, analysis_type, severity,
                    source, summary, messages, analysis, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'open', ?12, ?12)",
                params![
                    &id,
                    config_id,
                    owner,
                    config_class,
                    &analysis.analyzer,
                    &analysis.analysis_type,
                    &analysis.severity,
                    &analysis.source,
                    &analysis.summary,
                    &messages,
                    &payload,
                    now,
                ],
            )?;
            Ok(id)
        }
    }
}

/// Resolve open analyses of `scraper_id`. With `unobserved_only`, analyses
/// in `observed_analyses` and those under an `unverified_scopes` entry stay
/// open.
fn resolve_analyses(
    tx: &Transaction<'_>,
    scraper_id: Uuid,
    unobserved_only: bool,
    now: i64,
) -> Result<usize> {
    let observed = if unobserved_only {
        " AND id NOT IN (SELECT id FROM observed_analyses)
          AND NOT EXISTS (
              SELECT 1 FROM unverified_scopes u, config_items ci
              WHERE ci.id = config_analysis.config_id
                AND substr(ci.type, 1, length(u.type_prefix)) = u.type_prefix COLLATE NOCASE
                AND (u.config_class IS NULL OR u.config_class = config_analysis.config_class)
          )"
    } else {
        ""
    };
    let resolved = tx.execute(
        &format!(
            "UPDATE config_analysis SET status = 'resolved', updated_at = ?2
             WHERE scraper_id = ?1 AND status = 'open'{}",
            observed
        ),
        params![scraper_id.to_string(), now],
    )?;
    Ok(resolved)
}

/// `{providers}-{first 8 hex of sha256(spec)}`.
pub fn generate_name(providers: &[&str], spec: &str) -> String {
    let digest = hex::encode(Sha256::digest(spec.as_bytes()));
    let prefix = if providers.is_empty() {
        "scraper".to_string()
    } else {
        providers.join("-")
    };
    format!("{}-{}", prefix, &digest[..8])
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        StoreError::Database(rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            Box::new(e),
        ))
    })
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        Uuid::parse_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn scraper_from_row(row: &Row<'_>) -> rusqlite::Result<ScrapeConfig> {
    let source: String = row.get(2)?;
    Ok(ScrapeConfig {
        id: uuid_column(row, 0)?,
        name: row.get(1)?,
        source: source.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
        })?,
        spec: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ConfigItem> {
    let raw: String = row.get(6)?;
    Ok(ConfigItem {
        id: uuid_column(row, 0)?,
        scraper_id: optional_uuid_column(row, 1)?,
        external_id: row.get(2)?,
        config_type: row.get(3)?,
        config_class: row.get(4)?,
        name: row.get(5)?,
        config: serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<ConfigAnalysis> {
    let messages: String = row.get(9)?;
    let payload: String = row.get(10)?;
    let status: String = row.get(11)?;
    Ok(ConfigAnalysis {
        id: uuid_column(row, 0)?,
        config_id: uuid_column(row, 1)?,
        scraper_id: optional_uuid_column(row, 2)?,
        config_class: row.get(3)?,
        analyzer: row.get(4)?,
        analysis_type: row.get(5)?,
        severity: row.get(6)?,
        source: row.get(7)?,
        summary: row.get(8)?,
        messages: serde_json::from_str(&messages)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?,
        analysis: serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(11, Type::Text, e.into())
        })?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}
