use anyhow::{Context, bail};
use colored::Colorize;
use estate_core::model::{ScrapeConfig, ScrapeConfigDraft, Upserted};
use estate_core::report::format_time;
use estate_core::store::Store;
use estate_scanner::connection::{Connection, StaticConnectionResolver};
use estate_scanner::spec::ScrapeSpec;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Expand `~` and environment variables in a user-supplied path.
pub fn resolve_db_path(raw: &str) -> anyhow::Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("cannot expand {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Create the database at `db_path`. An existing database is only replaced
/// when `force` is set.
pub fn init_database(db_path: &Path, force: bool) -> anyhow::Result<Store> {
    if db_path.exists() {
        if !force {
            bail!(
                "database already exists at {} (use --force to recreate it)",
                db_path.display()
            );
        }
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if file.exists() {
                fs::remove_file(&file)
                    .with_context(|| format!("failed to remove {}", file.display()))?;
            }
        }
    }
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Store::open(db_path).with_context(|| format!("failed to create database {}", db_path.display()))
}

/// Open an existing database.
pub fn open_store(db_path: &Path) -> anyhow::Result<Store> {
    if !db_path.exists() {
        bail!(
            "no database at {} (run `estate init` first)",
            db_path.display()
        );
    }
    Store::open(db_path).with_context(|| format!("failed to open database {}", db_path.display()))
}

/// Load scrape specs from a file. `.json` files hold one spec; anything else
/// is read as YAML and may hold several `---` separated documents.
pub fn load_scrape_specs(path: &Path) -> anyhow::Result<Vec<ScrapeSpec>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let specs = if is_json {
        let spec: ScrapeSpec = serde_json::from_str(&content)
            .with_context(|| format!("invalid scrape config in {}", path.display()))?;
        vec![spec]
    } else {
        parse_yaml_specs(&content).with_context(|| format!("invalid scrape config in {}", path.display()))?
    };

    if specs.is_empty() {
        bail!("no scrape configs found in {}", path.display());
    }
    for (i, spec) in specs.iter().enumerate() {
        if spec.is_empty() {
            bail!(
                "scrape config {} in {} has no provider blocks",
                i + 1,
                path.display()
            );
        }
    }
    Ok(specs)
}

fn parse_yaml_specs(content: &str) -> anyhow::Result<Vec<ScrapeSpec>> {
    let mut specs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        specs.push(serde_yaml::from_value(value)?);
    }
    Ok(specs)
}

/// Load named connections from a YAML map of name to
/// `{username, password, properties}`.
pub fn load_connections(path: &Path) -> anyhow::Result<StaticConnectionResolver> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(StaticConnectionResolver::default());
    }
    let connections: Option<HashMap<String, Connection>> = serde_yaml::from_str(&content)
        .with_context(|| format!("invalid connections file {}", path.display()))?;
    Ok(StaticConnectionResolver::new(connections.unwrap_or_default()))
}

/// Persist every spec in `files` as a file-sourced scraper.
pub fn register_files(store: &Store, files: &[PathBuf]) -> anyhow::Result<Vec<Upserted>> {
    let mut registered = Vec::new();
    for file in files {
        for spec in load_scrape_specs(file)? {
            let upserted = store
                .upsert_scraper_config(&ScrapeConfigDraft::file(spec))
                .with_context(|| format!("failed to register {}", file.display()))?;
            registered.push(upserted);
        }
    }
    Ok(registered)
}

pub fn format_scraper_list(scrapers: &[ScrapeConfig]) -> String {
    if scrapers.is_empty() {
        return "No scrapers registered.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<38} {:<28} {:<22} {}\n",
        "ID".bold(),
        "NAME".bold(),
        "SOURCE".bold(),
        "UPDATED".bold()
    ));
    for scraper in scrapers {
        out.push_str(&format!(
            "{:<38} {:<28} {:<22} {}\n",
            scraper.id.to_string(),
            scraper.name,
            scraper.source.as_str(),
            format_time(scraper.updated_at)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_null_documents_skipped() {
        let specs = parse_yaml_specs("---\nazure:\n  - subscriptionID: s\n---\n").unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].azure[0].subscription_id, "s");
    }

    #[test]
    fn test_empty_list_message() {
        assert_eq!(format_scraper_list(&[]), "No scrapers registered.\n");
    }
}
