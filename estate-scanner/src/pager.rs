use crate::context::ScrapeContext;
use crate::error::{ErrorScope, Result, ResultError, ScanError};
use crate::result::ConfigResult;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, trace, warn};

/// Minimal paging contract every provider client is consumed through.
#[async_trait]
pub trait Pager: Send {
    fn has_more(&self) -> bool;

    async fn next_page(&mut self) -> Result<Vec<Value>>;
}

/// Fetch one category to exhaustion.
///
/// Construction failure, a page failure or cancellation each append exactly
/// one error result tagged with `scope`; items read before a failure are kept.
pub async fn fetch_category<C, F>(
    ctx: &ScrapeContext,
    category: &str,
    scope: &ErrorScope,
    client: C,
    mut map: F,
) -> Vec<ConfigResult>
where
    C: Future<Output = Result<Box<dyn Pager>>>,
    F: FnMut(Value) -> ConfigResult,
{
    debug!(category, "fetching category");
    let mut results = Vec::new();
    let cancel = ctx.cancellation();

    let client = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled(category)),
        client = client => client.map_err(|e| match e {
            ScanError::ClientInit { .. } => e,
            other => ScanError::client_init(category, other),
        }),
    };
    let mut pager = match client {
        Ok(pager) => pager,
        Err(e) => {
            warn!(category, error = %e, "category client unavailable");
            results.push(scoped_error(e, scope));
            return results;
        }
    };

    let mut pages = 0usize;
    while pager.has_more() {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled(category)),
            page = pager.next_page() => page.map_err(|e| match e {
                ScanError::PageFetch { .. } => e,
                other => ScanError::page_fetch(category, other),
            }),
        };
        match page {
            Ok(items) => {
                pages += 1;
                if ctx.is_trace() {
                    trace!(category, page = pages, items = ?items, "page received");
                }
                results.extend(items.into_iter().map(&mut map));
            }
            Err(e) => {
                warn!(category, error = %e, "category fetch truncated");
                results.push(scoped_error(e, scope));
                return results;
            }
        }
    }

    debug!(category, pages, items = results.len(), "category complete");
    results
}

fn scoped_error(err: ScanError, scope: &ErrorScope) -> ConfigResult {
    ConfigResult::with_error(ResultError::from(err).with_scope(scope.clone()))
}

fn cancelled(category: &str) -> ScanError {
    ScanError::Cancelled {
        category: category.to_string(),
    }
}

/// Read a string field out of a native item, empty when absent.
pub fn str_field(item: &Value, field: &str) -> String {
    item.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
