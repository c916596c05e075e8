// Relationship derivation over a completed result set

use crate::normalize::PayloadNormalizer;
use estate_scanner::result::{ConfigResult, ExternalId, Hierarchy, RelationshipResult, ResultSet};

/// Parent local name out of a path-like ID.
///
/// `/subscriptions/S/resourceGroups/RG/providers/...` yields `RG` for marker
/// `resourcegroups`. IDs with fewer than four segments, or whose third segment
/// is not the marker, have no parent.
pub fn extract_parent<'a>(id: &'a str, marker: &str) -> Option<&'a str> {
    let trimmed = id.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.len() < 4 || !segments[2].eq_ignore_ascii_case(marker) {
        return None;
    }
    Some(segments[3]).filter(|name| !name.is_empty())
}

/// Normalize every item's payload and attach ownership and containment edges.
/// Edges run from the item to its root and to its structural parent.
/// Returns the number of edges added; running it again adds none.
pub fn resolve_relationships(set: &mut ResultSet, normalizer: &PayloadNormalizer) -> usize {
    let hierarchy = set.hierarchy.clone();
    let mut added = 0;
    for result in set.results.iter_mut() {
        if result.is_error() || result.id.is_empty() {
            continue;
        }
        let payload = std::mem::take(&mut result.config);
        result.config = normalizer.normalize_or_keep(payload);

        if let Some(hierarchy) = &hierarchy {
            for edge in derive_edges(result, hierarchy) {
                if !result.relationships.contains(&edge) {
                    result.relationships.push(edge);
                    added += 1;
                }
            }
        }
    }
    added
}

fn derive_edges(result: &ConfigResult, hierarchy: &Hierarchy) -> Vec<RelationshipResult> {
    if result.id.eq_ignore_ascii_case(&hierarchy.root_id) {
        return Vec::new();
    }

    let item = result.external_id();
    let local_type = strip_type_prefix(&result.config_type, &hierarchy.type_prefix);
    let mut edges = Vec::with_capacity(2);

    if !result.config_type.eq_ignore_ascii_case(&hierarchy.root_type) {
        edges.push(RelationshipResult {
            config: item.clone(),
            related: ExternalId::new(hierarchy.root_id.clone(), hierarchy.root_type.clone()),
            relationship: format!("{}{}", hierarchy.root_kind, local_type),
        });
    }

    if let Some(containment) = &hierarchy.containment
        && !result.config_type.eq_ignore_ascii_case(&containment.parent_type)
        && let Some(parent) = extract_parent(&result.id, &containment.marker)
    {
        let parent_id = format!(
            "{}/{}/{}",
            hierarchy.root_id,
            containment.marker,
            parent.to_lowercase()
        );
        edges.push(RelationshipResult {
            config: item,
            related: ExternalId::new(parent_id, containment.parent_type.clone()),
            relationship: format!("{}{}", containment.parent_kind, local_type),
        });
    }
    edges
}

fn strip_type_prefix<'a>(config_type: &'a str, prefix: &str) -> &'a str {
    match config_type.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &config_type[prefix.len()..],
        _ => config_type,
    }
}
