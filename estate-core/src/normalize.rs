// Volatile key removal

use crate::error::NormalizeError;
use serde_json::{Map, Value};
use tracing::warn;

pub const DEFAULT_VOLATILE_PATTERNS: &[&str] = &["etag"];
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Strips keys that change between scrapes without the resource changing.
#[derive(Debug, Clone)]
pub struct PayloadNormalizer {
    patterns: Vec<String>,
    max_depth: usize,
}

impl Default for PayloadNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_VOLATILE_PATTERNS.iter().copied())
    }
}

impl PayloadNormalizer {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_volatile(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.patterns.iter().any(|p| key.contains(p.as_str()))
    }

    pub fn normalize(&self, payload: &Value) -> Result<Value, NormalizeError> {
        self.walk(payload, 0)
    }

    /// Normalize, falling back to the untouched payload when it cannot be walked.
    pub fn normalize_or_keep(&self, payload: Value) -> Value {
        match self.normalize(&payload) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!(error = %e, "keeping payload unnormalized");
                payload
            }
        }
    }

    fn walk(&self, value: &Value, depth: usize) -> Result<Value, NormalizeError> {
        if depth > self.max_depth {
            return Err(NormalizeError {
                limit: self.max_depth,
            });
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    if self.is_volatile(key) {
                        continue;
                    }
                    out.insert(key.clone(), self.walk(child, depth + 1)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.walk(item, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}
