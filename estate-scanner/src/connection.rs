use crate::error::{Result, ScanError};
use crate::spec::EnvVar;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resolved secret material for a named connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Turns connection names and credential placeholders into secret values.
///
/// Secret storage lives behind this trait; scrapers only ever see resolved
/// strings.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn hydrate_connection(&self, name: &str) -> Result<Option<Connection>>;

    async fn resolve_env(&self, var: &EnvVar) -> Result<String>;
}

/// Connections held in memory, env placeholders read from the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionResolver {
    connections: HashMap<String, Connection>,
}

impl StaticConnectionResolver {
    pub fn new(connections: HashMap<String, Connection>) -> Self {
        Self { connections }
    }

    pub fn with_connection(mut self, name: &str, connection: Connection) -> Self {
        self.connections.insert(name.to_string(), connection);
        self
    }
}

#[async_trait]
impl ConnectionResolver for StaticConnectionResolver {
    async fn hydrate_connection(&self, name: &str) -> Result<Option<Connection>> {
        Ok(self.connections.get(name).cloned())
    }

    async fn resolve_env(&self, var: &EnvVar) -> Result<String> {
        if let Some(value) = var.value.as_deref().filter(|v| !v.is_empty()) {
            return Ok(value.to_string());
        }
        match var.from_env.as_deref().filter(|v| !v.is_empty()) {
            Some(name) => std::env::var(name)
                .map_err(|e| ScanError::Connection(format!("environment variable {}: {}", name, e))),
            None => Ok(String::new()),
        }
    }
}
