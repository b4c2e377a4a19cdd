//! Capability registry
//!
//! Describes the worker services requests can be delegated to. The registry is
//! built once from configuration at process start and shared immutably; unknown
//! identifiers resolve to the configured default so that every request stays
//! routable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppError, Result};

/// Identifier of one worker service (e.g. "gcloud", "monitoring")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Request shape a worker accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    /// Free-text instruction (the common case)
    #[default]
    Instruction,
    /// Structured query string
    Query,
}

impl RequestShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestShape::Instruction => "instruction",
            RequestShape::Query => "query",
        }
    }
}

/// One registered worker service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Stable identifier used by routing rules and plans
    pub id: CapabilityId,
    /// Human-readable name
    pub name: String,
    /// Endpoint the delegation client posts to
    pub address: String,
    /// Accepted request shape
    #[serde(default)]
    pub request_shape: RequestShape,
    /// Permission tag evaluated by the policy gate
    pub permission: String,
}

/// Immutable snapshot of all registered capabilities
///
/// Constructed once at startup; shared by reference across concurrent sessions
/// without locking.
#[derive(Debug)]
pub struct CapabilityRegistry {
    entries: Vec<CapabilityEntry>,
    by_id: HashMap<CapabilityId, usize>,
    default_id: CapabilityId,
}

impl CapabilityRegistry {
    /// Build a registry from configuration entries.
    ///
    /// Fails when ids collide or the default capability is not present; both
    /// are unrecoverable configuration errors.
    pub fn new(entries: Vec<CapabilityEntry>, default_id: CapabilityId) -> Result<Self> {
        if entries.is_empty() {
            return Err(AppError::Config(
                "capability registry must not be empty".to_string(),
            ));
        }

        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id.clone(), i).is_some() {
                return Err(AppError::Config(format!(
                    "duplicate capability id: {}",
                    entry.id
                )));
            }
        }

        if !by_id.contains_key(&default_id) {
            return Err(AppError::Config(format!(
                "default capability {} is not in the registry",
                default_id
            )));
        }

        Ok(Self {
            entries,
            by_id,
            default_id,
        })
    }

    pub fn get(&self, id: &CapabilityId) -> Option<&CapabilityEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    /// Resolve an identifier, falling back to the default entry when unknown.
    pub fn resolve(&self, id: &CapabilityId) -> &CapabilityEntry {
        self.get(id).unwrap_or_else(|| self.default_entry())
    }

    pub fn default_entry(&self) -> &CapabilityEntry {
        &self.entries[self.by_id[&self.default_id]]
    }

    pub fn default_id(&self) -> &CapabilityId {
        &self.default_id
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
