//! Intent router
//!
//! Classifies free text into a target capability by evaluating an ordered
//! list of keyword rules. First match wins; rule order comes straight from
//! configuration and is significant. When nothing matches, the configured
//! default capability is returned so that every request stays routable.

use serde::{Deserialize, Serialize};

use crate::registry::CapabilityId;

/// One ordered routing rule: any keyword hit selects the capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRule {
    pub keywords: Vec<String>,
    pub capability: CapabilityId,
}

/// Ordered first-match-wins classifier
///
/// Pure function of its input and the rules; no hidden state.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    rules: Vec<IntentRule>,
    default: CapabilityId,
}

impl IntentRouter {
    pub fn new(rules: Vec<IntentRule>, default: CapabilityId) -> Self {
        Self { rules, default }
    }

    /// Classify `text` into a capability. Matching is case-insensitive
    /// substring search; a rule matches when any of its keywords occurs.
    pub fn classify(&self, text: &str) -> CapabilityId {
        let lower = text.to_lowercase();
        for rule in &self.rules {
            if rule
                .keywords
                .iter()
                .any(|keyword| lower.contains(&keyword.to_lowercase()))
            {
                return rule.capability.clone();
            }
        }
        self.default.clone()
    }

    pub fn default_capability(&self) -> &CapabilityId {
        &self.default
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }
}
