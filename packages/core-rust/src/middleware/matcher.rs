//! Selector-based middleware routing.
//!
//! A [`Matcher`] holds a default chain applied to every operation plus
//! selector-specific chains. Selectors are either exact operation names or
//! prefixes ending in `*`. Resolution order for an operation:
//!
//! 1. defaults, always
//! 2. the exact selector's chain, if one is registered
//! 3. otherwise the chain of the first prefix, in descending string order,
//!    that the operation starts with
//!
//! A matcher is configured before serving and shared read-only afterwards;
//! `match_operation` takes `&self` and never mutates.

use std::collections::HashMap;
use std::fmt;

use super::Middleware;

/// Suffix marking a selector as a prefix.
pub const WILDCARD: char = '*';

#[derive(Clone, Default)]
pub struct Matcher {
    defaults: Vec<Middleware>,
    /// Exact selectors and trimmed prefixes share one table.
    matches: HashMap<String, Vec<Middleware>>,
    /// Trimmed prefixes, sorted descending.
    prefixes: Vec<String>,
}

impl Matcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default chain.
    pub fn use_middleware(&mut self, chain: Vec<Middleware>) {
        self.defaults = chain;
    }

    /// Registers `chain` for `selector`. A trailing `*` makes it a prefix.
    /// Re-adding a selector replaces its chain.
    pub fn add(&mut self, selector: &str, chain: Vec<Middleware>) {
        let key = match selector.strip_suffix(WILDCARD) {
            Some(prefix) => {
                if !self.prefixes.iter().any(|p| p == prefix) {
                    self.prefixes.push(prefix.to_string());
                    self.prefixes.sort_by(|a, b| b.cmp(a));
                }
                prefix
            }
            None => selector,
        };
        self.matches.insert(key.to_string(), chain);
    }

    /// Resolves the chain for `operation`.
    #[must_use]
    pub fn match_operation(&self, operation: &str) -> Vec<Middleware> {
        let mut chain = self.defaults.clone();
        if let Some(exact) = self.matches.get(operation) {
            chain.extend(exact.iter().cloned());
        } else if let Some(next) = self
            .prefixes
            .iter()
            .find(|prefix| operation.starts_with(prefix.as_str()))
            .and_then(|prefix| self.matches.get(prefix))
        {
            chain.extend(next.iter().cloned());
        }
        chain
    }

    /// Registered prefixes in resolution order.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut selectors: Vec<_> = self.matches.keys().collect();
        selectors.sort();
        f.debug_struct("Matcher")
            .field("defaults", &self.defaults.len())
            .field("selectors", &selectors)
            .field("prefixes", &self.prefixes)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
