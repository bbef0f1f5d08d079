//! Per-attribute matching rules.
//!
//! Attribute semantics differ by kind: identifiers must match exactly while
//! human-readable titles drift between OS and app versions. The rules live in
//! a [`MatchTable`] keyed by canonical attribute name, so new attribute kinds
//! are added as data instead of resolver code.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Canonical attribute names.
pub mod attributes {
    pub const ROLE: &str = "AXRole";
    pub const TITLE: &str = "AXTitle";
    pub const DESCRIPTION: &str = "AXDescription";
    pub const VALUE: &str = "AXValue";
    pub const HELP: &str = "AXHelp";
    pub const IDENTIFIER: &str = "AXIdentifier";
    pub const FILENAME: &str = "AXFilename";
    pub const NAME: &str = "name";
    pub const BUNDLE_IDENTIFIER: &str = "bundleIdentifier";
}

use attributes::*;

/// How a predicate value is compared with the live attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Byte-for-byte equality, case-sensitive.
    Exact,
    /// The actual value contains the expected value.
    Contains,
    /// Either value contains the other.
    Substring,
    /// The actual value starts with the expected value.
    StartsWith,
}

impl MatchStrategy {
    pub fn apply(self, expected: &str, actual: &str) -> bool {
        match self {
            MatchStrategy::Exact => actual == expected,
            MatchStrategy::Contains => actual.contains(expected),
            MatchStrategy::Substring => actual.contains(expected) || expected.contains(actual),
            MatchStrategy::StartsWith => actual.starts_with(expected),
        }
    }
}

/// Alias and strategy tables. Unlisted attributes match with
/// [`MatchStrategy::Exact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTable {
    aliases: HashMap<String, String>,
    strategies: HashMap<String, MatchStrategy>,
}

impl Default for MatchTable {
    fn default() -> Self {
        let mut table = Self::empty();

        for (alias, canonical) in [
            ("role", ROLE),
            ("title", TITLE),
            ("description", DESCRIPTION),
            ("value", VALUE),
            ("help", HELP),
            ("id", IDENTIFIER),
            ("identifier", IDENTIFIER),
            ("filename", FILENAME),
            ("bundleId", BUNDLE_IDENTIFIER),
            ("bundleID", BUNDLE_IDENTIFIER),
        ] {
            table.set_alias(alias, canonical);
        }

        for (name, strategy) in [
            (IDENTIFIER, MatchStrategy::Exact),
            (BUNDLE_IDENTIFIER, MatchStrategy::Exact),
            (ROLE, MatchStrategy::Exact),
            (DESCRIPTION, MatchStrategy::Contains),
            (HELP, MatchStrategy::Contains),
            (TITLE, MatchStrategy::Substring),
            (VALUE, MatchStrategy::Substring),
            (FILENAME, MatchStrategy::StartsWith),
            (NAME, MatchStrategy::StartsWith),
        ] {
            table.set_strategy(name, strategy);
        }

        table
    }
}

impl MatchTable {
    /// A table with no aliases and no strategies; everything matches exactly.
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
            strategies: HashMap::new(),
        }
    }

    /// The default table with `strategies` and `aliases` layered on top.
    pub fn with_overrides(
        strategies: &BTreeMap<String, MatchStrategy>,
        aliases: &BTreeMap<String, String>,
    ) -> Self {
        let mut table = Self::default();
        // aliases first so strategy overrides keyed by an alias land on the canonical name
        for (alias, canonical) in aliases {
            table.set_alias(alias, canonical);
        }
        for (name, strategy) in strategies {
            table.set_strategy(name, *strategy);
        }
        table
    }

    /// Canonical name for `name`, or `name` itself when it has no alias.
    pub fn normalize<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn strategy_for(&self, name: &str) -> MatchStrategy {
        self.strategies
            .get(self.normalize(name))
            .copied()
            .unwrap_or(MatchStrategy::Exact)
    }

    pub fn matches(&self, name: &str, expected: &str, actual: &str) -> bool {
        self.strategy_for(name).apply(expected, actual)
    }

    /// Register `strategy` for `name` (normalized first). Returns the previous
    /// strategy, if any.
    pub fn set_strategy(&mut self, name: &str, strategy: MatchStrategy) -> Option<MatchStrategy> {
        let canonical = self.normalize(name).to_string();
        self.strategies.insert(canonical, strategy)
    }

    pub fn set_alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    /// Whether `name` is an alias or has a registered strategy.
    pub fn is_known(&self, name: &str) -> bool {
        self.aliases.contains_key(name) || self.strategies.contains_key(name)
    }

    /// All aliases and canonical names, sorted.
    pub fn known_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .aliases
            .keys()
            .chain(self.strategies.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
