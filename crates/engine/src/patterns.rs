//! Include/exclude glob pattern sets
//!
//! Ignore and remove control files compile into a [`PatternSet`]. Patterns
//! support `*`, `?`, `[…]`, and `**` (zero or more path components);
//! `*` and `?` never cross a `/`. An exclude match always wins over any
//! include match.

use crate::error::{Error, Result};
use crate::system::System;
use glob::{MatchOptions, Pattern};
use std::collections::{BTreeMap, BTreeSet};

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// A set of include and exclude glob patterns
#[derive(Debug, Default)]
pub struct PatternSet {
    include: BTreeMap<String, Pattern>,
    exclude: BTreeMap<String, Pattern>,
}

impl PatternSet {
    /// Create an empty pattern set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern, validating it immediately
    ///
    /// # Errors
    ///
    /// Returns a parse error naming the offending pattern if it does not
    /// compile.
    pub fn add(&mut self, pattern: &str, include: bool) -> Result<()> {
        let compiled = Pattern::new(pattern).map_err(|e| Error::Parse {
            context: pattern.to_string(),
            message: e.to_string(),
        })?;
        if include {
            self.include.insert(pattern.to_string(), compiled);
        } else {
            self.exclude.insert(pattern.to_string(), compiled);
        }
        Ok(())
    }

    /// Check whether the set contains no patterns at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether `name` matches the set
    ///
    /// A name matches iff any include pattern matches and no exclude
    /// pattern matches; exclude wins.
    #[must_use]
    pub fn match_name(&self, name: &str) -> bool {
        let options = match_options();
        if self
            .exclude
            .values()
            .any(|p| p.matches_with(name, options))
        {
            return false;
        }
        self.include
            .values()
            .any(|p| p.matches_with(name, options))
    }

    /// Expand the set against a filesystem
    ///
    /// Returns the union of all include-pattern matches under `prefix`,
    /// minus exclude-pattern matches, with the prefix stripped,
    /// deduplicated, and lexicographically sorted.
    pub fn glob(&self, system: &dyn System, prefix: &str) -> Result<Vec<String>> {
        let options = match_options();
        let escaped_prefix = Pattern::escape(prefix);
        let mut all_matches = BTreeSet::new();
        for pattern in self.include.keys() {
            let matches = system.glob(&format!("{escaped_prefix}{pattern}"))?;
            all_matches.extend(matches);
        }
        let excludes = self
            .exclude
            .keys()
            .map(|pattern| {
                Pattern::new(&format!("{escaped_prefix}{pattern}")).map_err(|e| Error::Parse {
                    context: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(all_matches
            .into_iter()
            .filter(|m| !excludes.iter().any(|p| p.matches_with(m, options)))
            .filter_map(|m| m.strip_prefix(prefix).map(ToString::to_string))
            .collect())
    }
}
