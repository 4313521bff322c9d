//! Ignore directive: which conflicts are hidden from review
//!
//! The directive is persisted as a newline-delimited string:
//!
//! ```text
//! # comment
//! events/my_events.txt      <- ignore rule (prefix)
//! common/*/zzz_*.txt        <- ignore rule (wildcard)
//! !events/keep.txt          <- include rule, wins over ignore rules
//! --showGameMods
//! --showSelfConflicts
//! modName:Some Overlay
//! ```
//!
//! Inside the engine it is a plain struct; the string form only exists at the
//! persistence boundary ([`IgnoreDirective::parse`] and `Display`).

use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use modlayer_core::{normalize_path, DefinitionKey, IndexedDefinitions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Line prefix naming an ignored overlay
pub const MOD_NAME_PREFIX: &str = "modName:";

/// Token that shows conflicts between a single overlay and the base game
pub const SHOW_GAME_MODS: &str = "--showGameMods";

/// Token that shows conflicts an overlay has with itself
pub const SHOW_SELF_CONFLICTS: &str = "--showSelfConflicts";

/// A path rule line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub pattern: String,
    /// `!`-prefixed rules re-include paths an ignore rule matched
    pub include: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Entry {
    Comment(String),
    Rule(PathRule),
}

/// Parsed ignore directive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreDirective {
    show_game_mods: bool,
    show_self_conflicts: bool,
    ignored_mods: Vec<String>,
    entries: Vec<Entry>,
}

impl IgnoreDirective {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the newline-delimited directive string
    pub fn parse(text: &str) -> Self {
        let mut directive = Self::default();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix(MOD_NAME_PREFIX) {
                directive.push_ignored_mod(name.trim());
            } else if line == SHOW_GAME_MODS {
                directive.show_game_mods = true;
            } else if line == SHOW_SELF_CONFLICTS {
                directive.show_self_conflicts = true;
            } else if line.starts_with('#') {
                directive.entries.push(Entry::Comment(line.to_string()));
            } else if let Some(pattern) = line.strip_prefix('!') {
                directive.entries.push(Entry::Rule(PathRule {
                    pattern: pattern.trim().to_string(),
                    include: true,
                }));
            } else {
                directive.entries.push(Entry::Rule(PathRule {
                    pattern: line.to_string(),
                    include: false,
                }));
            }
        }
        directive
    }

    fn push_ignored_mod(&mut self, name: &str) {
        if !name.is_empty() && !self.ignored_mods.iter().any(|m| m == name) {
            self.ignored_mods.push(name.to_string());
        }
    }

    /// Whether the directive has no content at all
    pub fn is_empty(&self) -> bool {
        !self.show_game_mods
            && !self.show_self_conflicts
            && self.ignored_mods.is_empty()
            && self.entries.is_empty()
    }

    /// Replace the ignored overlay list with `mods`
    pub fn add_mods_to_ignore_list<I, S>(&mut self, mods: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignored_mods.clear();
        for name in mods {
            self.push_ignored_mod(name.as_ref().trim());
        }
    }

    /// Ignored overlay names, in insertion order
    pub fn ignored_mods(&self) -> &[String] {
        &self.ignored_mods
    }

    pub fn should_ignore_game_mods(&self) -> bool {
        !self.show_game_mods
    }

    pub fn should_show_self_conflicts(&self) -> bool {
        self.show_self_conflicts
    }

    /// Flip game-mod hiding; returns the new `should_ignore_game_mods` value
    pub fn toggle_ignore_game_mods(&mut self) -> bool {
        self.show_game_mods = !self.show_game_mods;
        self.should_ignore_game_mods()
    }

    /// Flip self-conflict display; returns the new `should_show_self_conflicts` value
    pub fn toggle_self_mod_conflicts(&mut self) -> bool {
        self.show_self_conflicts = !self.show_self_conflicts;
        self.should_show_self_conflicts()
    }

    /// Path rules in declaration order
    pub fn path_rules(&self) -> impl Iterator<Item = &PathRule> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Rule(rule) => Some(rule),
            Entry::Comment(_) => None,
        })
    }

    /// Append a path rule
    pub fn add_path_rule(&mut self, pattern: impl Into<String>, include: bool) {
        self.entries.push(Entry::Rule(PathRule {
            pattern: pattern.into(),
            include,
        }));
    }

    /// Compile the path rules for matching
    pub fn matcher(&self) -> Result<PathMatcher> {
        let mut ignore = RuleSet::default();
        let mut include = RuleSet::default();
        for rule in self.path_rules() {
            let target = if rule.include { &mut include } else { &mut ignore };
            target.add(&rule.pattern)?;
        }
        Ok(PathMatcher {
            ignore: ignore.build()?,
            include: include.build()?,
        })
    }

    /// Compute the conflicts hidden by this directive
    ///
    /// A key is hidden when none of its overlays is an allowed member of
    /// `collection_mods`, when its files match an ignore rule and no include
    /// rule, when it only pits one overlay against the base game while game
    /// mods are hidden, or when it is a self-conflict while those are hidden.
    pub fn rule_ignored_conflicts(
        &self,
        conflicts: &IndexedDefinitions,
        collection_mods: &[String],
    ) -> Result<IndexedDefinitions> {
        let mut groups: BTreeMap<DefinitionKey, Vec<&modlayer_core::Definition>> = BTreeMap::new();
        for def in conflicts.iter() {
            groups.entry(def.key()).or_default().push(def);
        }

        let matcher = self.matcher()?;
        let allowed: Vec<&str> = collection_mods
            .iter()
            .map(String::as_str)
            .filter(|m| !self.ignored_mods.iter().any(|i| i == m))
            .collect();

        let mut hidden = Vec::new();
        for members in groups.values() {
            let overlays: Vec<&str> = {
                let mut names: Vec<&str> = members
                    .iter()
                    .filter(|d| !d.is_from_game)
                    .map(|d| d.mod_name.as_str())
                    .collect();
                names.sort_unstable();
                names.dedup();
                names
            };
            let non_game = members.iter().filter(|d| !d.is_from_game).count();

            let by_rules = !self.is_empty()
                && (!overlays.iter().any(|m| allowed.contains(m))
                    || members.iter().any(|d| matcher.is_ignored(&d.file)));
            let by_toggles = overlays.len() <= 1
                && ((self.should_ignore_game_mods() && non_game <= 1)
                    || (!self.should_show_self_conflicts() && non_game > 1));

            if by_rules || by_toggles {
                hidden.push(members[0].clone());
            }
        }
        Ok(IndexedDefinitions::new(hidden))
    }
}

impl fmt::Display for IgnoreDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = Vec::new();
        for entry in &self.entries {
            match entry {
                Entry::Comment(text) => lines.push(text.clone()),
                Entry::Rule(rule) if rule.include => lines.push(format!("!{}", rule.pattern)),
                Entry::Rule(rule) => lines.push(rule.pattern.clone()),
            }
        }
        if self.show_game_mods {
            lines.push(SHOW_GAME_MODS.to_string());
        }
        if self.show_self_conflicts {
            lines.push(SHOW_SELF_CONFLICTS.to_string());
        }
        for name in &self.ignored_mods {
            lines.push(format!("{}{}", MOD_NAME_PREFIX, name));
        }
        write!(f, "{}", lines.join("\n"))
    }
}

struct RuleSet {
    globs: GlobSetBuilder,
    prefixes: Vec<String>,
    has_globs: bool,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            globs: GlobSetBuilder::new(),
            prefixes: Vec::new(),
            has_globs: false,
        }
    }
}

impl RuleSet {
    fn add(&mut self, pattern: &str) -> Result<()> {
        let normalized = normalize_path(pattern);
        if normalized.contains(['*', '?']) {
            let glob = GlobBuilder::new(&normalized)
                .case_insensitive(true)
                .literal_separator(false)
                .build()
                .map_err(|e| Error::InvalidIgnoreRule {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            self.globs.add(glob);
            self.has_globs = true;
        } else if !normalized.is_empty() {
            self.prefixes.push(normalized);
        }
        Ok(())
    }

    fn build(self) -> Result<CompiledRules> {
        let globs = if self.has_globs {
            Some(self.globs.build().map_err(|e| Error::InvalidIgnoreRule {
                pattern: String::new(),
                reason: e.to_string(),
            })?)
        } else {
            None
        };
        Ok(CompiledRules {
            globs,
            prefixes: self.prefixes,
        })
    }
}

struct CompiledRules {
    globs: Option<GlobSet>,
    prefixes: Vec<String>,
}

impl CompiledRules {
    fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.globs.as_ref().is_some_and(|g| g.is_match(path))
    }
}

/// Compiled path rules of a directive
pub struct PathMatcher {
    ignore: CompiledRules,
    include: CompiledRules,
}

impl PathMatcher {
    /// Whether `file` matches an ignore rule and no include rule
    pub fn is_ignored(&self, file: &str) -> bool {
        let path = normalize_path(file);
        self.ignore.matches(&path) && !self.include.matches(&path)
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMatcher")
            .field("ignore_prefixes", &self.ignore.prefixes)
            .field("include_prefixes", &self.include.prefixes)
            .finish()
    }
}
