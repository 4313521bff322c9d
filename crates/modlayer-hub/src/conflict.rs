//! Conflict detection over an indexed definition set
//!
//! Two or more definitions sharing a `(type, id)` key, contributed by more than
//! one source, compete for the same logical entity. The detector groups the
//! eligible definitions of an [`IndexedDefinitions`] snapshot and sorts each
//! group into one of:
//!
//! - **conflicts**: groups that still need a decision
//! - **orphan conflicts**: definitions that share a file with a conflict but
//!   declare something nobody else declares
//! - nothing, when the group is explained by dependency declarations
//!
//! # Algorithm
//!
//! Detection is O(n log n) in the number of definitions; every contested file
//! is scanned once:
//! 1. Drop ineligible definitions (variables, namespaces, invalid content, and
//!    base game or localisation files when the mode excludes them)
//! 2. Group by key; a group with several definitions from several sources is a candidate
//! 3. Unless the mode shows overrides, drop sources another member depends on;
//!    fewer than two remaining sources means the group is an intentional override
//! 4. Stamp `exists_in_last_file` on the surviving members
//! 5. Scan every contested file for orphans
//!
//! Grouping uses ordered maps and canonical member ordering, so the same
//! definitions, load order and mode always yield identical results, however
//! the input was ordered.

use crate::ignore::IgnoreDirective;
use crate::priority::PriorityEvaluator;
use crate::provider::DefinitionInfoProvider;
use crate::Result;
use modlayer_core::{
    Definition, DefinitionKey, IndexedDefinitions, PatchStateMode, ValueType,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Output of a detection pass plus the decisions recorded against it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictResult {
    pub mode: PatchStateMode,
    /// Overlay order the result was computed against
    pub load_order: Vec<String>,
    /// Union of `conflicts` and `orphan_conflicts`
    pub all_conflicts: IndexedDefinitions,
    pub conflicts: IndexedDefinitions,
    pub orphan_conflicts: IndexedDefinitions,
    pub resolved_conflicts: IndexedDefinitions,
    pub ignored_conflicts: IndexedDefinitions,
    pub custom_conflicts: IndexedDefinitions,
    /// Winners of whole-file overwrite groups, with their source file recorded
    pub overwritten_conflicts: IndexedDefinitions,
    /// Conflicts hidden by the ignore directive
    pub rule_ignored_conflicts: IndexedDefinitions,
    pub ignored_paths: IgnoreDirective,
}

impl ConflictResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Distinct conflicting keys, sorted
    pub fn conflict_keys(&self) -> Vec<DefinitionKey> {
        let keys: BTreeSet<DefinitionKey> = self.conflicts.keys().cloned().collect();
        keys.into_iter().collect()
    }

    /// Distinct normalized files holding a conflict, sorted
    pub fn contested_files(&self) -> Vec<String> {
        let files: BTreeSet<String> = self.conflicts.file_keys().map(str::to_string).collect();
        files.into_iter().collect()
    }

    /// Whether a decision (resolve, ignore or custom patch) exists for `key`
    pub fn is_dispositioned(&self, key: &DefinitionKey) -> bool {
        self.resolved_conflicts.contains_key(key)
            || self.ignored_conflicts.contains_key(key)
            || self.custom_conflicts.contains_key(key)
    }

    /// Members of the conflict group for `key` that still await a decision
    pub fn unresolved_members(&self, key: &DefinitionKey) -> Vec<&Definition> {
        if self.is_dispositioned(key) {
            return Vec::new();
        }
        self.conflicts.get_by_key(key)
    }

    /// Keys that still await a decision, sorted
    pub fn unresolved_keys(&self) -> Vec<DefinitionKey> {
        self.conflict_keys()
            .into_iter()
            .filter(|k| !self.is_dispositioned(k))
            .collect()
    }

    /// Recompute `rule_ignored_conflicts` from `ignored_paths`
    pub fn apply_ignore_rules(&mut self, collection_mods: &[String]) -> Result<()> {
        self.rule_ignored_conflicts = self
            .ignored_paths
            .rule_ignored_conflicts(&self.conflicts, collection_mods)?;
        Ok(())
    }
}

impl fmt::Display for ConflictResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conflicting keys in {} files, {} orphans, {} resolved, {} ignored, {} custom",
            self.conflict_keys().len(),
            self.contested_files().len(),
            self.orphan_conflicts.len(),
            self.resolved_conflicts.keys().count(),
            self.ignored_conflicts.keys().count(),
            self.custom_conflicts.keys().count(),
        )
    }
}

/// Finds conflicts among indexed definitions
#[derive(Clone, Default)]
pub struct ConflictDetector {
    provider: Option<Arc<dyn DefinitionInfoProvider>>,
}

impl ConflictDetector {
    pub fn new(provider: Option<Arc<dyn DefinitionInfoProvider>>) -> Self {
        Self { provider }
    }

    /// Priority evaluator sharing this detector's provider
    pub fn evaluator<I, S>(&self, load_order: I) -> PriorityEvaluator
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PriorityEvaluator::new(self.provider.clone(), load_order)
    }

    /// Whether `definition` may enter grouping under `mode`
    pub fn is_eligible(definition: &Definition, mode: PatchStateMode) -> bool {
        definition.value_type.participates_in_conflicts()
            && (!definition.is_from_game || mode.includes_game_definitions())
            && (!definition.is_localisation() || !mode.excludes_localisation())
    }

    /// Classify `index` into conflicts, orphans and overwritten winners
    pub fn find_conflicts(
        &self,
        index: &IndexedDefinitions,
        load_order: &[String],
        mode: PatchStateMode,
    ) -> ConflictResult {
        let evaluator = self.evaluator(load_order.iter().cloned());

        let mut groups: BTreeMap<DefinitionKey, Vec<&Definition>> = BTreeMap::new();
        for def in index.iter().filter(|d| Self::is_eligible(d, mode)) {
            groups.entry(def.key()).or_default().push(def);
        }

        // keys declared by the last contributor of each file, computed once per file
        let mut last_in_file: HashMap<String, Option<HashSet<DefinitionKey>>> = HashMap::new();
        let mut conflicts: Vec<Definition> = Vec::new();
        let mut overwritten: Vec<Definition> = Vec::new();
        let mut suppressed = 0usize;

        for (key, mut members) in groups {
            if members.len() < 2 || distinct_sources(&members).len() < 2 {
                continue;
            }
            evaluator.sort_by_load_order(&mut members);

            if mode.suppresses_overrides() {
                match without_overridden(&members) {
                    Some(remaining) => members = remaining,
                    None => {
                        suppressed += 1;
                        tracing::debug!(%key, "override chain, not a conflict");
                        continue;
                    }
                }
            }

            let stamped: Vec<Definition> = members
                .iter()
                .map(|def| {
                    let exists = match last_in_file
                        .entry(def.file_key())
                        .or_insert_with(|| last_contributor_keys(index, &evaluator, &def.file))
                    {
                        Some(keys) => keys.contains(&key),
                        None => true,
                    };
                    let mut copy = (*def).clone();
                    copy.exists_in_last_file = exists;
                    copy
                })
                .collect();

            if stamped
                .iter()
                .all(|d| d.value_type == ValueType::OverwrittenObject)
            {
                if let Some(winner) = evaluator.eval(stamped.iter()).definition {
                    let mut copy = winner.clone();
                    copy.original_file_name = Some(winner.file.clone());
                    overwritten.push(copy);
                }
            }
            conflicts.extend(stamped);
        }

        let orphans = find_orphans(index, &conflicts, mode);
        let all: Vec<Definition> = conflicts.iter().chain(orphans.iter()).cloned().collect();

        let result = ConflictResult {
            mode,
            load_order: load_order.to_vec(),
            all_conflicts: IndexedDefinitions::new(all),
            conflicts: IndexedDefinitions::new(conflicts),
            orphan_conflicts: IndexedDefinitions::new(orphans),
            overwritten_conflicts: IndexedDefinitions::new(overwritten),
            ..Default::default()
        };
        tracing::info!(
            definitions = index.len(),
            conflicts = result.conflicts.len(),
            orphans = result.orphan_conflicts.len(),
            suppressed,
            %mode,
            "conflict detection finished"
        );
        result
    }
}

impl fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictDetector")
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

/// Source label: the overlay name, or empty for the base game
fn source_name(def: &Definition) -> &str {
    if def.is_from_game {
        ""
    } else {
        def.mod_name.as_str()
    }
}

fn distinct_sources<'a>(members: &[&'a Definition]) -> BTreeSet<&'a str> {
    members.iter().map(|d| source_name(d)).collect()
}

/// Remove members whose overlay another member depends on
///
/// Returns `None` when fewer than two sources remain.
fn without_overridden<'a>(members: &[&'a Definition]) -> Option<Vec<&'a Definition>> {
    let overridden: BTreeSet<&str> = members
        .iter()
        .filter(|target| {
            !target.is_from_game
                && members.iter().any(|d| {
                    !d.is_custom_patch
                        && d.mod_name != target.mod_name
                        && d.depends_on(&target.mod_name)
                })
        })
        .map(|d| d.mod_name.as_str())
        .collect();

    let remaining: Vec<&'a Definition> = members
        .iter()
        .copied()
        .filter(|d| d.is_from_game || !overridden.contains(d.mod_name.as_str()))
        .collect();
    if distinct_sources(&remaining).len() < 2 {
        None
    } else {
        Some(remaining)
    }
}

/// Keys declared in `file` by the last source in load order contributing to it
fn last_contributor_keys(
    index: &IndexedDefinitions,
    evaluator: &PriorityEvaluator,
    file: &str,
) -> Option<HashSet<DefinitionKey>> {
    let mut contributors = index.get_by_file(file);
    evaluator.sort_by_load_order(&mut contributors);
    let last = source_name(contributors.last()?);
    Some(
        contributors
            .iter()
            .filter(|d| source_name(d) == last)
            .map(|d| d.key())
            .collect(),
    )
}

fn find_orphans(
    index: &IndexedDefinitions,
    conflicts: &[Definition],
    mode: PatchStateMode,
) -> Vec<Definition> {
    let mut contested: BTreeMap<String, BTreeSet<DefinitionKey>> = BTreeMap::new();
    for def in conflicts {
        contested.entry(def.file_key()).or_default().insert(def.key());
    }

    let mut orphans = Vec::new();
    for (file, keys) in &contested {
        let mut candidates: Vec<&Definition> = index
            .get_by_file(file)
            .into_iter()
            .filter(|d| ConflictDetector::is_eligible(d, mode) && !keys.contains(&d.key()))
            .collect();
        candidates.sort_by(|a, b| {
            a.def_type
                .cmp(&b.def_type)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.mod_name.cmp(&b.mod_name))
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.content_sha.cmp(&b.content_sha))
        });
        orphans.extend(candidates.into_iter().cloned());
    }
    orphans
}
