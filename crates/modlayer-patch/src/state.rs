//! Persisted patch state of a collection
//!
//! A [`PatchState`] is what survives between sessions: the decisions recorded
//! against a collection's conflicts, the conflict history those decisions were
//! made against, and the load order and mode of that computation.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use modlayer_core::{Definition, DefinitionKey, IndexedDefinitions, PatchStateMode};
use modlayer_hub::hash::{hash_sequence, DEFAULT_SEED};
use modlayer_hub::{ConflictResult, IgnoreDirective, StateFormat};
use serde::{Deserialize, Serialize};

/// Decisions and history for one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchState {
    pub mode: PatchStateMode,
    pub load_order: Vec<String>,
    /// Ignore directive in its newline-delimited form
    pub ignore_conflict_paths: String,
    pub has_game_definitions: bool,
    pub conflicts: IndexedDefinitions,
    pub orphan_conflicts: IndexedDefinitions,
    pub resolved_conflicts: IndexedDefinitions,
    pub ignored_conflicts: IndexedDefinitions,
    pub custom_conflicts: IndexedDefinitions,
    pub overwritten_conflicts: IndexedDefinitions,
    /// Conflicting definitions exactly as last seen
    pub conflict_history: IndexedDefinitions,
    pub saved_at: Option<DateTime<Utc>>,
}

impl PatchState {
    /// Snapshot `result` with the given history, stamped with the current time
    pub fn from_result(result: &ConflictResult, conflict_history: IndexedDefinitions) -> Self {
        Self {
            mode: result.mode,
            load_order: result.load_order.clone(),
            ignore_conflict_paths: result.ignored_paths.to_string(),
            has_game_definitions: result.all_conflicts.has_game_definitions(),
            conflicts: result.conflicts.clone(),
            orphan_conflicts: result.orphan_conflicts.clone(),
            resolved_conflicts: result.resolved_conflicts.clone(),
            ignored_conflicts: result.ignored_conflicts.clone(),
            custom_conflicts: result.custom_conflicts.clone(),
            overwritten_conflicts: result.overwritten_conflicts.clone(),
            conflict_history,
            saved_at: Some(Utc::now()),
        }
    }

    /// Parsed ignore directive
    pub fn ignore_directive(&self) -> IgnoreDirective {
        IgnoreDirective::parse(&self.ignore_conflict_paths)
    }

    /// History entry for the same key, file and overlay as `definition`
    pub fn history_entry(&self, definition: &Definition) -> Option<&Definition> {
        let file = definition.file_key();
        self.conflict_history
            .get_by_key(&definition.key())
            .into_iter()
            .find(|h| h.file_key() == file && h.mod_name == definition.mod_name)
    }

    /// Whether the conflicting members for `key` differ from the history
    ///
    /// Members are compared as sets of `(overlay, file, code)`.
    pub fn is_stale(&self, key: &DefinitionKey, current: &[&Definition]) -> bool {
        let fingerprint = |defs: &[&Definition]| {
            let mut entries: Vec<(String, String, String)> = defs
                .iter()
                .map(|d| (d.mod_name.clone(), d.file_key(), d.code.clone()))
                .collect();
            entries.sort();
            entries.dedup();
            entries
        };
        let history = self.conflict_history.get_by_key(key);
        fingerprint(&history) != fingerprint(current)
    }

    /// Deterministic fingerprint of what a needs-update check depends on
    pub fn fingerprint(&self) -> u64 {
        let saved = self
            .saved_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let files = self
            .conflicts
            .iter()
            .chain(self.overwritten_conflicts.iter())
            .chain(self.orphan_conflicts.iter())
            .flat_map(|d| [d.mod_name.as_str(), d.source_file(), d.content_sha.as_str()]);
        hash_sequence(std::iter::once(saved.as_str()).chain(files), DEFAULT_SEED)
    }

    /// Serialize in `format`
    pub fn to_string_as(&self, format: StateFormat) -> Result<String> {
        match format {
            StateFormat::Ron => self.to_ron(),
            StateFormat::Json => self.to_json(),
        }
    }

    /// Deserialize from `format`
    pub fn from_str_as(text: &str, format: StateFormat) -> Result<Self> {
        match format {
            StateFormat::Ron => Self::from_ron(text),
            StateFormat::Json => Self::from_json(text),
        }
    }

    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
    }

    #[cfg(feature = "serde_json")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    #[cfg(not(feature = "serde_json"))]
    pub fn to_json(&self) -> Result<String> {
        Err(Error::UnsupportedFormat(
            "JSON state requires the 'serde_json' feature".to_string(),
        ))
    }

    #[cfg(feature = "serde_json")]
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
    }

    #[cfg(not(feature = "serde_json"))]
    pub fn from_json(_text: &str) -> Result<Self> {
        Err(Error::UnsupportedFormat(
            "JSON state requires the 'serde_json' feature".to_string(),
        ))
    }
}
