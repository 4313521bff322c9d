//! Merging several overlays' contributions into one overlay
//!
//! For every file touched by the selected overlays' conflicts, the merge
//! engine picks one definition per key (resolved decision, then overwritten
//! winner, then priority winner) and writes them into a single synthesized
//! definition for the file. First-level declarations are concatenated
//! verbatim; nested ones are re-wrapped in their shared enclosing block.

use crate::conflict::ConflictResult;
use crate::config::DEFAULT_MERGE_INDENT;
use crate::priority::PriorityEvaluator;
use modlayer_core::{Definition, DefinitionKey, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A synthesized overlay produced by a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedMod {
    pub name: String,
    /// One definition per merged file, sorted by file
    pub definitions: Vec<Definition>,
}

impl MergedMod {
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// The merged definition for `file`, if any
    pub fn get(&self, file: &str) -> Option<&Definition> {
        let key = modlayer_core::normalize_path(file);
        self.definitions.iter().find(|d| d.file_key() == key)
    }
}

/// Closing separator for an opening one
pub fn closing_separator(separator: &str) -> Option<&'static str> {
    match separator.trim() {
        "{" => Some("}"),
        "[" => Some("]"),
        "(" => Some(")"),
        _ => None,
    }
}

/// Wrap `bodies` in a `tag = separator ... closing` block
///
/// Every body line is indented by `indent` spaces. Separators without a known
/// closing counterpart are emitted as `tag{separator}` with no closing line.
pub fn wrap_code<'a, I>(tag: &str, separator: &str, bodies: I, indent: usize) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let pad = " ".repeat(indent);
    let closing = closing_separator(separator);
    let mut out = match closing {
        Some(_) => format!("{} = {}\n", tag, separator.trim()),
        None => format!("{}{}\n", tag, separator),
    };
    for body in bodies {
        for line in body.lines() {
            out.push_str(&pad);
            out.push_str(line);
            out.push('\n');
        }
    }
    if let Some(close) = closing {
        out.push_str(close);
    }
    out
}

/// Combine the code of definitions sharing one file
///
/// First-level definitions are emitted verbatim, one per line. Nested ones
/// share a single enclosing block, placed where the first of them appears.
pub fn merge_code(definitions: &[&Definition], indent: usize) -> String {
    let Some(nested) = definitions.iter().find(|d| !d.is_first_level) else {
        return definitions
            .iter()
            .map(|d| d.code.as_str())
            .collect::<Vec<_>>()
            .join("\n");
    };
    let block = wrap_code(
        nested.code_tag.as_deref().unwrap_or_default(),
        nested.code_separator.as_deref().unwrap_or("{"),
        definitions
            .iter()
            .filter(|d| !d.is_first_level)
            .map(|d| d.original_code.as_str()),
        indent,
    );

    let mut parts: Vec<&str> = Vec::with_capacity(definitions.len());
    let mut block_placed = false;
    for def in definitions {
        if def.is_first_level {
            parts.push(def.code.as_str());
        } else if !block_placed {
            parts.push(block.as_str());
            block_placed = true;
        }
    }
    parts.join("\n")
}

/// Merges conflicting definitions of selected overlays
#[derive(Debug, Clone)]
pub struct MergeEngine {
    evaluator: PriorityEvaluator,
    indent: usize,
}

impl MergeEngine {
    pub fn new(evaluator: PriorityEvaluator) -> Self {
        Self {
            evaluator,
            indent: DEFAULT_MERGE_INDENT,
        }
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    /// Merge the conflicts contributed by `selected` into a new overlay
    ///
    /// Returns `None` when the selected overlays contribute nothing.
    pub fn merge_collection(
        &self,
        result: &ConflictResult,
        selected: &[String],
        new_name: &str,
    ) -> Option<MergedMod> {
        let mut by_file: BTreeMap<String, Vec<&Definition>> = BTreeMap::new();
        for def in result.all_conflicts.iter() {
            if !def.is_from_game && selected.iter().any(|s| *s == def.mod_name) {
                by_file.entry(def.file_key()).or_default().push(def);
            }
        }
        if by_file.is_empty() {
            tracing::debug!(new_name, "selected overlays contribute no conflicts");
            return None;
        }

        let mut definitions = Vec::with_capacity(by_file.len());
        for (file_key, mut members) in by_file {
            self.evaluator.sort_by_load_order(&mut members);
            let chosen = self.select(result, &members);
            let Some(first) = chosen.first().copied() else {
                continue;
            };

            let mut merged = if chosen.len() == 1 {
                first.clone()
            } else {
                let mut def = Definition::new(
                    first.file.clone(),
                    first.def_type.clone(),
                    file_key.clone(),
                    new_name,
                    merge_code(&chosen, self.indent),
                );
                def.value_type = ValueType::WholeTextFile;
                def
            };
            merged.mod_name = new_name.to_string();
            merged.original_file_name = Some(first.source_file().to_string());
            definitions.push(merged);
        }

        tracing::info!(new_name, files = definitions.len(), "merged collection");
        Some(MergedMod {
            name: new_name.to_string(),
            definitions,
        })
    }

    /// One definition per key, in order of first appearance
    fn select<'a>(&self, result: &'a ConflictResult, members: &[&'a Definition]) -> Vec<&'a Definition> {
        let mut keys: Vec<DefinitionKey> = Vec::new();
        let mut grouped: BTreeMap<DefinitionKey, Vec<&'a Definition>> = BTreeMap::new();
        for def in members {
            let key = def.key();
            if !grouped.contains_key(&key) {
                keys.push(key.clone());
            }
            grouped.entry(key).or_default().push(def);
        }

        keys.iter()
            .filter_map(|key| {
                result
                    .resolved_conflicts
                    .get_by_key(key)
                    .into_iter()
                    .next()
                    .or_else(|| result.overwritten_conflicts.get_by_key(key).into_iter().next())
                    .or_else(|| {
                        grouped
                            .get(key)
                            .and_then(|group| self.evaluator.eval(group.iter().copied()).definition)
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictDetector;
    use crate::provider::{DefinitionInfoProvider, PathRulesProvider};
    use modlayer_core::{IndexedDefinitions, PatchStateMode};
    use std::sync::Arc;

    fn order(mods: &[&str]) -> Vec<String> {
        mods.iter().map(|m| m.to_string()).collect()
    }

    fn engine(load_order: &[&str]) -> MergeEngine {
        let provider: Arc<dyn DefinitionInfoProvider> =
            Arc::new(PathRulesProvider::new("Stellaris", ["events"]));
        MergeEngine::new(PriorityEvaluator::new(Some(provider), load_order.iter().copied()))
    }

    fn detect(defs: Vec<Definition>, load_order: &[&str]) -> ConflictResult {
        let provider: Arc<dyn DefinitionInfoProvider> =
            Arc::new(PathRulesProvider::new("Stellaris", ["events"]));
        ConflictDetector::new(Some(provider)).find_conflicts(
            &IndexedDefinitions::new(defs),
            &order(load_order),
            PatchStateMode::Default,
        )
    }

    #[test]
    fn test_wrap_code() {
        assert_eq!(
            wrap_code("test", "{", ["test", "test2"], 4),
            "test = {\n    test\n    test2\n}"
        );
        assert_eq!(wrap_code("tag", "=", ["a\nb"], 2), "tag=\n  a\n  b\n");
    }

    #[test]
    fn test_merge_code_first_level() {
        let a = Definition::new("common/f.txt", "common", "test", "m1", "test = {test}");
        let b = Definition::new("common/f.txt", "common", "test2", "m2", "test = {test2}");
        assert_eq!(merge_code(&[&a, &b], 4), "test = {test}\ntest = {test2}");
    }

    #[test]
    fn test_merge_code_nested() {
        let a = Definition::new("common/f.txt", "common", "a", "m1", "test = { test }")
            .nested("test", "{", "test");
        let b = Definition::new("common/f.txt", "common", "b", "m2", "test = { test2 }")
            .nested("test", "{", "test2");
        assert_eq!(merge_code(&[&a, &b], 4), "test = {\n    test\n    test2\n}");
    }

    #[test]
    fn test_merge_code_mixed_levels() {
        let top = Definition::new("common/f.txt", "common", "top", "m1", "top = { 1 }");
        let a = Definition::new("common/f.txt", "common", "a", "m1", "test = { test }")
            .nested("test", "{", "test");
        let b = Definition::new("common/f.txt", "common", "b", "m2", "test = { test2 }")
            .nested("test", "{", "test2");
        let tail = Definition::new("common/f.txt", "common", "tail", "m2", "tail = { 2 }");
        assert_eq!(
            merge_code(&[&top, &a, &tail, &b], 4),
            "top = { 1 }\ntest = {\n    test\n    test2\n}\ntail = { 2 }"
        );
    }

    #[test]
    fn test_merge_collection_requires_contribution() {
        let result = detect(
            vec![
                Definition::new("common/f.txt", "common", "a", "m1", "a = { 1 }"),
                Definition::new("common/f.txt", "common", "a", "m2", "a = { 2 }"),
            ],
            &["m1", "m2"],
        );
        let merged = engine(&["m1", "m2"]).merge_collection(&result, &order(&["other"]), "merged");
        assert!(merged.is_none());
    }

    #[test]
    fn test_merge_collection_with_orphan_concatenates() {
        let result = detect(
            vec![
                Definition::new("common/f.txt", "common", "a", "m1", "a = { 1 }"),
                Definition::new("common/f.txt", "common", "a", "m2", "a = { 2 }"),
                Definition::new("common/f.txt", "common", "c", "m1", "c = { 3 }"),
            ],
            &["m1", "m2"],
        );
        let merged = engine(&["m1", "m2"])
            .merge_collection(&result, &order(&["m1", "m2"]), "merged")
            .unwrap();

        assert_eq!(merged.name, "merged");
        assert_eq!(merged.len(), 1);
        let file = merged.get("common/f.txt").unwrap();
        assert_eq!(file.mod_name, "merged");
        // LIOS winner for "a", then the orphan "c"
        assert_eq!(file.code, "a = { 2 }\nc = { 3 }");
    }

    #[test]
    fn test_resolved_decision_takes_precedence() {
        let mut result = detect(
            vec![
                Definition::new("common/f.txt", "common", "a", "m1", "a = { 1 }"),
                Definition::new("common/f.txt", "common", "a", "m2", "a = { 2 }"),
            ],
            &["m1", "m2"],
        );
        result.resolved_conflicts = IndexedDefinitions::new(vec![Definition::new(
            "common/f.txt",
            "common",
            "a",
            "patch",
            "a = { resolved }",
        )]);
        let merged = engine(&["m1", "m2"])
            .merge_collection(&result, &order(&["m1", "m2"]), "merged")
            .unwrap();
        let file = merged.get("common/f.txt").unwrap();
        assert_eq!(file.code, "a = { resolved }");
        assert_eq!(file.mod_name, "merged");
    }

    #[test]
    fn test_overwritten_used_when_unresolved() {
        let mut result = detect(
            vec![
                Definition::new("common/f.txt", "common", "a", "m1", "a = { 1 }"),
                Definition::new("common/f.txt", "common", "a", "m2", "a = { 2 }"),
                Definition::new("common/f.txt", "common", "b", "m2", "b = { 2 }"),
            ],
            &["m1", "m2"],
        );
        result.overwritten_conflicts = IndexedDefinitions::new(vec![Definition::new(
            "common/f.txt",
            "common",
            "a",
            "m1",
            "a = { overwritten }",
        )]);
        let merged = engine(&["m1", "m2"])
            .merge_collection(&result, &order(&["m1", "m2"]), "merged")
            .unwrap();
        assert_eq!(
            merged.get("common/f.txt").unwrap().code,
            "a = { overwritten }\nb = { 2 }"
        );
    }

    #[test]
    fn test_merge_only_selected_overlays() {
        let result = detect(
            vec![
                Definition::new("common/f.txt", "common", "a", "m1", "a = { 1 }"),
                Definition::new("common/f.txt", "common", "a", "m2", "a = { 2 }"),
                Definition::new("common/f.txt", "common", "a", "m3", "a = { 3 }"),
            ],
            &["m1", "m2", "m3"],
        );
        let merged = engine(&["m1", "m2", "m3"])
            .merge_collection(&result, &order(&["m1", "m2"]), "merged")
            .unwrap();
        assert_eq!(merged.get("common/f.txt").unwrap().code, "a = { 2 }");
    }
}
