//! Immutable, hash-indexed snapshot of definitions
//!
//! The index is built in one step from a sequence of definitions and answers
//! lookups by `(type, id)` and by file in O(1) amortized time. It never changes
//! after construction; the `with_*`/`without_*` methods build new snapshots.

use crate::definition::Definition;
use crate::identity::{normalize_path, DefinitionKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Definitions indexed by key and by file, in insertion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Definition>", into = "Vec<Definition>")]
pub struct IndexedDefinitions {
    definitions: Vec<Definition>,
    by_key: IndexMap<DefinitionKey, Vec<usize>>,
    by_file: IndexMap<String, Vec<usize>>,
}

impl IndexedDefinitions {
    /// Index every definition in `definitions`
    pub fn new<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = Definition>,
    {
        let definitions: Vec<Definition> = definitions.into_iter().collect();
        let mut by_key: IndexMap<DefinitionKey, Vec<usize>> = IndexMap::new();
        let mut by_file: IndexMap<String, Vec<usize>> = IndexMap::new();

        for (pos, def) in definitions.iter().enumerate() {
            by_key.entry(def.key()).or_default().push(pos);
            by_file.entry(def.file_key()).or_default().push(pos);
        }

        Self {
            definitions,
            by_key,
            by_file,
        }
    }

    /// All definitions sharing `key`
    pub fn get_by_key(&self, key: &DefinitionKey) -> Vec<&Definition> {
        self.resolve(self.by_key.get(key))
    }

    /// All definitions with the given type and id
    pub fn get_by_type_and_id(&self, def_type: &str, id: &str) -> Vec<&Definition> {
        self.get_by_key(&DefinitionKey::new(def_type, id))
    }

    /// All definitions declared in `file` (case-insensitive)
    pub fn get_by_file(&self, file: &str) -> Vec<&Definition> {
        self.resolve(self.by_file.get(&normalize_path(file)))
    }

    fn resolve(&self, positions: Option<&Vec<usize>>) -> Vec<&Definition> {
        positions
            .map(|p| p.iter().map(|&i| &self.definitions[i]).collect())
            .unwrap_or_default()
    }

    /// Distinct normalized file keys, in first-seen order
    pub fn file_keys(&self) -> impl Iterator<Item = &str> {
        self.by_file.keys().map(String::as_str)
    }

    /// Distinct `(type, id)` keys, in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &DefinitionKey> {
        self.by_key.keys()
    }

    pub fn contains_key(&self, key: &DefinitionKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Every definition, in insertion order
    pub fn get_all(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Definition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Whether any definition is sourced from the base game
    pub fn has_game_definitions(&self) -> bool {
        self.definitions.iter().any(|d| d.is_from_game)
    }

    /// Distinct contributing overlay names, in first-seen order
    pub fn mod_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for def in &self.definitions {
            if !names.contains(&def.mod_name.as_str()) {
                names.push(&def.mod_name);
            }
        }
        names
    }

    /// A new snapshot with `definition` appended
    pub fn with_definition(&self, definition: Definition) -> Self {
        self.with_definitions(std::iter::once(definition))
    }

    /// A new snapshot with `definitions` appended
    pub fn with_definitions<I>(&self, definitions: I) -> Self
    where
        I: IntoIterator<Item = Definition>,
    {
        Self::new(self.definitions.iter().cloned().chain(definitions))
    }

    /// A new snapshot without any definition sharing `key`
    pub fn without_key(&self, key: &DefinitionKey) -> Self {
        self.filtered(|d| d.def_type != key.def_type || d.id != key.id)
    }

    /// A new snapshot without definitions contributed by `mod_name`
    pub fn without_mod(&self, mod_name: &str) -> Self {
        self.filtered(|d| d.mod_name != mod_name)
    }

    /// A new snapshot holding only definitions that satisfy `keep`
    pub fn filtered<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&Definition) -> bool,
    {
        Self::new(self.definitions.iter().filter(|d| keep(d)).cloned())
    }

    pub fn into_vec(self) -> Vec<Definition> {
        self.definitions
    }
}

impl PartialEq for IndexedDefinitions {
    fn eq(&self, other: &Self) -> bool {
        self.definitions == other.definitions
    }
}

impl Eq for IndexedDefinitions {}

impl From<Vec<Definition>> for IndexedDefinitions {
    fn from(definitions: Vec<Definition>) -> Self {
        Self::new(definitions)
    }
}

impl From<IndexedDefinitions> for Vec<Definition> {
    fn from(index: IndexedDefinitions) -> Self {
        index.definitions
    }
}

impl FromIterator<Definition> for IndexedDefinitions {
    fn from_iter<I: IntoIterator<Item = Definition>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a IndexedDefinitions {
    type Item = &'a Definition;
    type IntoIter = std::slice::Iter<'a, Definition>;

    fn into_iter(self) -> Self::IntoIter {
        self.definitions.iter()
    }
}
