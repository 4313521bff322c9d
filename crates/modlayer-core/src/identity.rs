//! Identity types for definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// The `(type, id)` pair definitions compete on
///
/// Two definitions with the same key describe the same logical entity, no
/// matter which file or overlay they come from. Ordering is by type, then id,
/// which gives detection passes a canonical iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DefinitionKey {
    pub def_type: String,
    pub id: String,
}

impl DefinitionKey {
    /// Create a new definition key
    pub fn new(def_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            def_type: def_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.def_type, self.id)
    }
}

impl<T: Into<String>, I: Into<String>> From<(T, I)> for DefinitionKey {
    fn from((def_type, id): (T, I)) -> Self {
        Self::new(def_type, id)
    }
}

/// Normalize a file path into its case-insensitive lookup form
///
/// Backslashes become forward slashes, leading separators are dropped and the
/// result is lower-cased.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .to_lowercase()
}

/// Replace characters that are not valid in file names with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
