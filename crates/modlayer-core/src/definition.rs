//! The definition record and its value type

use crate::identity::{normalize_path, DefinitionKey};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Root directory of localisation files
pub const LOCALISATION_DIRECTORY: &str = "localisation";

/// Sub-directory whose localisation files replace instead of extend
pub const LOCALISATION_REPLACE_DIRECTORY: &str = "replace";

/// Kind of declaration a definition was parsed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// A regular block declaration
    #[default]
    Object,
    /// A scripted variable (`@name = value`)
    Variable,
    /// A namespace declaration
    Namespace,
    /// A file that can only be replaced as a whole
    WholeTextFile,
    /// An object whose whole file is overwritten by later overlays
    OverwrittenObject,
    /// Non-text content (images, sounds)
    Binary,
    /// The parser could not make sense of the content
    Invalid,
}

impl ValueType {
    /// Whether definitions of this kind can take part in a conflict group
    pub fn participates_in_conflicts(self) -> bool {
        !matches!(
            self,
            ValueType::Variable | ValueType::Namespace | ValueType::Invalid
        )
    }
}

fn default_true() -> bool {
    true
}

/// One named, typed fragment contributed by an overlay or by the base game
///
/// Definitions are produced by an external parser and treated as immutable
/// values. Derived definitions (merge output, patch output) are built as
/// new records with the builder methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Path of the source file inside its overlay
    pub file: String,
    /// Declaration category, e.g. `events` or `common/buildings`
    #[serde(rename = "type")]
    pub def_type: String,
    /// Identity within `def_type`
    pub id: String,
    /// Name of the contributing overlay
    pub mod_name: String,
    /// Full code of the declaration
    pub code: String,
    /// Inner body of a nested declaration, without the enclosing block
    #[serde(default)]
    pub original_code: String,
    /// Name of the enclosing block for nested declarations
    #[serde(default)]
    pub code_tag: Option<String>,
    /// Opening separator of the enclosing block, usually `{`
    #[serde(default)]
    pub code_separator: Option<String>,
    /// Content hash of the source file
    #[serde(default)]
    pub content_sha: String,
    #[serde(default)]
    pub value_type: ValueType,
    /// Top-level statement rather than nested inside another block
    #[serde(default = "default_true")]
    pub is_first_level: bool,
    #[serde(default)]
    pub is_from_game: bool,
    /// User-authored override that is never demoted
    #[serde(default)]
    pub is_custom_patch: bool,
    /// Overlays this definition's overlay explicitly depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the last overlay contributing this file still declares this key in it
    #[serde(default = "default_true")]
    pub exists_in_last_file: bool,
    #[serde(default)]
    pub custom_priority_order: i32,
    /// Source file before the definition was copied into a patch or merge
    #[serde(default)]
    pub original_file_name: Option<String>,
}

impl Definition {
    /// Create a first-level object definition
    pub fn new(
        file: impl Into<String>,
        def_type: impl Into<String>,
        id: impl Into<String>,
        mod_name: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        let code = code.into();
        Self {
            file: file.into(),
            def_type: def_type.into(),
            id: id.into(),
            mod_name: mod_name.into(),
            original_code: code.clone(),
            code,
            code_tag: None,
            code_separator: None,
            content_sha: String::new(),
            value_type: ValueType::Object,
            is_first_level: true,
            is_from_game: false,
            is_custom_patch: false,
            dependencies: Vec::new(),
            exists_in_last_file: true,
            custom_priority_order: 0,
            original_file_name: None,
        }
    }

    /// Mark this definition as nested inside the block `tag`
    ///
    /// `inner_body` is the declaration without the enclosing block; it is what
    /// nesting-aware merges concatenate.
    pub fn nested(
        mut self,
        tag: impl Into<String>,
        separator: impl Into<String>,
        inner_body: impl Into<String>,
    ) -> Self {
        self.is_first_level = false;
        self.code_tag = Some(tag.into());
        self.code_separator = Some(separator.into());
        self.original_code = inner_body.into();
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_content_sha(mut self, sha: impl Into<String>) -> Self {
        self.content_sha = sha.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_custom_priority_order(mut self, order: i32) -> Self {
        self.custom_priority_order = order;
        self
    }

    pub fn with_exists_in_last_file(mut self, exists: bool) -> Self {
        self.exists_in_last_file = exists;
        self
    }

    /// Mark this definition as sourced from the base game
    pub fn from_game(mut self) -> Self {
        self.is_from_game = true;
        self
    }

    /// Mark this definition as a user-authored custom patch
    pub fn custom_patch(mut self) -> Self {
        self.is_custom_patch = true;
        self
    }

    /// The `(type, id)` key this definition competes on
    pub fn key(&self) -> DefinitionKey {
        DefinitionKey::new(self.def_type.clone(), self.id.clone())
    }

    /// Case-insensitive lookup form of `file`
    pub fn file_key(&self) -> String {
        normalize_path(&self.file)
    }

    /// File name without directories
    pub fn file_name(&self) -> &str {
        self.file
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.file.as_str())
    }

    /// File name without directories or extension
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos > 0 => &name[..pos],
            _ => name,
        }
    }

    /// Directory part of `file`, empty for files at the overlay root
    pub fn parent_directory(&self) -> &str {
        match self.file.rfind(['/', '\\']) {
            Some(pos) => &self.file[..pos],
            None => "",
        }
    }

    /// File this definition was originally read from
    pub fn source_file(&self) -> &str {
        self.original_file_name.as_deref().unwrap_or(&self.file)
    }

    pub fn is_localisation(&self) -> bool {
        let key = self.file_key();
        key == LOCALISATION_DIRECTORY
            || key.starts_with(&format!("{}/", LOCALISATION_DIRECTORY))
    }

    /// Localisation file placed under a `replace` sub-directory
    pub fn is_localisation_replace(&self) -> bool {
        self.is_localisation()
            && self
                .file_key()
                .split('/')
                .any(|segment| segment == LOCALISATION_REPLACE_DIRECTORY)
    }

    /// Whether this definition declares a dependency on `mod_name`
    pub fn depends_on(&self, mod_name: &str) -> bool {
        self.dependencies.iter().any(|d| d == mod_name)
    }

    /// Check the identity fields are populated
    pub fn validate(&self) -> Result<()> {
        let missing = if self.file.trim().is_empty() {
            Some("file is empty")
        } else if self.def_type.trim().is_empty() {
            Some("type is empty")
        } else if self.id.trim().is_empty() {
            Some("id is empty")
        } else if self.mod_name.trim().is_empty() && !self.is_from_game {
            Some("overlay name is empty")
        } else {
            None
        };
        match missing {
            Some(reason) => Err(Error::InvalidDefinition {
                key: self.key().to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}
