//! Engine configuration
//!
//! [`EngineConfig`] is plain data loaded from RON. Every field has a default,
//! so a config file only needs to name what it changes:
//!
//! ```
//! use modlayer_hub::EngineConfig;
//!
//! let config = EngineConfig::from_ron_str(r#"(game: "Stellaris")"#).unwrap();
//! assert_eq!(config.game, "Stellaris");
//! assert_eq!(config.merge_indent, 4);
//! ```

use crate::{Error, Result};
use modlayer_core::sanitize_file_name;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default prefix of a collection's synthetic patch overlay
pub const DEFAULT_PATCH_MOD_PREFIX: &str = "modlayer_patch_";

/// Default indentation used when wrapping merged nested bodies
pub const DEFAULT_MERGE_INDENT: usize = 4;

/// On-disk format of persisted patch state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateFormat {
    #[default]
    Ron,
    /// Requires the `serde_json` feature of the patch crate
    Json,
}

impl StateFormat {
    /// File extension used for this format
    pub fn extension(self) -> &'static str {
        match self {
            StateFormat::Ron => "ron",
            StateFormat::Json => "json",
        }
    }
}

/// Configuration shared by the detector, merge engine and patch service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Game whose definition-info provider is selected
    pub game: String,
    /// Prefix of the synthetic patch overlay name
    pub patch_mod_prefix: String,
    /// Spaces of indentation inside merged blocks
    pub merge_indent: usize,
    pub state_format: StateFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game: String::new(),
            patch_mod_prefix: DEFAULT_PATCH_MOD_PREFIX.to_string(),
            merge_indent: DEFAULT_MERGE_INDENT,
            state_format: StateFormat::Ron,
        }
    }
}

impl EngineConfig {
    /// Default configuration for `game`
    pub fn new(game: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            ..Default::default()
        }
    }

    pub fn with_patch_mod_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.patch_mod_prefix = prefix.into();
        self
    }

    pub fn with_merge_indent(mut self, indent: usize) -> Self {
        self.merge_indent = indent;
        self
    }

    pub fn with_state_format(mut self, format: StateFormat) -> Self {
        self.state_format = format;
        self
    }

    /// Parse and validate a RON document
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let config: Self = ron::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_ron_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.patch_mod_prefix.trim().is_empty() {
            return Err(Error::Config("patch_mod_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Name of the synthetic patch overlay for `collection`
    ///
    /// Characters that are not valid in file names are replaced by `_`.
    pub fn patch_mod_name(&self, collection: &str) -> String {
        sanitize_file_name(&format!("{}{}", self.patch_mod_prefix, collection.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.patch_mod_prefix, DEFAULT_PATCH_MOD_PREFIX);
        assert_eq!(config.merge_indent, 4);
        assert_eq!(config.state_format, StateFormat::Ron);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("HOI4")
            .with_patch_mod_prefix("patch_")
            .with_merge_indent(2)
            .with_state_format(StateFormat::Json);
        assert_eq!(config.game, "HOI4");
        assert_eq!(config.patch_mod_prefix, "patch_");
        assert_eq!(config.merge_indent, 2);
        assert_eq!(config.state_format.extension(), "json");
    }

    #[test]
    fn test_from_ron_str_full() {
        let config = EngineConfig::from_ron_str(
            r#"(
                game: "Stellaris",
                patch_mod_prefix: "irony_",
                merge_indent: 2,
                state_format: Json,
            )"#,
        )
        .unwrap();
        assert_eq!(config.game, "Stellaris");
        assert_eq!(config.patch_mod_prefix, "irony_");
        assert_eq!(config.merge_indent, 2);
        assert_eq!(config.state_format, StateFormat::Json);
    }

    #[test]
    fn test_from_ron_str_rejects_empty_prefix() {
        let result = EngineConfig::from_ron_str(r#"(patch_mod_prefix: "  ")"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_ron_str_rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_ron_str("not ron at all ("),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_patch_mod_name_sanitized() {
        let config = EngineConfig::default();
        assert_eq!(config.patch_mod_name("My Col"), "modlayer_patch_My Col");
        assert_eq!(config.patch_mod_name("a/b:c"), "modlayer_patch_a_b_c");
    }
}
