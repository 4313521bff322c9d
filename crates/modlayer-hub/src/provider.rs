//! Definition-info providers
//!
//! A provider carries the per-game knowledge the engine cannot derive from the
//! definitions themselves: which directories use "first in, only served"
//! precedence, and where a synthetic patch should write a definition.
//!
//! Providers are registered once in a [`ProviderRegistry`]; the registry picks
//! the provider for a game when a service is built, never per definition.

use modlayer_core::{
    normalize_path, sanitize_file_name, Definition, ValueType, LOCALISATION_DIRECTORY,
    LOCALISATION_REPLACE_DIRECTORY,
};
use std::sync::Arc;

/// File name prefix that sorts a patch file first in its directory
pub const FIOS_PREFIX: &str = "!!!_";

/// File name prefix that sorts a patch file last in its directory
pub const LIOS_PREFIX: &str = "zzz_";

/// Per-game rules consulted by the priority evaluator and the patch writer
pub trait DefinitionInfoProvider: Send + Sync {
    /// Whether this provider handles `game`
    fn can_process(&self, game: &str) -> bool;

    /// Whether the definition's directory resolves duplicates by first occurrence
    fn definition_uses_fios_rules(&self, definition: &Definition) -> bool;

    /// Path a patch overlay should write `definition` to
    ///
    /// FIOS directories get a [`FIOS_PREFIX`] file, localisation goes under a
    /// `replace` sub-directory, everything else gets a [`LIOS_PREFIX`] file.
    fn patch_file_name(&self, definition: &Definition) -> String {
        let file_name = if definition.value_type == ValueType::WholeTextFile {
            definition.file_name().to_string()
        } else {
            let ext = match definition.file_name().rfind('.') {
                Some(pos) if pos > 0 => &definition.file_name()[pos..],
                _ => "",
            };
            format!("{}{}", definition.id, ext)
        };
        let file_name = sanitize_file_name(&file_name);
        let parent = definition.parent_directory().replace('\\', "/");

        if self.definition_uses_fios_rules(definition) {
            join(&parent, &format!("{}{}", FIOS_PREFIX, file_name))
        } else if definition.is_localisation() {
            let replaced = normalize_path(&parent)
                .split('/')
                .any(|s| s == LOCALISATION_REPLACE_DIRECTORY);
            if replaced {
                join(&parent, &file_name)
            } else {
                join(&join(&parent, LOCALISATION_REPLACE_DIRECTORY), &file_name)
            }
        } else {
            join(&parent, &format!("{}{}", LIOS_PREFIX, file_name))
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Provider configured with a game name and a list of FIOS directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRulesProvider {
    game: String,
    fios_paths: Vec<String>,
}

impl PathRulesProvider {
    pub fn new<I, S>(game: impl Into<String>, fios_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            game: game.into(),
            fios_paths: fios_paths
                .into_iter()
                .map(|p| normalize_path(p.as_ref()).trim_end_matches('/').to_string())
                .collect(),
        }
    }

    pub fn game(&self) -> &str {
        &self.game
    }

    pub fn fios_paths(&self) -> &[String] {
        &self.fios_paths
    }
}

impl DefinitionInfoProvider for PathRulesProvider {
    fn can_process(&self, game: &str) -> bool {
        self.game.eq_ignore_ascii_case(game)
    }

    fn definition_uses_fios_rules(&self, definition: &Definition) -> bool {
        let parent = normalize_path(definition.parent_directory());
        // localisation never uses FIOS, even if listed
        if parent.starts_with(LOCALISATION_DIRECTORY) {
            return false;
        }
        self.fios_paths
            .iter()
            .any(|p| parent == *p || parent.starts_with(&format!("{}/", p)))
    }
}

/// Registered providers, selected by game
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn DefinitionInfoProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; earlier registrations win when several can process a game
    pub fn register(&mut self, provider: impl DefinitionInfoProvider + 'static) {
        self.providers.push(Arc::new(provider));
    }

    /// Builder form of [`ProviderRegistry::register`]
    pub fn with_provider(mut self, provider: impl DefinitionInfoProvider + 'static) -> Self {
        self.register(provider);
        self
    }

    /// The first provider that can process `game`
    pub fn select(&self, game: &str) -> Option<Arc<dyn DefinitionInfoProvider>> {
        self.providers
            .iter()
            .find(|p| p.can_process(game))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> PathRulesProvider {
        PathRulesProvider::new("Stellaris", ["common/on_actions", "Events\\"])
    }

    #[test]
    fn test_can_process_case_insensitive() {
        let p = provider();
        assert!(p.can_process("stellaris"));
        assert!(!p.can_process("HOI4"));
    }

    #[test]
    fn test_fios_paths_normalized() {
        assert_eq!(provider().fios_paths(), &["common/on_actions", "events"]);
    }

    #[test]
    fn test_definition_uses_fios_rules() {
        let p = provider();
        let fios = Definition::new("events/a.txt", "events", "a", "m", "");
        let nested = Definition::new("events/sub/a.txt", "events", "a", "m", "");
        let lios = Definition::new("common/buildings/a.txt", "common/buildings", "a", "m", "");
        assert!(p.definition_uses_fios_rules(&fios));
        assert!(p.definition_uses_fios_rules(&nested));
        assert!(!p.definition_uses_fios_rules(&lios));
    }

    #[test]
    fn test_patch_file_name_fios() {
        let def = Definition::new("events/my_events.txt", "events", "ev.1", "m", "");
        assert_eq!(provider().patch_file_name(&def), "events/!!!_ev.1.txt");
    }

    #[test]
    fn test_patch_file_name_lios() {
        let def = Definition::new("common/buildings/b.txt", "common/buildings", "farm", "m", "");
        assert_eq!(
            provider().patch_file_name(&def),
            "common/buildings/zzz_farm.txt"
        );
    }

    #[test]
    fn test_patch_file_name_whole_text_file() {
        let def = Definition::new("interface/main.gui", "interface", "main", "m", "")
            .with_value_type(ValueType::WholeTextFile);
        assert_eq!(provider().patch_file_name(&def), "interface/zzz_main.gui");
    }

    #[test]
    fn test_patch_file_name_localisation() {
        let plain = Definition::new("localisation/english/a_l_english.yml", "loc", "KEY", "m", "");
        assert_eq!(
            provider().patch_file_name(&plain),
            "localisation/english/replace/KEY.yml"
        );

        let replace = Definition::new(
            "localisation/replace/english/a_l_english.yml",
            "loc",
            "KEY",
            "m",
            "",
        );
        assert_eq!(
            provider().patch_file_name(&replace),
            "localisation/replace/english/KEY.yml"
        );
    }

    #[test]
    fn test_patch_file_name_sanitizes_id() {
        let def = Definition::new("common/a.txt", "common", "a:b", "m", "");
        assert_eq!(provider().patch_file_name(&def), "common/zzz_a_b.txt");
    }

    #[test]
    fn test_registry_select() {
        let registry = ProviderRegistry::new()
            .with_provider(PathRulesProvider::new("HOI4", ["events"]))
            .with_provider(provider());
        assert_eq!(registry.len(), 2);
        assert!(registry.select("Stellaris").is_some());
        assert!(registry.select("CK3").is_none());

        let def = Definition::new("events/a.txt", "events", "a", "m", "");
        let selected = registry.select("hoi4").unwrap();
        assert!(selected.definition_uses_fios_rules(&def));
    }
}
