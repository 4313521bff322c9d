//! Processing mode of a conflict detection pass

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mode a collection's patch state is computed under
///
/// The mode decides which definitions are eligible for grouping and whether
/// dependency overrides are hidden from the conflict list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatchStateMode {
    /// No patch state has been computed yet
    None,
    /// Overlays only, dependency overrides suppressed
    #[default]
    Default,
    /// Base game definitions included, dependency overrides shown
    Advanced,
    /// Like `Default`, but no decisions may be recorded
    ReadOnly,
    DefaultWithoutLocalization,
    AdvancedWithoutLocalization,
    ReadOnlyWithoutLocalization,
}

impl PatchStateMode {
    /// Whether `is_from_game` definitions enter grouping
    pub fn includes_game_definitions(self) -> bool {
        matches!(
            self,
            PatchStateMode::Advanced | PatchStateMode::AdvancedWithoutLocalization
        )
    }

    /// Whether groups explained by dependency declarations are dropped
    pub fn suppresses_overrides(self) -> bool {
        !self.includes_game_definitions()
    }

    /// Whether localisation files are left out of grouping
    pub fn excludes_localisation(self) -> bool {
        matches!(
            self,
            PatchStateMode::DefaultWithoutLocalization
                | PatchStateMode::AdvancedWithoutLocalization
                | PatchStateMode::ReadOnlyWithoutLocalization
        )
    }

    /// Whether decision operations are rejected
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            PatchStateMode::ReadOnly | PatchStateMode::ReadOnlyWithoutLocalization
        )
    }
}

impl fmt::Display for PatchStateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchStateMode::None => "none",
            PatchStateMode::Default => "default",
            PatchStateMode::Advanced => "advanced",
            PatchStateMode::ReadOnly => "read-only",
            PatchStateMode::DefaultWithoutLocalization => "default-without-localization",
            PatchStateMode::AdvancedWithoutLocalization => "advanced-without-localization",
            PatchStateMode::ReadOnlyWithoutLocalization => "read-only-without-localization",
        };
        f.write_str(name)
    }
}
