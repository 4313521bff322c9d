//! Modlayer Hub - conflict detection, priority evaluation and merging
//!
//! This crate holds the algorithmic core that turns an indexed set of overlay
//! definitions into a reviewable conflict list:
//!
//! ```text
//! IndexedDefinitions ──► ConflictDetector ──► ConflictResult
//!                             │                    │
//!                             ▼                    ▼
//!                     PriorityEvaluator ◄──── MergeEngine
//!                             │
//!                             ▼
//!               DefinitionInfoProvider (per game, via ProviderRegistry)
//! ```
//!
//! ## Key Components
//!
//! - [`ConflictDetector`]: groups definitions into conflicts and orphans
//! - [`PriorityEvaluator`]: picks a group's winner through an ordered rule list
//! - [`DefinitionInfoProvider`]: per-game precedence and patch path rules
//! - [`IgnoreDirective`]: which conflicts the user chose to hide
//! - [`MergeEngine`]: folds several overlays' conflicting files into one overlay
//! - [`EngineConfig`]: configuration loaded from RON
//!
//! Everything here is synchronous and free of I/O; persistence and output
//! live in `modlayer-patch`.

pub mod config;
pub mod conflict;
mod error;
pub mod hash;
pub mod ignore;
pub mod merge;
pub mod priority;
pub mod provider;

pub use config::{EngineConfig, StateFormat};
pub use conflict::{ConflictDetector, ConflictResult};
pub use error::{Error, Result};
pub use ignore::{IgnoreDirective, PathMatcher, PathRule};
pub use merge::{MergeEngine, MergedMod};
pub use priority::{PriorityEvaluator, PriorityResult, PriorityRule, PriorityType, RULES};
pub use provider::{DefinitionInfoProvider, PathRulesProvider, ProviderRegistry};
