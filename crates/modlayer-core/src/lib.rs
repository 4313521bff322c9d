//! Modlayer Core - definition model for overlay conflict resolution
//!
//! This crate provides the data types every other modlayer crate builds on:
//! - [`Definition`]: one named, typed fragment contributed by an overlay (or the base game)
//! - [`DefinitionKey`]: the `(type, id)` identity definitions compete on
//! - [`ValueType`]: the kind of declaration, which decides conflict eligibility
//! - [`PatchStateMode`]: the processing mode a detection pass runs under
//! - [`IndexedDefinitions`]: an immutable, hash-indexed snapshot of definitions
//!
//! ## Snapshots
//!
//! An [`IndexedDefinitions`] is built once per computation and never mutated.
//! Deriving an updated set (adding a patch definition, dropping a resolved key)
//! produces a new snapshot:
//!
//! ```
//! use modlayer_core::{Definition, IndexedDefinitions};
//!
//! let index = IndexedDefinitions::new(vec![
//!     Definition::new("events/a.txt", "events", "a", "mod1", "a = {}"),
//!     Definition::new("events/a.txt", "events", "a", "mod2", "a = { x }"),
//! ]);
//! assert_eq!(index.get_by_type_and_id("events", "a").len(), 2);
//!
//! let trimmed = index.without_mod("mod2");
//! assert_eq!(trimmed.len(), 1);
//! assert_eq!(index.len(), 2);
//! ```

mod definition;
mod error;
mod identity;
mod index;
mod mode;

pub use definition::{Definition, ValueType, LOCALISATION_DIRECTORY, LOCALISATION_REPLACE_DIRECTORY};
pub use error::{Error, Result};
pub use identity::{normalize_path, sanitize_file_name, DefinitionKey};
pub use index::IndexedDefinitions;
pub use mode::PatchStateMode;
