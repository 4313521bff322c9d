//! Modlayer Patch - persisted decisions and the patch collection service
//!
//! A detection pass is recomputed every session, but the user's decisions
//! are not. This crate keeps those decisions in a [`PatchState`] per
//! collection and carries them forward onto fresh results, dropping any
//! whose conflicting code changed in the meantime.
//!
//! ## Key Components
//!
//! - [`PatchCollectionService`]: reconcile, apply/ignore/custom decisions,
//!   resets, needs-update checks and merge export
//! - [`PatchState`]: the persisted form, RON by default, JSON behind the
//!   `serde_json` feature
//! - [`PatchStateStore`]: where states live ([`FileStateStore`], [`MemoryStateStore`])
//! - [`ModReader`] / [`ModWriter`]: the overlay files the service checks and writes
//!
//! ## Example
//!
//! ```
//! use modlayer_core::{Definition, IndexedDefinitions, PatchStateMode};
//! use modlayer_hub::{EngineConfig, PathRulesProvider, ProviderRegistry};
//! use modlayer_patch::{
//!     MemoryReader, MemoryStateStore, MemoryWriter, ModCollection, PatchCollectionService,
//! };
//! use std::sync::Arc;
//!
//! let registry = ProviderRegistry::new().with_provider(PathRulesProvider::new("Stellaris", ["common"]));
//! let mut service = PatchCollectionService::new(
//!     EngineConfig::new("Stellaris"),
//!     &registry,
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(MemoryReader::new()),
//!     Arc::new(MemoryWriter::new()),
//! );
//! service.select_collection(ModCollection::new("main", ["m1", "m2"]));
//!
//! let index = IndexedDefinitions::new(vec![
//!     Definition::new("events/a.txt", "events", "a", "m1", "a = { x }"),
//!     Definition::new("events/a.txt", "events", "a", "m2", "a = { y }"),
//! ]);
//! let load_order = vec!["m1".to_string(), "m2".to_string()];
//! let detected = service.find_conflicts(&index, &load_order, PatchStateMode::Default);
//! let mut result = service.initialize_patch_state(&detected, "main").unwrap();
//!
//! let winner = result.conflicts.get_by_type_and_id("events", "a")[1].clone();
//! assert!(service.apply_mod_patch(&mut result, &winner, "main"));
//! assert!(result.unresolved_keys().is_empty());
//! ```

mod error;
pub mod io;
pub mod service;
pub mod state;
pub mod store;

pub use error::{Error, Result};
pub use io::{FileInfo, MemoryReader, MemoryWriter, ModReader, ModWriter, WriteOp};
pub use service::{ModCollection, PatchCollectionService};
pub use state::PatchState;
pub use store::{FileStateStore, MemoryStateStore, PatchStateStore};
