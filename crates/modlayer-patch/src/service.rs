//! Patch collection service
//!
//! [`PatchCollectionService`] ties detection, persisted decisions and the
//! external collaborators together for one selected collection. Every public
//! operation is total: precondition failures, no-ops and collaborator errors
//! are logged and collapse to `false` or `None`, and a [`ConflictResult`] is
//! only replaced once every external call succeeded.

use crate::io::{ModReader, ModWriter};
use crate::state::PatchState;
use crate::store::PatchStateStore;
use modlayer_core::{Definition, DefinitionKey, IndexedDefinitions, PatchStateMode};
use modlayer_hub::hash::{hash_sequence, DEFAULT_SEED};
use modlayer_hub::{
    ConflictDetector, ConflictResult, DefinitionInfoProvider, EngineConfig, MergeEngine,
    MergedMod, PriorityResult, ProviderRegistry,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

/// A named, ordered set of overlays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModCollection {
    pub name: String,
    /// Overlays in load order
    pub mods: Vec<String>,
}

impl ModCollection {
    pub fn new<I, S>(name: impl Into<String>, mods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            mods: mods.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, mod_name: &str) -> bool {
        self.mods.iter().any(|m| m == mod_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Resolve,
    Ignore,
    Custom,
}

impl Decision {
    fn bucket(self, result: &mut ConflictResult) -> &mut IndexedDefinitions {
        match self {
            Decision::Resolve => &mut result.resolved_conflicts,
            Decision::Ignore => &mut result.ignored_conflicts,
            Decision::Custom => &mut result.custom_conflicts,
        }
    }

    /// Whether the decision is backed by a file in the patch overlay
    fn writes_patch(self) -> bool {
        !matches!(self, Decision::Ignore)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Resolve => write!(f, "resolved"),
            Decision::Ignore => write!(f, "ignored"),
            Decision::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NeedsUpdateMemo {
    load_order_hash: u64,
    state_hash: u64,
    files_hash: u64,
    needs_update: bool,
}

impl NeedsUpdateMemo {
    fn same_inputs(&self, other: &NeedsUpdateMemo) -> bool {
        self.load_order_hash == other.load_order_hash
            && self.state_hash == other.state_hash
            && self.files_hash == other.files_hash
    }
}

/// An overlay file as the reader currently sees it
struct ObservedFile<'a> {
    def: &'a Definition,
    /// `None` when the file is absent
    sha: Option<String>,
}

/// Reconciles and records conflict decisions for the selected collection
pub struct PatchCollectionService {
    config: EngineConfig,
    provider: Option<Arc<dyn DefinitionInfoProvider>>,
    detector: ConflictDetector,
    store: Arc<dyn PatchStateStore>,
    reader: Arc<dyn ModReader>,
    writer: Arc<dyn ModWriter>,
    selected: Option<ModCollection>,
    needs_update: Mutex<HashMap<String, NeedsUpdateMemo>>,
}

impl PatchCollectionService {
    /// Create a service, selecting the provider for `config.game` once
    pub fn new(
        config: EngineConfig,
        providers: &ProviderRegistry,
        store: Arc<dyn PatchStateStore>,
        reader: Arc<dyn ModReader>,
        writer: Arc<dyn ModWriter>,
    ) -> Self {
        let provider = providers.select(&config.game);
        if provider.is_none() {
            tracing::warn!(game = %config.game, "no definition info provider for game");
        }
        Self {
            detector: ConflictDetector::new(provider.clone()),
            provider,
            config,
            store,
            reader,
            writer,
            selected: None,
            needs_update: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn select_collection(&mut self, collection: ModCollection) {
        tracing::debug!(collection = %collection.name, mods = collection.mods.len(), "collection selected");
        self.selected = Some(collection);
    }

    pub fn selected_collection(&self) -> Option<&ModCollection> {
        self.selected.as_ref()
    }

    fn load_order(&self) -> &[String] {
        self.selected.as_ref().map(|c| c.mods.as_slice()).unwrap_or(&[])
    }

    /// Run the detector against `load_order`
    pub fn find_conflicts(
        &self,
        index: &IndexedDefinitions,
        load_order: &[String],
        mode: PatchStateMode,
    ) -> ConflictResult {
        self.detector.find_conflicts(index, load_order, mode)
    }

    /// Pick the winner of `group` under the selected collection's load order
    pub fn eval_definition_priority<'a>(&self, group: &[&'a Definition]) -> PriorityResult<'a> {
        self.detector
            .evaluator(self.load_order().iter().cloned())
            .eval(group.iter().copied())
    }

    /// Load the persisted state of `collection`
    pub fn load_patch_state(&self, collection: &str) -> Option<PatchState> {
        match self.store.load(collection) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(collection, error = %e, "failed to load patch state");
                None
            }
        }
    }

    fn precondition(&self, collection: &str) -> bool {
        if collection.trim().is_empty() {
            tracing::debug!("empty collection name");
            return false;
        }
        if self.selected.is_none() {
            tracing::debug!(collection, "no collection selected");
            return false;
        }
        true
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Carry persisted decisions forward onto a fresh detection result
    ///
    /// Decisions whose conflicting members changed since they were recorded
    /// are dropped. The reconciled state, with the fresh conflicts as its new
    /// history, is saved before it is returned.
    pub fn initialize_patch_state(
        &self,
        result: &ConflictResult,
        collection: &str,
    ) -> Option<ConflictResult> {
        if !self.precondition(collection) {
            return None;
        }
        let previous = match self.store.load(collection) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(collection, error = %e, "failed to load patch state");
                return None;
            }
        };

        let mut reconciled = result.clone();
        if let Some(previous) = &previous {
            let conflicts = &result.conflicts;
            let is_stale = |key: &DefinitionKey| {
                previous.is_stale(key, &conflicts.get_by_key(key))
            };
            reconciled.resolved_conflicts =
                carry_forward(&previous.resolved_conflicts, Decision::Resolve, collection, |key| {
                    conflicts.contains_key(key) && !is_stale(key)
                });
            reconciled.ignored_conflicts =
                carry_forward(&previous.ignored_conflicts, Decision::Ignore, collection, |key| {
                    conflicts.contains_key(key) && !is_stale(key)
                });
            reconciled.custom_conflicts =
                carry_forward(&previous.custom_conflicts, Decision::Custom, collection, |key| {
                    !conflicts.contains_key(key) || !is_stale(key)
                });
            reconciled.ignored_paths = previous.ignore_directive();
        }
        if let Err(e) = reconciled.apply_ignore_rules(self.load_order()) {
            tracing::warn!(collection, error = %e, "invalid ignore rule, nothing hidden");
            reconciled.rule_ignored_conflicts = IndexedDefinitions::default();
        }

        let state = PatchState::from_result(&reconciled, result.conflicts.clone());
        if let Err(e) = self.store.save(collection, &state) {
            tracing::warn!(collection, error = %e, "failed to save patch state");
            return None;
        }
        self.invalidate_patch_mod_state(collection);
        tracing::info!(collection, summary = %reconciled, "patch state initialized");
        Some(reconciled)
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// Resolve a conflict in favor of `definition` and write its patch copy
    pub fn apply_mod_patch(
        &self,
        result: &mut ConflictResult,
        definition: &Definition,
        collection: &str,
    ) -> bool {
        self.decide(result, definition.clone(), collection, Decision::Resolve)
    }

    /// Mark a conflict as ignored
    pub fn ignore_mod_patch(
        &self,
        result: &mut ConflictResult,
        definition: &Definition,
        collection: &str,
    ) -> bool {
        self.decide(result, definition.clone(), collection, Decision::Ignore)
    }

    /// Settle a conflict with user-authored code and write it to the patch overlay
    pub fn add_custom_mod_patch(
        &self,
        result: &mut ConflictResult,
        definition: &Definition,
        collection: &str,
    ) -> bool {
        self.decide(result, definition.clone().custom_patch(), collection, Decision::Custom)
    }

    fn decide(
        &self,
        result: &mut ConflictResult,
        definition: Definition,
        collection: &str,
        decision: Decision,
    ) -> bool {
        if !self.precondition(collection) {
            return false;
        }
        if let Err(e) = definition.validate() {
            tracing::debug!(collection, error = %e, "rejected definition");
            return false;
        }
        if result.mode.is_read_only() {
            tracing::debug!(collection, mode = %result.mode, "read-only mode, decision rejected");
            return false;
        }
        if !self.accepts(&definition) {
            tracing::debug!(
                collection,
                mod_name = %definition.mod_name,
                "definition does not belong to the selected collection"
            );
            return false;
        }
        let key = definition.key();
        if result.unresolved_members(&key).is_empty() {
            tracing::debug!(collection, %key, "nothing left to decide");
            return false;
        }

        let patch_mod = self.config.patch_mod_name(collection);
        let mut written = None;
        if decision.writes_patch() {
            let Some(patch) = self.create_patch_definition(&definition, collection) else {
                return false;
            };
            if let Err(e) = self.writer.write_patch(&patch_mod, &patch) {
                tracing::warn!(collection, %key, error = %e, "failed to write patch");
                return false;
            }
            written = Some(patch);
        }

        let mut next = result.clone();
        let bucket = decision.bucket(&mut next);
        *bucket = bucket.with_definition(definition);
        if !self.persist(collection, &next) {
            if let Some(patch) = written {
                if let Err(e) = self.writer.purge_patch_file(&patch_mod, &patch.file) {
                    tracing::warn!(collection, %key, error = %e, "failed to roll back patch");
                }
            }
            return false;
        }
        *result = next;
        tracing::info!(collection, %key, decision = %decision, "conflict decided");
        true
    }

    fn accepts(&self, definition: &Definition) -> bool {
        definition.is_from_game
            || definition.is_custom_patch
            || self
                .selected
                .as_ref()
                .is_some_and(|c| c.contains(&definition.mod_name))
    }

    /// Undo a resolution and purge its patch file
    pub fn reset_resolved_conflict(
        &self,
        result: &mut ConflictResult,
        key: &DefinitionKey,
        collection: &str,
    ) -> bool {
        self.reset(result, key, collection, Decision::Resolve)
    }

    /// Undo an ignore decision
    pub fn reset_ignored_conflict(
        &self,
        result: &mut ConflictResult,
        key: &DefinitionKey,
        collection: &str,
    ) -> bool {
        self.reset(result, key, collection, Decision::Ignore)
    }

    /// Remove a custom patch and purge its file
    pub fn reset_custom_conflict(
        &self,
        result: &mut ConflictResult,
        key: &DefinitionKey,
        collection: &str,
    ) -> bool {
        self.reset(result, key, collection, Decision::Custom)
    }

    fn reset(
        &self,
        result: &mut ConflictResult,
        key: &DefinitionKey,
        collection: &str,
        decision: Decision,
    ) -> bool {
        if !self.precondition(collection) {
            return false;
        }
        if result.mode.is_read_only() {
            tracing::debug!(collection, mode = %result.mode, "read-only mode, reset rejected");
            return false;
        }
        let mut next = result.clone();
        let bucket = decision.bucket(&mut next);
        if !bucket.contains_key(key) {
            tracing::debug!(collection, %key, decision = %decision, "no such decision");
            return false;
        }

        let patch_mod = self.config.patch_mod_name(collection);
        let mut purged = Vec::new();
        if decision.writes_patch() {
            for def in bucket.get_by_key(key) {
                let Some(patch) = self.create_patch_definition(def, collection) else {
                    self.restore_patches(&patch_mod, &purged);
                    return false;
                };
                if let Err(e) = self.writer.purge_patch_file(&patch_mod, &patch.file) {
                    tracing::warn!(collection, %key, error = %e, "failed to purge patch file");
                    self.restore_patches(&patch_mod, &purged);
                    return false;
                }
                purged.push(patch);
            }
        }

        *bucket = bucket.without_key(key);
        if !self.persist(collection, &next) {
            self.restore_patches(&patch_mod, &purged);
            return false;
        }
        *result = next;
        tracing::info!(collection, %key, decision = %decision, "decision reset");
        true
    }

    /// Recompute the conflicts hidden by `result.ignored_paths` and persist the directive
    pub fn save_ignored_paths(&self, result: &mut ConflictResult, collection: &str) -> bool {
        if !self.precondition(collection) {
            return false;
        }
        let mut next = result.clone();
        if let Err(e) = next.apply_ignore_rules(self.load_order()) {
            tracing::warn!(collection, error = %e, "invalid ignore directive");
            return false;
        }
        if !self.persist(collection, &next) {
            return false;
        }
        *result = next;
        true
    }

    /// Write back patch files purged by a reset that could not be persisted
    fn restore_patches(&self, patch_mod: &str, patches: &[Definition]) {
        for patch in patches {
            if let Err(e) = self.writer.write_patch(patch_mod, patch) {
                tracing::warn!(patch_mod, file = %patch.file, error = %e, "failed to restore patch");
            }
        }
    }

    /// Save `next` keeping the previously recorded conflict history
    fn persist(&self, collection: &str, next: &ConflictResult) -> bool {
        let history = match self.store.load(collection) {
            Ok(Some(state)) => state.conflict_history,
            Ok(None) => next.conflicts.clone(),
            Err(e) => {
                tracing::warn!(collection, error = %e, "failed to load patch state");
                return false;
            }
        };
        let state = PatchState::from_result(next, history);
        if let Err(e) = self.store.save(collection, &state) {
            tracing::warn!(collection, error = %e, "failed to save patch state");
            return false;
        }
        self.invalidate_patch_mod_state(collection);
        true
    }

    /// Copy of `definition` owned by the collection's patch overlay
    ///
    /// The copy lives at the provider's patch path and remembers its source
    /// file in `original_file_name`.
    pub fn create_patch_definition(
        &self,
        definition: &Definition,
        collection: &str,
    ) -> Option<Definition> {
        if collection.trim().is_empty() {
            return None;
        }
        let Some(provider) = self.provider.as_deref() else {
            tracing::warn!(game = %self.config.game, "no provider, cannot place patch file");
            return None;
        };
        let mut patch = definition.clone();
        patch.file = provider.patch_file_name(definition);
        patch.mod_name = self.config.patch_mod_name(collection);
        patch.original_file_name = Some(definition.source_file().to_string());
        Some(patch)
    }

    // ========================================================================
    // Staleness
    // ========================================================================

    /// Whether the patch overlay of `collection` is out of date
    ///
    /// True when the persisted load order differs from `load_order`, or when
    /// any overlay file behind a persisted conflict, overwrite or orphan is
    /// missing or hashes differently. The reader is consulted on every call;
    /// answers are memoized per load order hash, state fingerprint and the
    /// hash of the observed files.
    pub fn patch_mod_needs_update(&self, collection: &str, load_order: &[String]) -> bool {
        if collection.trim().is_empty() {
            return false;
        }
        let state = match self.store.load(collection) {
            Ok(Some(state)) => state,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(collection, error = %e, "failed to load patch state");
                return true;
            }
        };
        let Some(observed) = self.observe_files(&state) else {
            return true;
        };

        let load_order_hash = hash_sequence(load_order, DEFAULT_SEED);
        let state_hash = state.fingerprint();
        let files_hash = hash_sequence(
            observed.iter().flat_map(|file| {
                [
                    file.def.mod_name.as_str(),
                    file.def.source_file(),
                    if file.sha.is_some() { "+" } else { "-" },
                    file.sha.as_deref().unwrap_or_default(),
                ]
            }),
            DEFAULT_SEED,
        );
        let key = NeedsUpdateMemo {
            load_order_hash,
            state_hash,
            files_hash,
            needs_update: false,
        };
        if let Ok(memo) = self.needs_update.lock() {
            if let Some(entry) = memo.get(collection) {
                if entry.same_inputs(&key) {
                    return entry.needs_update;
                }
            }
        }

        let needs_update = check_needs_update(collection, &state, load_order, &observed);
        if let Ok(mut memo) = self.needs_update.lock() {
            memo.insert(
                collection.to_string(),
                NeedsUpdateMemo { needs_update, ..key },
            );
        }
        needs_update
    }

    /// Current sha of every overlay file the persisted state refers to
    ///
    /// Game and custom patch definitions are skipped. `None` when the reader
    /// fails.
    fn observe_files<'a>(&self, state: &'a PatchState) -> Option<Vec<ObservedFile<'a>>> {
        let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut observed = Vec::new();
        let referenced = state
            .conflicts
            .iter()
            .chain(state.overwritten_conflicts.iter())
            .chain(state.orphan_conflicts.iter())
            .filter(|d| !d.is_from_game && !d.is_custom_patch);
        for def in referenced {
            if !seen.insert((def.mod_name.as_str(), def.source_file())) {
                continue;
            }
            let sha = match self.reader.get_file_info(&def.mod_name, def.source_file()) {
                Ok(info) => info.map(|info| info.content_sha),
                Err(e) => {
                    tracing::warn!(mod_name = %def.mod_name, error = %e, "failed to read file info");
                    return None;
                }
            };
            observed.push(ObservedFile { def, sha });
        }
        Some(observed)
    }

    /// Forget the memoized needs-update answer for `collection`
    pub fn invalidate_patch_mod_state(&self, collection: &str) {
        if let Ok(mut memo) = self.needs_update.lock() {
            memo.remove(collection);
        }
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge the conflicts of `selected` overlays into `new_name` and write it
    pub fn export_merged_collection(
        &self,
        result: &ConflictResult,
        selected: &[String],
        new_name: &str,
    ) -> Option<MergedMod> {
        if new_name.trim().is_empty() || selected.is_empty() {
            tracing::debug!("nothing to merge");
            return None;
        }
        let load_order = if result.load_order.is_empty() {
            self.load_order()
        } else {
            result.load_order.as_slice()
        };
        let engine = MergeEngine::new(self.detector.evaluator(load_order.iter().cloned()))
            .with_indent(self.config.merge_indent);
        let merged = engine.merge_collection(result, selected, new_name)?;
        if let Err(e) = self.writer.write_merged(&merged) {
            tracing::warn!(new_name, error = %e, "failed to write merged collection");
            return None;
        }
        Some(merged)
    }
}

impl fmt::Debug for PatchCollectionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchCollectionService")
            .field("config", &self.config)
            .field("has_provider", &self.provider.is_some())
            .field("selected", &self.selected)
            .finish()
    }
}

/// Keep the entries of `bucket` whose key passes `keep`, logging the rest
fn carry_forward<F>(
    bucket: &IndexedDefinitions,
    decision: Decision,
    collection: &str,
    mut keep: F,
) -> IndexedDefinitions
where
    F: FnMut(&DefinitionKey) -> bool,
{
    let mut dropped: BTreeSet<DefinitionKey> = BTreeSet::new();
    let kept = bucket.filtered(|def| {
        let key = def.key();
        if keep(&key) {
            true
        } else {
            dropped.insert(key);
            false
        }
    });
    for key in dropped {
        tracing::info!(collection, %key, decision = %decision, "stale decision dropped");
    }
    kept
}

fn check_needs_update(
    collection: &str,
    state: &PatchState,
    load_order: &[String],
    observed: &[ObservedFile<'_>],
) -> bool {
    if state.load_order != load_order {
        tracing::debug!(collection, "load order changed");
        return true;
    }
    for file in observed {
        let def = file.def;
        if !load_order.iter().any(|m| *m == def.mod_name) {
            tracing::debug!(collection, mod_name = %def.mod_name, "overlay left the collection");
            return true;
        }
        if file.sha.as_deref() != Some(def.content_sha.as_str()) {
            tracing::debug!(
                collection,
                mod_name = %def.mod_name,
                file = def.source_file(),
                "overlay file changed"
            );
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryReader, MemoryWriter, WriteOp};
    use crate::store::MemoryStateStore;
    use modlayer_hub::{PathRulesProvider, PriorityType};

    const COLLECTION: &str = "main";

    struct Fixture {
        service: PatchCollectionService,
        store: Arc<MemoryStateStore>,
        reader: Arc<MemoryReader>,
        writer: Arc<MemoryWriter>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStateStore::new());
        let reader = Arc::new(MemoryReader::new());
        let writer = Arc::new(MemoryWriter::new());
        let registry = ProviderRegistry::new()
            .with_provider(PathRulesProvider::new("Stellaris", ["common/scripted_triggers"]));
        let mut service = PatchCollectionService::new(
            EngineConfig::new("Stellaris"),
            &registry,
            store.clone(),
            reader.clone(),
            writer.clone(),
        );
        service.select_collection(ModCollection::new(COLLECTION, ["m1", "m2"]));
        Fixture {
            service,
            store,
            reader,
            writer,
        }
    }

    fn def(mod_name: &str, code: &str) -> Definition {
        Definition::new("events/a.txt", "events", "a", mod_name, code)
            .with_content_sha(format!("{}-sha", mod_name))
    }

    fn index(m2_code: &str) -> IndexedDefinitions {
        IndexedDefinitions::new(vec![def("m1", "a = { x }"), def("m2", m2_code)])
    }

    fn order() -> Vec<String> {
        vec!["m1".to_string(), "m2".to_string()]
    }

    fn initialized(fx: &Fixture, m2_code: &str) -> ConflictResult {
        let detected = fx
            .service
            .find_conflicts(&index(m2_code), &order(), PatchStateMode::Default);
        fx.service
            .initialize_patch_state(&detected, COLLECTION)
            .unwrap()
    }

    // ========================================================================
    // Preconditions
    // ========================================================================

    #[test]
    fn test_no_selection_returns_none() {
        let fx = fixture();
        let mut service = PatchCollectionService::new(
            EngineConfig::new("Stellaris"),
            &ProviderRegistry::new(),
            fx.store.clone(),
            fx.reader.clone(),
            fx.writer.clone(),
        );
        assert!(!service.has_provider());
        let result = service.find_conflicts(&index("a = { y }"), &order(), PatchStateMode::Default);
        assert!(service.initialize_patch_state(&result, COLLECTION).is_none());

        service.select_collection(ModCollection::new(COLLECTION, ["m1", "m2"]));
        assert!(service.initialize_patch_state(&result, "").is_none());
        assert!(service.initialize_patch_state(&result, COLLECTION).is_some());
    }

    #[test]
    fn test_eval_uses_selected_load_order() {
        let fx = fixture();
        let a = def("m1", "a = 1");
        let b = def("m2", "a = 2");
        let result = fx.service.eval_definition_priority(&[&b, &a]);
        assert_eq!(result.definition.unwrap().mod_name, "m2");
        assert_eq!(result.priority_type, PriorityType::Lios);
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    #[test]
    fn test_apply_writes_patch_and_persists() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let winner = def("m2", "a = { y }");

        assert!(fx.service.apply_mod_patch(&mut result, &winner, COLLECTION));
        assert!(result.resolved_conflicts.contains_key(&winner.key()));
        assert!(result.unresolved_keys().is_empty());

        let ops = fx.writer.operations();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            WriteOp::Patch {
                patch_mod, file, ..
            } => {
                assert_eq!(patch_mod, "modlayer_patch_main");
                assert_eq!(file, "events/zzz_a.txt");
            }
            other => panic!("unexpected op {:?}", other),
        }

        let state = fx.service.load_patch_state(COLLECTION).unwrap();
        assert_eq!(state.resolved_conflicts.len(), 1);
    }

    #[test]
    fn test_second_decision_is_noop() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let winner = def("m2", "a = { y }");
        assert!(fx.service.apply_mod_patch(&mut result, &winner, COLLECTION));
        assert!(!fx.service.ignore_mod_patch(&mut result, &winner, COLLECTION));
        assert!(!fx.service.apply_mod_patch(&mut result, &winner, COLLECTION));
    }

    #[test]
    fn test_ignore_does_not_write() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        assert!(fx
            .service
            .ignore_mod_patch(&mut result, &def("m1", "a = { x }"), COLLECTION));
        assert!(fx.writer.operations().is_empty());
        assert_eq!(result.ignored_conflicts.len(), 1);
    }

    #[test]
    fn test_custom_patch_marked() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let custom = def("user", "a = { z }");
        assert!(fx.service.add_custom_mod_patch(&mut result, &custom, COLLECTION));
        let stored = result.custom_conflicts.get_by_type_and_id("events", "a");
        assert!(stored[0].is_custom_patch);
    }

    #[test]
    fn test_foreign_definition_rejected() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        assert!(!fx
            .service
            .apply_mod_patch(&mut result, &def("m9", "a = { q }"), COLLECTION));
    }

    #[test]
    fn test_read_only_rejected() {
        let fx = fixture();
        let detected = fx
            .service
            .find_conflicts(&index("a = { y }"), &order(), PatchStateMode::ReadOnly);
        let mut result = fx
            .service
            .initialize_patch_state(&detected, COLLECTION)
            .unwrap();
        assert!(!fx
            .service
            .apply_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));
    }

    #[test]
    fn test_writer_failure_leaves_result_unchanged() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let before = result.clone();
        fx.writer.set_failing(true);
        assert!(!fx
            .service
            .apply_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));
        assert_eq!(result, before);

        fx.writer.set_failing(false);
        assert!(fx
            .service
            .apply_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));
    }

    #[test]
    fn test_store_failure_leaves_result_unchanged() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let before = result.clone();
        fx.store.set_failing(true);
        assert!(!fx
            .service
            .ignore_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));
        assert_eq!(result, before);
    }

    #[test]
    fn test_store_failure_rolls_back_patch() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let before = result.clone();
        fx.store.set_failing(true);
        assert!(!fx
            .service
            .apply_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));
        assert_eq!(result, before);

        let ops = fx.writer.operations();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], WriteOp::Patch { file, .. } if file == "events/zzz_a.txt"));
        assert!(matches!(&ops[1], WriteOp::Purge { file, .. } if file == "events/zzz_a.txt"));
    }

    #[test]
    fn test_store_failure_during_reset_restores_patch() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let winner = def("m2", "a = { y }");
        assert!(fx.service.apply_mod_patch(&mut result, &winner, COLLECTION));
        let before = result.clone();

        let key = winner.key();
        fx.store.set_failing(true);
        assert!(!fx.service.reset_resolved_conflict(&mut result, &key, COLLECTION));
        assert_eq!(result, before);

        let persisted = fx.store.load(COLLECTION).unwrap().unwrap();
        assert!(persisted.resolved_conflicts.contains_key(&key));
        let ops = fx.writer.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], WriteOp::Patch { .. }));
        assert!(matches!(&ops[1], WriteOp::Purge { file, .. } if file == "events/zzz_a.txt"));
        assert!(matches!(&ops[2], WriteOp::Patch { file, .. } if file == "events/zzz_a.txt"));
    }

    #[test]
    fn test_reset_resolved_purges() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let winner = def("m2", "a = { y }");
        assert!(fx.service.apply_mod_patch(&mut result, &winner, COLLECTION));

        let key = winner.key();
        assert!(fx.service.reset_resolved_conflict(&mut result, &key, COLLECTION));
        assert!(!result.resolved_conflicts.contains_key(&key));
        assert!(matches!(
            fx.writer.operations().last(),
            Some(WriteOp::Purge { file, .. }) if file == "events/zzz_a.txt"
        ));
        assert!(!fx.service.reset_resolved_conflict(&mut result, &key, COLLECTION));
    }

    #[test]
    fn test_reset_ignored_missing_key() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        let key = DefinitionKey::new("events", "a");
        assert!(!fx.service.reset_ignored_conflict(&mut result, &key, COLLECTION));
        assert!(fx
            .service
            .ignore_mod_patch(&mut result, &def("m1", "a = { x }"), COLLECTION));
        assert!(fx.service.reset_ignored_conflict(&mut result, &key, COLLECTION));
        assert!(fx.writer.operations().is_empty());
    }

    #[test]
    fn test_reset_custom() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        assert!(fx
            .service
            .add_custom_mod_patch(&mut result, &def("user", "a = { z }"), COLLECTION));
        let key = DefinitionKey::new("events", "a");
        assert!(fx.service.reset_custom_conflict(&mut result, &key, COLLECTION));
        assert!(result.custom_conflicts.is_empty());
    }

    #[test]
    fn test_create_patch_definition() {
        let fx = fixture();
        let source = Definition::new(
            "common/scripted_triggers/t.txt",
            "common/scripted_triggers",
            "trig",
            "m1",
            "trig = {}",
        );
        let patch = fx.service.create_patch_definition(&source, COLLECTION).unwrap();
        assert_eq!(patch.file, "common/scripted_triggers/!!!_trig.txt");
        assert_eq!(patch.mod_name, "modlayer_patch_main");
        assert_eq!(
            patch.original_file_name.as_deref(),
            Some("common/scripted_triggers/t.txt")
        );
        assert!(fx.service.create_patch_definition(&source, " ").is_none());
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    #[test]
    fn test_decision_survives_unchanged_input() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        assert!(fx
            .service
            .apply_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));

        let again = initialized(&fx, "a = { y }");
        assert_eq!(again.resolved_conflicts.len(), 1);
        assert!(again.unresolved_keys().is_empty());
    }

    #[test]
    fn test_stale_decision_dropped() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        assert!(fx
            .service
            .apply_mod_patch(&mut result, &def("m2", "a = { y }"), COLLECTION));

        let changed = initialized(&fx, "a = { changed }");
        assert!(changed.resolved_conflicts.is_empty());
        assert_eq!(changed.unresolved_keys().len(), 1);

        let state = fx.service.load_patch_state(COLLECTION).unwrap();
        assert!(state.resolved_conflicts.is_empty());
        assert_eq!(
            state.conflict_history.get_by_type_and_id("events", "a").len(),
            2
        );
    }

    #[test]
    fn test_custom_kept_without_conflict() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        assert!(fx
            .service
            .add_custom_mod_patch(&mut result, &def("user", "a = { z }"), COLLECTION));

        let single = IndexedDefinitions::new(vec![def("m1", "a = { x }")]);
        let detected = fx
            .service
            .find_conflicts(&single, &order(), PatchStateMode::Default);
        let reconciled = fx
            .service
            .initialize_patch_state(&detected, COLLECTION)
            .unwrap();
        assert!(!reconciled.has_conflicts());
        assert_eq!(reconciled.custom_conflicts.len(), 1);
    }

    #[test]
    fn test_ignored_paths_persisted() {
        let fx = fixture();
        let mut result = initialized(&fx, "a = { y }");
        result.ignored_paths.add_path_rule("events/", false);
        assert!(fx.service.save_ignored_paths(&mut result, COLLECTION));
        assert_eq!(result.rule_ignored_conflicts.len(), 1);

        let again = initialized(&fx, "a = { y }");
        assert_eq!(again.ignored_paths, result.ignored_paths);
        assert_eq!(again.rule_ignored_conflicts.len(), 1);
    }

    // ========================================================================
    // Needs update
    // ========================================================================

    fn seed_reader(fx: &Fixture) {
        fx.reader.insert("m1", "events/a.txt", "m1-sha").unwrap();
        fx.reader.insert("m2", "events/a.txt", "m2-sha").unwrap();
    }

    #[test]
    fn test_needs_update_without_state() {
        let fx = fixture();
        assert!(!fx.service.patch_mod_needs_update(COLLECTION, &order()));
    }

    #[test]
    fn test_needs_update_current() {
        let fx = fixture();
        seed_reader(&fx);
        initialized(&fx, "a = { y }");
        assert!(!fx.service.patch_mod_needs_update(COLLECTION, &order()));
    }

    #[test]
    fn test_needs_update_on_reorder() {
        let fx = fixture();
        seed_reader(&fx);
        initialized(&fx, "a = { y }");
        let reordered = vec!["m2".to_string(), "m1".to_string()];
        assert!(fx.service.patch_mod_needs_update(COLLECTION, &reordered));
    }

    #[test]
    fn test_needs_update_on_hash_change() {
        let fx = fixture();
        seed_reader(&fx);
        initialized(&fx, "a = { y }");
        assert!(!fx.service.patch_mod_needs_update(COLLECTION, &order()));

        fx.reader.insert("m2", "events/a.txt", "new-sha").unwrap();
        assert!(fx.service.patch_mod_needs_update(COLLECTION, &order()));

        fx.reader.insert("m2", "events/a.txt", "m2-sha").unwrap();
        assert!(!fx.service.patch_mod_needs_update(COLLECTION, &order()));
    }

    #[test]
    fn test_needs_update_after_file_removed() {
        let fx = fixture();
        seed_reader(&fx);
        initialized(&fx, "a = { y }");
        assert!(!fx.service.patch_mod_needs_update(COLLECTION, &order()));

        fx.reader.remove("m1", "events/a.txt").unwrap();
        assert!(fx.service.patch_mod_needs_update(COLLECTION, &order()));
    }

    #[test]
    fn test_needs_update_on_missing_file() {
        let fx = fixture();
        fx.reader.insert("m1", "events/a.txt", "m1-sha").unwrap();
        initialized(&fx, "a = { y }");
        assert!(fx.service.patch_mod_needs_update(COLLECTION, &order()));
    }

    // ========================================================================
    // Merge
    // ========================================================================

    #[test]
    fn test_export_merged_collection() {
        let fx = fixture();
        let result = initialized(&fx, "a = { y }");
        let merged = fx
            .service
            .export_merged_collection(&result, &order(), "merged")
            .unwrap();
        assert_eq!(merged.name, "merged");
        assert_eq!(merged.len(), 1);
        assert!(matches!(
            fx.writer.operations().last(),
            Some(WriteOp::Merged { name, .. }) if name == "merged"
        ));

        assert!(fx
            .service
            .export_merged_collection(&result, &["m9".to_string()], "merged")
            .is_none());
        assert!(fx.service.export_merged_collection(&result, &order(), "").is_none());
    }
}
