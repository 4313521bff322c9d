//! Priority evaluation for a conflicting group
//!
//! The evaluator decides which definition of a group wins and why. The
//! decision is an ordered list of rules ([`RULES`]); each rule either settles
//! the outcome or narrows the candidate list for the rules after it:
//!
//! 1. single candidate (`exists_in_last_file` bookkeeping)
//! 2. custom patch
//! 3. game-object exclusion
//! 4. dependency override
//! 5. localisation
//! 6. first/last in, only served (per provider)
//! 7. load-order fallback
//!
//! Candidates are kept in load order (base game first, then overlays by their
//! position), ties broken by overlay name and file, so evaluation never depends
//! on the order a group was collected in.

use crate::provider::DefinitionInfoProvider;
use modlayer_core::Definition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Why a definition won its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityType {
    /// No real conflict, only one valid candidate
    None,
    /// Decided by load-order position
    ModOrder,
    /// First occurrence wins
    Fios,
    /// Last occurrence wins
    Lios,
    /// Decided by an explicit dependency declaration
    ModOverride,
    /// No provider was available for the game, load order decided
    NoProvider,
}

impl fmt::Display for PriorityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityType::None => "none",
            PriorityType::ModOrder => "mod order",
            PriorityType::Fios => "FIOS",
            PriorityType::Lios => "LIOS",
            PriorityType::ModOverride => "mod override",
            PriorityType::NoProvider => "no provider",
        };
        f.write_str(name)
    }
}

/// Outcome of evaluating one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityResult<'a> {
    pub definition: Option<&'a Definition>,
    pub priority_type: PriorityType,
}

impl<'a> PriorityResult<'a> {
    pub fn new(definition: &'a Definition, priority_type: PriorityType) -> Self {
        Self {
            definition: Some(definition),
            priority_type,
        }
    }

    /// Result for an empty group
    pub fn empty() -> Self {
        Self {
            definition: None,
            priority_type: PriorityType::None,
        }
    }

    /// File of the winning definition
    pub fn file_name(&self) -> Option<&'a str> {
        self.definition.map(|d| d.file.as_str())
    }
}

/// Read-only inputs shared by every rule
pub struct EvalContext<'e> {
    positions: &'e HashMap<String, i64>,
    provider: Option<&'e dyn DefinitionInfoProvider>,
}

impl EvalContext<'_> {
    /// Load-order position; base game definitions and unknown overlays sort first
    pub fn position(&self, definition: &Definition) -> i64 {
        if definition.is_from_game {
            return -1;
        }
        self.positions
            .get(&definition.mod_name)
            .copied()
            .unwrap_or(-1)
    }

    pub fn provider(&self) -> Option<&dyn DefinitionInfoProvider> {
        self.provider
    }
}

/// A single precedence rule
///
/// Returns `Some` to settle the outcome. Returning `None` hands the (possibly
/// narrowed) candidates to the next rule; a rule never empties the list.
pub type PriorityRule =
    for<'a> fn(&EvalContext<'_>, &mut Vec<&'a Definition>) -> Option<PriorityResult<'a>>;

/// The rules in evaluation order
pub const RULES: &[(&str, PriorityRule)] = &[
    ("single_candidate", single_candidate_rule),
    ("custom_patch", custom_patch_rule),
    ("game_exclusion", game_exclusion_rule),
    ("dependency_override", dependency_override_rule),
    ("localisation", localisation_rule),
    ("fios_lios", fios_lios_rule),
    ("load_order", load_order_rule),
];

/// Settles trivially unique groups and drops definitions whose file no longer declares them
pub fn single_candidate_rule<'a>(
    _ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    if candidates.len() == 1 {
        return Some(PriorityResult::new(candidates[0], PriorityType::None));
    }
    let existing: Vec<&'a Definition> = candidates
        .iter()
        .copied()
        .filter(|d| d.exists_in_last_file)
        .collect();
    match existing.len() {
        1 => Some(PriorityResult::new(existing[0], PriorityType::ModOrder)),
        0 => None,
        n if n < candidates.len() => {
            *candidates = existing;
            None
        }
        _ => None,
    }
}

/// Custom patches win unless another candidate explicitly overrides their overlay
pub fn custom_patch_rule<'a>(
    _ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    let custom = candidates.iter().copied().find(|d| d.is_custom_patch)?;
    let overridden = candidates
        .iter()
        .any(|d| !d.is_custom_patch && d.depends_on(&custom.mod_name));
    if overridden {
        None
    } else {
        Some(PriorityResult::new(custom, PriorityType::ModOrder))
    }
}

/// Base game definitions only win when nothing else is left
pub fn game_exclusion_rule<'a>(
    _ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    if candidates.iter().all(|d| d.is_from_game) {
        return Some(PriorityResult::new(candidates[0], PriorityType::None));
    }
    if candidates.iter().any(|d| d.is_from_game) {
        candidates.retain(|d| !d.is_from_game);
        if candidates.len() == 1 {
            return Some(PriorityResult::new(candidates[0], PriorityType::ModOrder));
        }
    }
    None
}

/// Drops candidates whose overlay another candidate depends on
pub fn dependency_override_rule<'a>(
    _ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    let overridden: BTreeSet<&str> = candidates
        .iter()
        .filter(|target| {
            candidates.iter().any(|d| {
                !d.is_custom_patch && d.mod_name != target.mod_name && d.depends_on(&target.mod_name)
            })
        })
        .map(|d| d.mod_name.as_str())
        .collect();
    if overridden.is_empty() {
        return None;
    }

    let survivors: Vec<&'a Definition> = candidates
        .iter()
        .copied()
        .filter(|d| !overridden.contains(d.mod_name.as_str()))
        .collect();
    match survivors.len() {
        // circular dependencies cancel out
        0 => None,
        1 => Some(PriorityResult::new(survivors[0], PriorityType::ModOverride)),
        _ => {
            *candidates = survivors;
            None
        }
    }
}

/// Localisation precedence: replace directories, custom order, then file name
pub fn localisation_rule<'a>(
    ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    if !candidates.iter().all(|d| d.is_localisation()) {
        return None;
    }
    if candidates.iter().any(|d| d.is_localisation_replace()) {
        candidates.retain(|d| d.is_localisation_replace());
    }
    let top = candidates.iter().map(|d| d.custom_priority_order).max()?;
    candidates.retain(|d| d.custom_priority_order == top);

    let winner = candidates
        .iter()
        .copied()
        .max_by(|a, b| {
            a.file_stem()
                .cmp(b.file_stem())
                .then_with(|| ctx.position(a).cmp(&ctx.position(b)))
        })?;
    Some(PriorityResult::new(winner, PriorityType::None))
}

/// First or last occurrence by file name, then load order, as the provider dictates
pub fn fios_lios_rule<'a>(
    ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    let provider = ctx.provider()?;
    let first = candidates.first()?;
    let order = |a: &&'a Definition, b: &&'a Definition| {
        a.file_stem()
            .cmp(b.file_stem())
            .then_with(|| ctx.position(a).cmp(&ctx.position(b)))
    };
    if provider.definition_uses_fios_rules(first) {
        let winner = candidates.iter().copied().min_by(order)?;
        Some(PriorityResult::new(winner, PriorityType::Fios))
    } else {
        let winner = candidates.iter().copied().max_by(order)?;
        Some(PriorityResult::new(winner, PriorityType::Lios))
    }
}

/// The latest candidate in load order
pub fn load_order_rule<'a>(
    ctx: &EvalContext<'_>,
    candidates: &mut Vec<&'a Definition>,
) -> Option<PriorityResult<'a>> {
    let last = candidates.last()?;
    let priority_type = if ctx.provider().is_some() {
        PriorityType::ModOrder
    } else {
        PriorityType::NoProvider
    };
    Some(PriorityResult::new(last, priority_type))
}

/// Picks winners for conflicting groups under one load order
#[derive(Clone)]
pub struct PriorityEvaluator {
    provider: Option<Arc<dyn DefinitionInfoProvider>>,
    load_order: Vec<String>,
    positions: HashMap<String, i64>,
}

impl PriorityEvaluator {
    pub fn new<I, S>(provider: Option<Arc<dyn DefinitionInfoProvider>>, load_order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let load_order: Vec<String> = load_order.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(load_order.len());
        for (pos, name) in load_order.iter().enumerate() {
            positions.entry(name.clone()).or_insert(pos as i64);
        }
        Self {
            provider,
            load_order,
            positions,
        }
    }

    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    fn context(&self) -> EvalContext<'_> {
        EvalContext {
            positions: &self.positions,
            provider: self.provider.as_deref(),
        }
    }

    /// Load-order position of `definition`, `-1` for the base game and unknown overlays
    pub fn position(&self, definition: &Definition) -> i64 {
        self.context().position(definition)
    }

    /// Sort definitions into canonical load order
    ///
    /// The order is total: repeated declarations of one key by one overlay in
    /// one file fall back to their code and content hash.
    pub fn sort_by_load_order(&self, definitions: &mut [&Definition]) {
        let ctx = self.context();
        definitions.sort_by(|a, b| {
            ctx.position(a)
                .cmp(&ctx.position(b))
                .then_with(|| a.mod_name.cmp(&b.mod_name))
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.def_type.cmp(&b.def_type))
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.content_sha.cmp(&b.content_sha))
        });
    }

    /// Evaluate a group and return the winner with its classification
    pub fn eval<'a, I>(&self, group: I) -> PriorityResult<'a>
    where
        I: IntoIterator<Item = &'a Definition>,
    {
        let mut candidates: Vec<&'a Definition> = group.into_iter().collect();
        if candidates.is_empty() {
            return PriorityResult::empty();
        }
        self.sort_by_load_order(&mut candidates);

        let ctx = self.context();
        for (_, rule) in RULES {
            if let Some(result) = rule(&ctx, &mut candidates) {
                return result;
            }
        }
        PriorityResult::empty()
    }
}

impl fmt::Debug for PriorityEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityEvaluator")
            .field("has_provider", &self.provider.is_some())
            .field("load_order", &self.load_order)
            .finish()
    }
}
