use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{Result, SorcerError};
use crate::fidelity::{Candidate, Change, Fidelity, Morpher, MultiFidelity, Projection, Selection};
use crate::obs;
use crate::sync::lock;

/// Snapshot of a slot handed to a morpher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FidelityView {
    pub slot: String,
    pub selected: String,
    pub candidates: Vec<String>,
}

#[derive(Default)]
struct Slots {
    fidelities: BTreeMap<String, MultiFidelity>,
    metas: BTreeMap<String, Fidelity<Projection>>,
    generation: u64,
}

/// Target indices for every slot a batch touches, computed before any
/// mutation happens.
#[derive(Debug, Default)]
struct Plan {
    slots: BTreeMap<String, usize>,
    metas: BTreeMap<String, usize>,
}

impl Slots {
    fn slot(&self, name: &str) -> Result<&MultiFidelity> {
        self.fidelities
            .get(name)
            .ok_or_else(|| SorcerError::config(format!("unknown fidelity slot '{name}'")))
    }

    fn meta(&self, name: &str) -> Result<&Fidelity<Projection>> {
        self.metas
            .get(name)
            .ok_or_else(|| SorcerError::config(format!("unknown meta-fidelity '{name}'")))
    }

    fn plan_selections(&self, selections: &[Selection], plan: &mut Plan) -> Result<()> {
        let mut batch: BTreeMap<&str, &str> = BTreeMap::new();
        for selection in selections {
            let fidelity = self.slot(&selection.slot)?.fidelity();
            let index = fidelity.position(&selection.candidate).ok_or_else(|| {
                SorcerError::config(format!(
                    "fidelity '{}' has no candidate '{}'",
                    selection.slot, selection.candidate
                ))
            })?;
            if let Some(previous) = batch.insert(&selection.slot, &selection.candidate) {
                if previous != selection.candidate {
                    return Err(SorcerError::config(format!(
                        "conflicting selections for '{}': '{previous}' and '{}'",
                        selection.slot, selection.candidate
                    )));
                }
            }
            plan.slots.insert(selection.slot.clone(), index);
        }
        Ok(())
    }

    fn plan_morph(&self, meta: &str, candidate: &str, plan: &mut Plan) -> Result<()> {
        let fidelity = self.meta(meta)?;
        let index = fidelity.position(candidate).ok_or_else(|| {
            SorcerError::config(format!(
                "meta-fidelity '{meta}' has no projection '{candidate}'"
            ))
        })?;
        self.plan_selections(&fidelity.candidates()[index].selections, plan)?;
        plan.metas.insert(meta.to_string(), index);
        Ok(())
    }

    /// Later changes override earlier ones for the same slot.
    fn plan(&self, changes: &[Change]) -> Result<Plan> {
        let mut plan = Plan::default();
        for change in changes {
            match change {
                Change::Select(selections) => self.plan_selections(selections, &mut plan)?,
                Change::Morph { meta, candidate } => self.plan_morph(meta, candidate, &mut plan)?,
            }
        }
        Ok(plan)
    }

    /// Infallible: every index in `plan` was validated against this table.
    fn apply(&mut self, plan: Plan) -> Vec<Selection> {
        let mut changed = Vec::new();
        for (slot, index) in plan.slots {
            if let Some(mf) = self.fidelities.get_mut(&slot) {
                let fidelity = mf.fidelity_mut();
                if fidelity.selected_index() != index {
                    fidelity.select_index(index);
                    changed.push(Selection::new(slot.as_str(), fidelity.selected_name()));
                }
            }
        }
        for (meta, index) in plan.metas {
            if let Some(fidelity) = self.metas.get_mut(&meta) {
                fidelity.select_index(index);
            }
        }
        self.generation += 1;
        changed
    }
}

/// Registry of fidelity slots and meta-fidelities owned by one model.
///
/// All mutation goes through one mutex, so concurrent `select`/`reconfigure`
/// calls on the same slot are linearizable.
#[derive(Default)]
pub struct FidelityManager {
    slots: Mutex<Slots>,
    /// Outcome of the initialization hook once it has run.
    init: Mutex<Option<Result<()>>>,
}

impl FidelityManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fidelity(&self, fidelity: MultiFidelity) -> Result<()> {
        let mut slots = lock(&self.slots);
        let name = fidelity.name().to_string();
        if slots.fidelities.contains_key(&name) || slots.metas.contains_key(&name) {
            return Err(SorcerError::config(format!(
                "fidelity slot '{name}' is already registered"
            )));
        }
        slots.fidelities.insert(name, fidelity);
        Ok(())
    }

    /// Every projection must name existing slots and candidates.
    pub fn add_meta_fidelity(&self, meta: Fidelity<Projection>) -> Result<()> {
        let mut slots = lock(&self.slots);
        let name = meta.name().to_string();
        if slots.fidelities.contains_key(&name) || slots.metas.contains_key(&name) {
            return Err(SorcerError::config(format!(
                "meta-fidelity '{name}' is already registered"
            )));
        }
        for projection in meta.candidates() {
            slots
                .plan_selections(&projection.selections, &mut Plan::default())
                .map_err(|e| {
                    SorcerError::config(format!(
                        "meta-fidelity '{name}' projection '{}': {e}",
                        projection.name
                    ))
                })?;
        }
        slots.metas.insert(name, meta);
        Ok(())
    }

    pub fn contains(&self, slot: &str) -> bool {
        lock(&self.slots).fidelities.contains_key(slot)
    }

    pub fn select(&self, slot: &str, candidate: &str) -> Result<()> {
        self.apply(&[Change::Select(vec![Selection::new(slot, candidate)])])
    }

    /// Switch every listed slot, or none of them.
    pub fn reconfigure(&self, selections: &[Selection]) -> Result<()> {
        self.apply(&[Change::Select(selections.to_vec())])
    }

    /// Select `candidate` of meta-fidelity `meta` and apply its projection
    /// as one unit.
    pub fn morph(&self, meta: &str, candidate: &str) -> Result<()> {
        self.apply(&[Change::Morph {
            meta: meta.to_string(),
            candidate: candidate.to_string(),
        }])
    }

    pub fn validate(&self, selections: &[Selection]) -> Result<()> {
        self.check(&[Change::Select(selections.to_vec())])
    }

    /// Validate `changes` without applying them.
    pub fn check(&self, changes: &[Change]) -> Result<()> {
        lock(&self.slots).plan(changes).map(|_| ())
    }

    /// Apply `changes` in order as one all-or-nothing step.
    pub fn apply(&self, changes: &[Change]) -> Result<()> {
        let (changed, generation) = {
            let mut slots = lock(&self.slots);
            let plan = slots.plan(changes)?;
            let changed = slots.apply(plan);
            (changed, slots.generation)
        };
        for selection in &changed {
            obs::emit_fidelity_reconfigured(&selection.slot, &selection.candidate, generation);
        }
        Ok(())
    }

    pub fn selected(&self, slot: &str) -> Result<Candidate> {
        let slots = lock(&self.slots);
        Ok(slots.slot(slot)?.fidelity().selected().clone())
    }

    pub fn candidates(&self, slot: &str) -> Result<Vec<Candidate>> {
        let slots = lock(&self.slots);
        Ok(slots.slot(slot)?.fidelity().candidates().to_vec())
    }

    pub fn selected_name(&self, slot: &str) -> Result<String> {
        let slots = lock(&self.slots);
        Ok(slots.slot(slot)?.fidelity().selected_name().to_string())
    }

    pub fn meta_selected(&self, meta: &str) -> Result<String> {
        let slots = lock(&self.slots);
        Ok(slots.meta(meta)?.selected_name().to_string())
    }

    pub fn morpher(&self, slot: &str) -> Option<Arc<dyn Morpher>> {
        lock(&self.slots)
            .fidelities
            .get(slot)
            .and_then(|mf| mf.morpher().cloned())
    }

    pub fn view(&self, slot: &str) -> Result<FidelityView> {
        let slots = lock(&self.slots);
        let fidelity = slots.slot(slot)?.fidelity();
        Ok(FidelityView {
            slot: slot.to_string(),
            selected: fidelity.selected_name().to_string(),
            candidates: fidelity
                .candidate_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    pub fn slot_names(&self) -> Vec<String> {
        lock(&self.slots).fidelities.keys().cloned().collect()
    }

    pub fn meta_names(&self) -> Vec<String> {
        lock(&self.slots).metas.keys().cloned().collect()
    }

    /// Bumped by every successful mutation.
    pub fn generation(&self) -> u64 {
        lock(&self.slots).generation
    }

    /// Run `hook` the first time this is called and remember its outcome.
    ///
    /// Returns `Ok(true)` for the call that ran the hook and `Ok(false)`
    /// afterwards. A failed hook is not retried: every later call returns
    /// the same error. Concurrent callers block until the hook settles, so
    /// nobody observes a half-registered manager. The hook must not call
    /// `initialize` itself.
    pub fn initialize<F>(&self, hook: F) -> Result<bool>
    where
        F: FnOnce(&FidelityManager) -> anyhow::Result<()>,
    {
        let mut outcome = lock(&self.init);
        if let Some(settled) = outcome.as_ref() {
            return settled.clone().map(|()| false);
        }
        let result = hook(self)
            .map_err(|e| SorcerError::config(format!("initialization hook failed: {e:#}")));
        *outcome = Some(result.clone());
        result.map(|()| true)
    }

    /// True once the hook has run and succeeded.
    pub fn is_initialized(&self) -> bool {
        matches!(*lock(&self.init), Some(Ok(())))
    }

    /// Selected candidate of every slot, read under one lock.
    pub fn selections(&self) -> BTreeMap<String, String> {
        lock(&self.slots)
            .fidelities
            .iter()
            .map(|(name, mf)| (name.clone(), mf.fidelity().selected_name().to_string()))
            .collect()
    }
}

impl std::fmt::Debug for FidelityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = lock(&self.slots);
        let selected: BTreeMap<&str, &str> = slots
            .fidelities
            .iter()
            .map(|(name, mf)| (name.as_str(), mf.fidelity().selected_name()))
            .collect();
        f.debug_struct("FidelityManager")
            .field("selected", &selected)
            .field("metas", &slots.metas.keys().collect::<Vec<_>>())
            .field("generation", &slots.generation)
            .finish()
    }
}
