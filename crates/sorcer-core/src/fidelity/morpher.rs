use serde_json::Value;

use crate::error::Result;
use crate::fidelity::{FidelityManager, FidelityView, Selection};

/// A reconfiguration request, validated when staged and applied later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Switch each listed slot; the list is one all-or-nothing unit.
    Select(Vec<Selection>),
    /// Select a meta-fidelity candidate and apply its projection.
    Morph { meta: String, candidate: String },
}

/// Callback fired after a fidelity slot produced a value.
///
/// Requests made through `changes` take effect from the next evaluation of
/// the affected slots; the value just produced is never recomputed.
pub trait Morpher: Send + Sync {
    fn update(
        &self,
        changes: &mut FidelityChanges<'_>,
        fidelity: &FidelityView,
        value: &Value,
    ) -> anyhow::Result<()>;
}

impl<F> Morpher for F
where
    F: for<'a, 'b> Fn(&'a mut FidelityChanges<'b>, &FidelityView, &Value) -> anyhow::Result<()>
        + Send
        + Sync,
{
    fn update(
        &self,
        changes: &mut FidelityChanges<'_>,
        fidelity: &FidelityView,
        value: &Value,
    ) -> anyhow::Result<()> {
        (self)(changes, fidelity, value)
    }
}

/// Staging area handed to a morpher.
///
/// Every request is checked against the manager's current slot table when
/// staged, so a morpher sees a [`SorcerError::Config`](crate::SorcerError)
/// immediately instead of at commit time.
pub struct FidelityChanges<'m> {
    manager: &'m FidelityManager,
    staged: Vec<Change>,
}

impl<'m> FidelityChanges<'m> {
    pub fn new(manager: &'m FidelityManager) -> Self {
        Self {
            manager,
            staged: Vec::new(),
        }
    }

    pub fn select(&mut self, slot: &str, candidate: &str) -> Result<()> {
        self.stage(Change::Select(vec![Selection::new(slot, candidate)]))
    }

    pub fn reconfigure(&mut self, selections: Vec<Selection>) -> Result<()> {
        self.stage(Change::Select(selections))
    }

    pub fn morph(&mut self, meta: &str, candidate: &str) -> Result<()> {
        self.stage(Change::Morph {
            meta: meta.to_string(),
            candidate: candidate.to_string(),
        })
    }

    /// Currently committed selection of `slot` (staged changes excluded).
    pub fn current(&self, slot: &str) -> Result<String> {
        self.manager.selected_name(slot)
    }

    pub fn staged(&self) -> &[Change] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn into_staged(self) -> Vec<Change> {
        self.staged
    }

    fn stage(&mut self, change: Change) -> Result<()> {
        self.manager.check(std::slice::from_ref(&change))?;
        self.staged.push(change);
        Ok(())
    }
}
