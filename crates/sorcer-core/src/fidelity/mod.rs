//! Fidelities: named slots of interchangeable candidates with one selected.
//!
//! - [`Fidelity`] is the generic slot. Its selected index always points at
//!   one of its candidates.
//! - [`MultiFidelity`] is the model-facing slot over [`Candidate`]s, with an
//!   optional [`Morpher`] fired after each evaluation.
//! - A meta-fidelity is a `Fidelity<Projection>`: each candidate names a
//!   consistent combination of selections across other slots.
//! - [`FidelityManager`] owns the slot table and applies every mutation as
//!   one all-or-nothing step.

mod manager;
mod morpher;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SorcerError};
use crate::signature::Signature;

pub use manager::{FidelityManager, FidelityView};
pub use morpher::{Change, FidelityChanges, Morpher};

/// Anything that can be selected by name inside a [`Fidelity`].
pub trait Named {
    fn name(&self) -> &str;
}

/// A named slot holding ordered candidates and the selected one.
#[derive(Debug, Clone, Serialize)]
pub struct Fidelity<T> {
    name: String,
    candidates: Vec<T>,
    selected: usize,
}

impl<T: Named> Fidelity<T> {
    /// The first candidate starts out selected.
    pub fn new(name: impl Into<String>, candidates: Vec<T>) -> Result<Self> {
        let name = name.into();
        if candidates.is_empty() {
            return Err(SorcerError::config(format!(
                "fidelity '{name}' has no candidates"
            )));
        }
        for (i, candidate) in candidates.iter().enumerate() {
            if candidates[..i].iter().any(|c| c.name() == candidate.name()) {
                return Err(SorcerError::config(format!(
                    "fidelity '{name}' lists candidate '{}' twice",
                    candidate.name()
                )));
            }
        }
        Ok(Self {
            name,
            candidates,
            selected: 0,
        })
    }

    /// Builder form of [`select`](Self::select).
    pub fn with_selected(mut self, candidate: &str) -> Result<Self> {
        self.select(candidate)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[T] {
        &self.candidates
    }

    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates.iter().map(Named::name).collect()
    }

    pub fn position(&self, candidate: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c.name() == candidate)
    }

    pub fn get(&self, candidate: &str) -> Option<&T> {
        self.position(candidate).map(|i| &self.candidates[i])
    }

    pub fn selected(&self) -> &T {
        &self.candidates[self.selected]
    }

    pub fn selected_name(&self) -> &str {
        self.selected().name()
    }

    pub(crate) fn selected_index(&self) -> usize {
        self.selected
    }

    /// Unknown names fail with [`SorcerError::Config`] and leave the
    /// previous selection intact.
    pub fn select(&mut self, candidate: &str) -> Result<()> {
        let index = self.position(candidate).ok_or_else(|| {
            SorcerError::config(format!(
                "fidelity '{}' has no candidate '{candidate}' (candidates: {})",
                self.name,
                self.candidate_names().join(", ")
            ))
        })?;
        self.selected = index;
        Ok(())
    }

    pub(crate) fn select_index(&mut self, index: usize) {
        debug_assert!(index < self.candidates.len());
        self.selected = index;
    }
}

impl<T> Named for Fidelity<T> {
    fn name(&self) -> &str {
        &self.name
    }
}

/// One selectable alternative of a model fidelity slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidate {
    Signature { name: String, signature: Signature },
    Value { name: String, value: Value },
}

impl Candidate {
    /// Candidate named after the signature's selector.
    pub fn signature(signature: Signature) -> Self {
        Candidate::Signature {
            name: signature.selector().to_string(),
            signature,
        }
    }

    pub fn named(name: impl Into<String>, signature: Signature) -> Self {
        Candidate::Signature {
            name: name.into(),
            signature,
        }
    }

    pub fn value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Candidate::Value {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn as_signature(&self) -> Option<&Signature> {
        match self {
            Candidate::Signature { signature, .. } => Some(signature),
            Candidate::Value { .. } => None,
        }
    }
}

impl Named for Candidate {
    fn name(&self) -> &str {
        match self {
            Candidate::Signature { name, .. } | Candidate::Value { name, .. } => name,
        }
    }
}

/// `slot` switched to `candidate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub slot: String,
    pub candidate: String,
}

impl Selection {
    pub fn new(slot: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            candidate: candidate.into(),
        }
    }
}

/// Named combination of selections; the candidate type of a meta-fidelity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub name: String,
    pub selections: Vec<Selection>,
}

impl Projection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selections: Vec::new(),
        }
    }

    pub fn select(mut self, slot: impl Into<String>, candidate: impl Into<String>) -> Self {
        self.selections.push(Selection::new(slot, candidate));
        self
    }
}

impl Named for Projection {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A model fidelity slot: candidates plus an optional morpher.
#[derive(Clone)]
pub struct MultiFidelity {
    fidelity: Fidelity<Candidate>,
    morpher: Option<Arc<dyn Morpher>>,
}

impl MultiFidelity {
    pub fn new(name: impl Into<String>, candidates: Vec<Candidate>) -> Result<Self> {
        Ok(Self {
            fidelity: Fidelity::new(name, candidates)?,
            morpher: None,
        })
    }

    /// Slot whose candidates are the given signatures, named by selector.
    pub fn of_signatures<I>(name: impl Into<String>, signatures: I) -> Result<Self>
    where
        I: IntoIterator<Item = Signature>,
    {
        Self::new(name, signatures.into_iter().map(Candidate::signature).collect())
    }

    pub fn with_selected(mut self, candidate: &str) -> Result<Self> {
        self.fidelity.select(candidate)?;
        Ok(self)
    }

    /// Attach a morpher fired after every evaluation of this slot.
    pub fn with_morpher<F>(mut self, morpher: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut FidelityChanges<'b>, &FidelityView, &Value) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.morpher = Some(Arc::new(morpher));
        self
    }

    pub fn with_morpher_arc(mut self, morpher: Arc<dyn Morpher>) -> Self {
        self.morpher = Some(morpher);
        self
    }

    pub fn name(&self) -> &str {
        self.fidelity.name()
    }

    pub fn fidelity(&self) -> &Fidelity<Candidate> {
        &self.fidelity
    }

    pub(crate) fn fidelity_mut(&mut self) -> &mut Fidelity<Candidate> {
        &mut self.fidelity
    }

    pub fn morpher(&self) -> Option<&Arc<dyn Morpher>> {
        self.morpher.as_ref()
    }
}

impl fmt::Debug for MultiFidelity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiFidelity")
            .field("fidelity", &self.fidelity)
            .field("morpher", &self.morpher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arithmetic() -> Fidelity<Candidate> {
        Fidelity::new(
            "mFi1",
            vec![
                Candidate::signature(Signature::object("add", "Adder")),
                Candidate::signature(Signature::object("multiply", "Multiplier")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_select_known_candidate() {
        let mut fi = arithmetic();
        assert_eq!(fi.selected_name(), "add");
        fi.select("multiply").unwrap();
        assert_eq!(fi.selected_name(), "multiply");
        assert_eq!(
            fi.selected().as_signature().map(Signature::service_type),
            Some("Multiplier")
        );
    }

    #[test]
    fn test_select_unknown_keeps_previous() {
        let mut fi = arithmetic();
        fi.select("multiply").unwrap();
        let err = fi.select("divide").unwrap_err();
        assert!(matches!(err, SorcerError::Config(_)));
        assert!(err.to_string().contains("divide"));
        assert_eq!(fi.selected_name(), "multiply");
    }

    #[test]
    fn test_new_rejects_empty_and_duplicates() {
        assert!(Fidelity::<Candidate>::new("empty", vec![]).is_err());
        let dup = Fidelity::new(
            "dup",
            vec![Candidate::value("a", 1), Candidate::value("a", 2)],
        );
        assert!(matches!(dup, Err(SorcerError::Config(_))));
    }

    #[test]
    fn test_projection_builder_collects_selections() {
        let p = Projection::new("fast")
            .select("mFi1", "add")
            .select("mFi2", "divide");
        assert_eq!(p.selections.len(), 2);
        assert_eq!(p.selections[1], Selection::new("mFi2", "divide"));
    }

    #[test]
    fn test_multi_fidelity_from_signatures() {
        let mf = MultiFidelity::of_signatures(
            "mFi2",
            [
                Signature::object("multiply", "Multiplier"),
                Signature::object("divide", "Divider"),
            ],
        )
        .unwrap()
        .with_selected("divide")
        .unwrap();
        assert_eq!(mf.name(), "mFi2");
        assert_eq!(mf.fidelity().selected_name(), "divide");
        assert!(mf.morpher().is_none());
    }
}
