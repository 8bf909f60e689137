//! JSON model descriptions over the built-in arithmetic providers.
//!
//! ```json
//! {
//!   "name": "arithmetic",
//!   "inputs": { "x1": 10.0, "x2": 50.0 },
//!   "entries": { "product": { "op": "multiply", "args": ["x1", "x2"] } },
//!   "fidelities": {
//!     "mFi1": {
//!       "candidates": {
//!         "add": { "op": "add", "args": ["x1", "x2"] },
//!         "fixed": { "value": 1.0 }
//!       },
//!       "selected": "add"
//!     }
//!   },
//!   "metas": { "mode": { "fast": { "mFi1": "fixed" } } },
//!   "depends": {},
//!   "responses": ["product"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sorcer_core::{Candidate, Fidelity, Model, MultiFidelity, Projection};

use crate::providers;

/// A computed entry: an arithmetic operation over context paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSpec {
    pub op: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Result path inside the provider context; `{path}/out` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl OpSpec {
    fn signature(&self, path: &str) -> sorcer_core::Signature {
        let result = self
            .result
            .clone()
            .unwrap_or_else(|| format!("{path}/out"));
        providers::signature(&self.op, &result, &self.args)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateSpec {
    Op(OpSpec),
    Value { value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FidelitySpec {
    /// Sorted by name; the first is selected unless `selected` is set.
    pub candidates: BTreeMap<String, CandidateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFile {
    pub name: String,
    pub inputs: BTreeMap<String, Value>,
    pub entries: BTreeMap<String, OpSpec>,
    pub fidelities: BTreeMap<String, FidelitySpec>,
    /// meta-fidelity -> projection -> slot -> candidate
    pub metas: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    pub depends: BTreeMap<String, Vec<String>>,
    pub responses: Vec<String>,
}

impl ModelFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid model file {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_model(self) -> sorcer_core::Result<Arc<Model>> {
        let name = if self.name.is_empty() {
            "model".to_string()
        } else {
            self.name
        };
        let mut builder = Model::builder(name);
        for (path, value) in self.inputs {
            builder = builder.input(path, value);
        }
        for (path, declared) in &self.entries {
            builder = builder.srv(path.clone(), declared.signature(path));
        }
        for (slot, declared) in self.fidelities {
            let candidates = declared
                .candidates
                .into_iter()
                .map(|(name, candidate)| match candidate {
                    CandidateSpec::Op(op) => Candidate::named(name, op.signature(&slot)),
                    CandidateSpec::Value { value } => Candidate::value(name, value),
                })
                .collect();
            let mut fidelity = MultiFidelity::new(slot.as_str(), candidates)?;
            if let Some(selected) = &declared.selected {
                fidelity = fidelity.with_selected(selected)?;
            }
            builder = builder.fidelity(fidelity);
        }
        for (meta, projections) in self.metas {
            let projections = projections
                .into_iter()
                .map(|(name, selections)| {
                    selections
                        .into_iter()
                        .fold(Projection::new(name), |p, (slot, candidate)| {
                            p.select(slot, candidate)
                        })
                })
                .collect();
            builder = builder.meta_fidelity(Fidelity::new(meta, projections)?);
        }
        for (path, on) in self.depends {
            builder = builder.depends(path, on);
        }
        builder.responses(self.responses).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidates_of_both_shapes() {
        let file = ModelFile::from_json(
            r#"{
                "name": "m",
                "inputs": {"x": 2.0},
                "fidelities": {
                    "f": {
                        "candidates": {
                            "double": {"op": "add", "args": ["x", "x"]},
                            "fixed": {"value": 7}
                        },
                        "selected": "fixed"
                    }
                },
                "responses": ["f"]
            }"#,
        )
        .unwrap();
        let slot = &file.fidelities["f"];
        assert!(matches!(slot.candidates["double"], CandidateSpec::Op(_)));
        assert!(matches!(slot.candidates["fixed"], CandidateSpec::Value { .. }));

        let model = file.into_model().unwrap();
        assert_eq!(model.fidelities().selected_name("f").unwrap(), "fixed");
        assert_eq!(model.response_paths(), ["f".to_string()]);
    }

    #[test]
    fn test_unknown_selection_is_config_error() {
        let file = ModelFile::from_json(
            r#"{"fidelities": {"f": {"candidates": {"a": {"value": 1}}, "selected": "b"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            file.into_model(),
            Err(sorcer_core::SorcerError::Config(_))
        ));
    }

    #[test]
    fn test_default_result_path_is_under_entry() {
        let entry = OpSpec {
            op: "add".into(),
            args: vec!["x".into()],
            result: None,
        };
        let sig = entry.signature("sum");
        assert_eq!(sig.return_path().map(|rp| rp.path.as_str()), Some("sum/out"));
    }
}
