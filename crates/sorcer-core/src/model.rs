//! Models: named entries, declared dependencies and the fidelity slots that
//! back some of the entries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, SorcerError};
use crate::fidelity::{Candidate, Fidelity, FidelityManager, MultiFidelity, Projection};
use crate::signature::Signature;

/// What a model path is bound to.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Literal input value.
    Input(Value),
    /// Computed by a signature.
    Srv(Signature),
    /// Computed by the selected candidate of the fidelity slot with the
    /// same name as the path.
    Fidelity,
}

impl Entry {
    pub fn is_computed(&self) -> bool {
        !matches!(self, Entry::Input(_))
    }
}

pub type InitHook = Arc<dyn Fn(&FidelityManager) -> anyhow::Result<()> + Send + Sync>;

pub struct Model {
    name: String,
    entries: BTreeMap<String, Entry>,
    dependencies: HashMap<String, Vec<String>>,
    responses: Vec<String>,
    fidelities: FidelityManager,
    init: Option<InitHook>,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().filter_map(|(path, entry)| match entry {
            Entry::Input(value) => Some((path.as_str(), value)),
            _ => None,
        })
    }

    /// Declared dependencies of `path`, empty when none.
    pub fn dependencies(&self, path: &str) -> &[String] {
        self.dependencies
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Default response paths.
    pub fn response_paths(&self) -> &[String] {
        &self.responses
    }

    pub fn fidelities(&self) -> &FidelityManager {
        &self.fidelities
    }

    /// Every signature the model can invoke: entry signatures plus every
    /// signature candidate of every fidelity slot.
    pub fn signatures(&self) -> Vec<Signature> {
        let mut signatures: Vec<Signature> = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Srv(sig) => Some(sig.clone()),
                _ => None,
            })
            .collect();
        for slot in self.fidelities.slot_names() {
            if let Ok(candidates) = self.fidelities.candidates(&slot) {
                signatures.extend(candidates.into_iter().filter_map(|c| match c {
                    Candidate::Signature { signature, .. } => Some(signature),
                    Candidate::Value { .. } => None,
                }));
            }
        }
        signatures
    }

    /// Paths `path` needs before it can be computed: declared dependencies
    /// followed by computed paths its signature reads.
    pub fn requirements(&self, path: &str) -> Vec<String> {
        let mut required: Vec<String> = self.dependencies(path).to_vec();
        let signature = match self.entries.get(path) {
            Some(Entry::Srv(sig)) => Some(sig.clone()),
            Some(Entry::Fidelity) => self
                .fidelities
                .selected(path)
                .ok()
                .and_then(|c| c.as_signature().cloned()),
            _ => None,
        };
        if let Some(signature) = signature {
            for input in signature.input_paths() {
                let computed = self.entries.get(&input).is_some_and(Entry::is_computed);
                if computed && input != path && !required.contains(&input) {
                    required.push(input);
                }
            }
        }
        required
    }

    /// Order in which `targets` and everything they require would be
    /// computed under the current fidelity selection.
    ///
    /// Fails with [`SorcerError::CyclicDependency`] naming the cycle.
    pub fn evaluation_order(&self, targets: &[String]) -> Result<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            model: &Model,
            path: &str,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            match marks.get(path) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|p| p == path).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(path.to_string());
                    return Err(SorcerError::CyclicDependency { cycle });
                }
                None => {}
            }
            if !model.contains(path) {
                return Err(SorcerError::UnknownPath(path.to_string()));
            }
            marks.insert(path.to_string(), Mark::Visiting);
            stack.push(path.to_string());
            for required in model.requirements(path) {
                visit(model, &required, marks, stack, order)?;
            }
            stack.pop();
            marks.insert(path.to_string(), Mark::Done);
            if model.entries.get(path).is_some_and(Entry::is_computed) {
                order.push(path.to_string());
            }
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        let mut order = Vec::new();
        for target in targets {
            visit(self, target, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    /// Run the init hook if this is the first call.
    pub fn initialize(&self) -> Result<bool> {
        match &self.init {
            Some(hook) => self.fidelities.initialize(|manager| hook(manager)),
            None => self.fidelities.initialize(|_| Ok(())),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("entries", &self.entries)
            .field("dependencies", &self.dependencies)
            .field("responses", &self.responses)
            .field("fidelities", &self.fidelities)
            .finish()
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    name: String,
    entries: Vec<(String, Entry)>,
    dependencies: Vec<(String, Vec<String>)>,
    responses: Vec<String>,
    fidelities: Vec<MultiFidelity>,
    metas: Vec<Fidelity<Projection>>,
    init: Option<InitHook>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            dependencies: Vec::new(),
            responses: Vec::new(),
            fidelities: Vec::new(),
            metas: Vec::new(),
            init: None,
        }
    }

    pub fn input(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((path.into(), Entry::Input(value.into())));
        self
    }

    pub fn srv(mut self, path: impl Into<String>, signature: Signature) -> Self {
        self.entries.push((path.into(), Entry::Srv(signature)));
        self
    }

    /// Entry computed by a fidelity slot; the path is the slot's name.
    pub fn fidelity(mut self, fidelity: MultiFidelity) -> Self {
        self.entries
            .push((fidelity.name().to_string(), Entry::Fidelity));
        self.fidelities.push(fidelity);
        self
    }

    pub fn meta_fidelity(mut self, meta: Fidelity<Projection>) -> Self {
        self.metas.push(meta);
        self
    }

    /// `path` needs every path in `on` first.
    pub fn depends<I, S>(mut self, path: impl Into<String>, on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .push((path.into(), on.into_iter().map(Into::into).collect()));
        self
    }

    pub fn responses<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Hook run once, before the first evaluation, to register further
    /// fidelities or meta-fidelities.
    pub fn init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FidelityManager) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(hook));
        self
    }

    /// Cycles are not rejected here; they surface when evaluated.
    pub fn build(self) -> Result<Arc<Model>> {
        let mut entries = BTreeMap::new();
        for (path, entry) in self.entries {
            if entries.insert(path.clone(), entry).is_some() {
                return Err(SorcerError::config(format!(
                    "model '{}' declares path '{path}' twice",
                    self.name
                )));
            }
        }

        let fidelities = FidelityManager::new();
        for fidelity in self.fidelities {
            fidelities.add_fidelity(fidelity)?;
        }
        for meta in self.metas {
            fidelities.add_meta_fidelity(meta)?;
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for (path, on) in self.dependencies {
            let known: HashSet<&String> = entries.keys().collect();
            if !known.contains(&path) {
                return Err(SorcerError::UnknownPath(path));
            }
            if let Some(missing) = on.iter().find(|p| !known.contains(p)) {
                return Err(SorcerError::UnknownPath(missing.clone()));
            }
            let deps = dependencies.entry(path).or_default();
            for dep in on {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }

        if let Some(missing) = self.responses.iter().find(|p| !entries.contains_key(*p)) {
            return Err(SorcerError::UnknownPath(missing.clone()));
        }

        Ok(Arc::new(Model {
            name: self.name,
            entries,
            dependencies,
            responses: self.responses,
            fidelities,
            init: self.init,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReturnPath;

    fn arithmetic() -> ModelBuilder {
        Model::builder("arithmetic")
            .input("x1", 10.0)
            .input("x2", 50.0)
            .input("x3", 20.0)
            .input("x4", 80.0)
            .srv(
                "multiply",
                Signature::object("multiply", "Multiplier")
                    .with_return_path(ReturnPath::new("multiply/out").with_inputs(["x1", "x2"])),
            )
            .srv(
                "add",
                Signature::object("add", "Adder")
                    .with_return_path(ReturnPath::new("add/out").with_inputs(["x3", "x4"])),
            )
            .srv(
                "subtract",
                Signature::object("subtract", "Subtractor").with_return_path(
                    ReturnPath::new("subtract/out").with_inputs(["multiply", "add"]),
                ),
            )
            .responses(["subtract"])
    }

    #[test]
    fn test_build_rejects_unknown_dependency() {
        let err = arithmetic().depends("subtract", ["divide"]).build().unwrap_err();
        assert_eq!(err, SorcerError::UnknownPath("divide".into()));
    }

    #[test]
    fn test_build_rejects_duplicate_paths() {
        let err = arithmetic().input("x1", 1.0).build().unwrap_err();
        assert!(matches!(err, SorcerError::Config(_)));
    }

    #[test]
    fn test_requirements_include_signature_inputs() {
        let model = arithmetic().build().unwrap();
        assert_eq!(
            model.requirements("subtract"),
            vec!["multiply".to_string(), "add".to_string()]
        );
        assert!(model.requirements("multiply").is_empty());
    }

    #[test]
    fn test_evaluation_order_puts_dependencies_first() {
        let model = arithmetic().build().unwrap();
        let order = model.evaluation_order(&["subtract".to_string()]).unwrap();
        assert_eq!(order, vec!["multiply", "add", "subtract"]);
    }

    #[test]
    fn test_evaluation_order_reports_cycles() {
        let model = arithmetic()
            .depends("multiply", ["subtract"])
            .build()
            .unwrap();
        match model.evaluation_order(&["subtract".to_string()]) {
            Err(SorcerError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["subtract", "multiply", "subtract"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_fidelity_entry_registers_slot() {
        let model = arithmetic()
            .fidelity(
                MultiFidelity::of_signatures(
                    "mFi1",
                    [
                        Signature::object("add", "Adder"),
                        Signature::object("multiply", "Multiplier"),
                    ],
                )
                .unwrap(),
            )
            .build()
            .unwrap();
        assert!(matches!(model.entry("mFi1"), Some(Entry::Fidelity)));
        assert_eq!(model.fidelities().selected_name("mFi1").unwrap(), "add");
        assert_eq!(model.signatures().len(), 5);
    }

    #[test]
    fn test_initialize_runs_hook_once() {
        let model = arithmetic()
            .init(|manager| {
                manager.add_fidelity(MultiFidelity::new(
                    "late",
                    vec![Candidate::value("one", 1), Candidate::value("two", 2)],
                )?)?;
                Ok(())
            })
            .build()
            .unwrap();
        assert!(model.initialize().unwrap());
        assert!(!model.initialize().unwrap());
        assert!(model.fidelities().contains("late"));
    }
}
