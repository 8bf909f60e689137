//! Dependency-ordered evaluation of model paths.
//!
//! A [`Pass`] owns its per-path state table and working context; nothing in
//! it is shared, so it needs no locking. Each computed path moves through
//! `Resolving -> Evaluating -> Value | Failed` and keeps its outcome until
//! the next tick. Reaching a path that is still `Resolving` or `Evaluating`
//! means it is on the current call stack, which is a cycle.
//!
//! Morphers never mutate the fidelity manager mid-pass: their requests are
//! staged and committed by [`Pass::finish`] or [`Pass::next_tick`]. A pass
//! dropped with changes still staged discards them and logs a warning.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, Instrument};

use crate::context::{ServiceContext, RESULT_PATH};
use crate::error::{Result, SorcerError};
use crate::fidelity::{Candidate, Change, FidelityChanges};
use crate::model::{Entry, Model};
use crate::obs;
use crate::resolve::CancelToken;
use crate::session::Session;
use crate::signature::Signature;

#[derive(Debug, Clone, PartialEq)]
enum PathState {
    Resolving,
    Evaluating,
    Value(Value),
    Failed(SorcerError),
}

/// Outcome of [`Pass::responses`]: every requested path is in exactly one
/// of the two maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Responses {
    pub values: BTreeMap<String, Value>,
    pub failures: BTreeMap<String, SorcerError>,
}

impl Responses {
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn failure(&self, path: &str) -> Option<&SorcerError> {
        self.failures.get(path)
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// The values, or the first failure in path order.
    pub fn into_result(self) -> Result<BTreeMap<String, Value>> {
        match self.failures.into_values().next() {
            Some(error) => Err(error),
            None => Ok(self.values),
        }
    }
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            obs::emit_reconfiguration_discarded(self.model.name(), self.staged.len());
        }
    }
}

/// One evaluation pass over a model.
///
/// End it with [`finish`](Pass::finish); dropping it instead discards any
/// reconfiguration its morphers staged.
#[must_use = "staged reconfiguration is only committed by `finish` or `next_tick`"]
pub struct Pass<'s> {
    session: &'s Session,
    model: &'s Model,
    states: HashMap<String, PathState>,
    stack: Vec<String>,
    overrides: BTreeMap<String, Value>,
    context: ServiceContext,
    staged: Vec<Change>,
    cancel: CancelToken,
    tick: u64,
}

impl<'s> Pass<'s> {
    pub fn new(session: &'s Session, model: &'s Model) -> Self {
        let mut pass = Self {
            session,
            model,
            states: HashMap::new(),
            stack: Vec::new(),
            overrides: BTreeMap::new(),
            context: ServiceContext::new(model.name()),
            staged: Vec::new(),
            cancel: CancelToken::new(),
            tick: 0,
        };
        pass.reset_context();
        pass
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Working context: inputs plus every value computed so far.
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Reconfiguration requested by morphers and not yet committed.
    pub fn staged(&self) -> &[Change] {
        &self.staged
    }

    /// Override `path` with a literal value and start a new tick.
    pub fn put_input(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        if !self.model.contains(path) {
            return Err(SorcerError::UnknownPath(path.to_string()));
        }
        self.overrides.insert(path.to_string(), value.into());
        self.next_tick()
    }

    /// Commit staged reconfiguration and clear every cached path outcome.
    /// Fidelity selections and input overrides are kept.
    ///
    /// The tick advances even when the commit fails; the rejected changes
    /// stay staged until [`discard_staged`](Self::discard_staged).
    pub fn next_tick(&mut self) -> Result<()> {
        let committed = self.commit();
        self.states.clear();
        self.stack.clear();
        self.reset_context();
        self.tick += 1;
        committed
    }

    /// Commit staged reconfiguration and end the pass.
    pub fn finish(mut self) -> Result<()> {
        self.commit()
    }

    /// Drop staged reconfiguration without applying it.
    pub fn discard_staged(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.staged)
    }

    pub async fn response(&mut self, path: &str) -> Result<Value> {
        self.model.initialize()?;
        let span = obs::pass_span(self.model.name(), self.tick);
        self.evaluate(path).instrument(span).await
    }

    /// Evaluate every path in `paths` sharing this pass's cache. A failed
    /// path does not stop the others.
    pub async fn responses(&mut self, paths: &[String]) -> Responses {
        let mut responses = Responses::default();
        if let Err(error) = self.model.initialize() {
            for path in paths {
                responses.failures.insert(path.clone(), error.clone());
            }
            return responses;
        }
        let span = obs::pass_span(self.model.name(), self.tick);
        async move {
            obs::emit_pass_started(self.model.name(), self.tick, paths);
            for path in paths {
                match self.evaluate(path).await {
                    Ok(value) => {
                        responses.values.insert(path.clone(), value);
                    }
                    Err(error) => {
                        responses.failures.insert(path.clone(), error);
                    }
                }
            }
            responses
        }
        .instrument(span)
        .await
    }

    fn commit(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        debug!(changes = self.staged.len(), "committing staged reconfiguration");
        self.model.fidelities().apply(&self.staged)?;
        self.staged.clear();
        Ok(())
    }

    fn reset_context(&mut self) {
        let mut context = ServiceContext::new(self.model.name());
        for (path, value) in self.model.inputs() {
            context.put_in(path, value.clone());
        }
        for (path, value) in &self.overrides {
            context.put_in(path.clone(), value.clone());
        }
        self.context = context;
    }

    fn evaluate<'p>(&'p mut self, path: &'p str) -> BoxFuture<'p, Result<Value>> {
        Box::pin(async move {
            match self.states.get(path) {
                Some(PathState::Value(value)) => return Ok(value.clone()),
                Some(PathState::Failed(error)) => return Err(error.clone()),
                Some(PathState::Resolving | PathState::Evaluating) => {
                    let start = self.stack.iter().position(|p| p == path).unwrap_or(0);
                    let mut cycle = self.stack[start..].to_vec();
                    cycle.push(path.to_string());
                    return Err(SorcerError::CyclicDependency { cycle });
                }
                None => {}
            }
            if self.cancel.is_cancelled() {
                return Err(SorcerError::Cancelled);
            }

            if let Some(value) = self.overrides.get(path) {
                return Ok(value.clone());
            }
            let model = self.model;
            let entry = model
                .entry(path)
                .ok_or_else(|| SorcerError::UnknownPath(path.to_string()))?;
            if let Entry::Input(value) = entry {
                return Ok(value.clone());
            }

            let started = Instant::now();
            self.states.insert(path.to_string(), PathState::Resolving);
            self.stack.push(path.to_string());
            let result = self.compute(path, entry).await;
            self.stack.pop();

            match &result {
                Ok(value) => {
                    self.context.put_out(path, value.clone());
                    self.states
                        .insert(path.to_string(), PathState::Value(value.clone()));
                    obs::emit_path_evaluated(path, started.elapsed().as_millis() as u64);
                }
                Err(error) => {
                    self.states
                        .insert(path.to_string(), PathState::Failed(error.clone()));
                    obs::emit_path_failed(path, error);
                }
            }
            result
        })
    }

    async fn compute(&mut self, path: &str, entry: &'s Entry) -> Result<Value> {
        let model = self.model;
        for dependency in model.dependencies(path) {
            self.evaluate(dependency).await?;
        }

        let (value, morphed) = match entry {
            Entry::Srv(signature) => (self.run_signature(path, signature).await?, false),
            Entry::Fidelity => match model.fidelities().selected(path)? {
                Candidate::Signature { signature, .. } => {
                    (self.run_signature(path, &signature).await?, true)
                }
                Candidate::Value { value, .. } => {
                    self.states.insert(path.to_string(), PathState::Evaluating);
                    (value, true)
                }
            },
            Entry::Input(value) => (value.clone(), false),
        };

        if morphed {
            self.morph(path, &value)?;
        }
        Ok(value)
    }

    async fn run_signature(&mut self, path: &str, signature: &Signature) -> Result<Value> {
        let model = self.model;
        for input in signature.input_paths() {
            let computed = model.entry(&input).is_some_and(Entry::is_computed);
            if computed && input != path {
                self.evaluate(&input).await?;
            }
        }

        self.states.insert(path.to_string(), PathState::Evaluating);

        let mut input = match signature.in_connector() {
            Some(connector) => connector.map_in(&self.context),
            None => {
                let paths = signature
                    .return_path()
                    .map(|rp| rp.in_paths.clone())
                    .unwrap_or_default();
                if paths.is_empty() {
                    self.context.clone()
                } else {
                    self.context.sub_context(&paths)
                }
            }
        };
        input.set_return_path(signature.return_path().cloned());

        let siblings = if signature.is_provisionable() {
            model.signatures()
        } else {
            Vec::new()
        };
        let session = self.session;
        let bound = session.resolve(signature, &siblings, &self.cancel).await?;
        let output = session
            .invoke(&bound, signature, input, &self.cancel)
            .await
            .map_err(|e| e.at_path(path))?;
        session.metrics().inc_evaluations();

        let result_path = signature
            .return_path()
            .map(|rp| rp.path.as_str())
            .unwrap_or(RESULT_PATH);
        let value = output
            .get_value(result_path)
            .or_else(|| output.get_value(RESULT_PATH))
            .cloned()
            .ok_or_else(|| SorcerError::Evaluation {
                path: path.to_string(),
                reason: format!("{signature} produced no value at '{result_path}'"),
            })?;

        if let Some(connector) = signature.out_connector() {
            self.context.merge(&connector.map_out(&output));
        }
        if let Some(rp) = signature.return_path() {
            for out_path in &rp.out_paths {
                if let Some(extra) = output.get_value(out_path) {
                    self.context.put_out(out_path.clone(), extra.clone());
                }
            }
        }
        Ok(value)
    }

    /// Fire the slot's morpher; its requests are staged only if it succeeds.
    fn morph(&mut self, path: &str, value: &Value) -> Result<()> {
        let fidelities = self.model.fidelities();
        let Some(morpher) = fidelities.morpher(path) else {
            return Ok(());
        };
        let view = fidelities.view(path)?;
        let mut changes = FidelityChanges::new(fidelities);
        morpher
            .update(&mut changes, &view, value)
            .map_err(|e| SorcerError::evaluation(path, &e))?;
        self.session.metrics().inc_morphs();
        let staged = changes.into_staged();
        if !staged.is_empty() {
            debug!(slot = path, changes = staged.len(), "morpher staged reconfiguration");
            self.staged.extend(staged);
        }
        Ok(())
    }
}
