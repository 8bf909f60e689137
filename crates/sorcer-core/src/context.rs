//! Service contexts: the directional path/value store signatures read from
//! and write into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path a provider writes its result to when no return path is declared.
pub const RESULT_PATH: &str = "result/value";

/// Data flow direction of a context entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn is_input(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// A single value stored in a [`ServiceContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub value: Value,
    pub direction: Direction,
}

/// Where a result is read from and how it is tagged in the caller's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnPath {
    pub path: String,
    pub direction: Direction,
    /// Input paths handed to the provider, in argument order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_paths: Vec<String>,
    /// Extra provider paths copied back into the caller's context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_paths: Vec<String>,
}

impl ReturnPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Out,
            in_paths: Vec::new(),
            out_paths: Vec::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.in_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.out_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Maps external (caller) path names to internal (provider) path names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    mappings: Vec<(String, String)>,
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping `external -> internal`.
    pub fn map(mut self, external: impl Into<String>, internal: impl Into<String>) -> Self {
        self.mappings.push((external.into(), internal.into()));
        self
    }

    pub fn external_paths(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(|(external, _)| external.as_str())
    }

    /// Build the provider-side context from the caller's context. Unmapped
    /// entries are dropped.
    pub fn map_in(&self, source: &ServiceContext) -> ServiceContext {
        let mut mapped = ServiceContext::new(source.name());
        for (external, internal) in &self.mappings {
            if let Some(value) = source.get_value(external) {
                mapped.put_value(internal.clone(), value.clone(), Direction::In);
            }
        }
        mapped
    }

    /// Build the caller-side view of a provider's result context.
    pub fn map_out(&self, result: &ServiceContext) -> ServiceContext {
        let mut mapped = ServiceContext::new(result.name());
        for (external, internal) in &self.mappings {
            if let Some(value) = result.get_value(internal) {
                mapped.put_value(external.clone(), value.clone(), Direction::Out);
            }
        }
        mapped
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Named, directional mapping from path to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceContext {
    name: String,
    entries: BTreeMap<String, ContextEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_path: Option<ReturnPath>,
}

impl ServiceContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
            return_path: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put_value(
        &mut self,
        path: impl Into<String>,
        value: impl Into<Value>,
        direction: Direction,
    ) -> &mut Self {
        self.entries.insert(
            path.into(),
            ContextEntry {
                value: value.into(),
                direction,
            },
        );
        self
    }

    pub fn put_in(&mut self, path: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.put_value(path, value, Direction::In)
    }

    pub fn put_out(&mut self, path: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.put_value(path, value, Direction::Out)
    }

    /// Builder form of [`put_in`](Self::put_in).
    pub fn with_in(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put_in(path, value);
        self
    }

    pub fn get_value(&self, path: &str) -> Option<&Value> {
        self.entries.get(path).map(|e| &e.value)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_value(path).and_then(Value::as_f64)
    }

    pub fn direction(&self, path: &str) -> Option<Direction> {
        self.entries.get(path).map(|e| e.direction)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// `true` when `path` holds a non-null value.
    pub fn is_computed(&self, path: &str) -> bool {
        matches!(self.get_value(path), Some(v) if !v.is_null())
    }

    pub fn remove(&mut self, path: &str) -> Option<ContextEntry> {
        self.entries.remove(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn return_path(&self) -> Option<&ReturnPath> {
        self.return_path.as_ref()
    }

    pub fn set_return_path(&mut self, return_path: Option<ReturnPath>) {
        self.return_path = return_path;
    }

    /// Path the result of an invocation is read from.
    pub fn result_path(&self) -> &str {
        self.return_path
            .as_ref()
            .map(|rp| rp.path.as_str())
            .unwrap_or(RESULT_PATH)
    }

    /// Write a provider result at the return path (or [`RESULT_PATH`]).
    pub fn set_return_value(&mut self, value: impl Into<Value>) -> &mut Self {
        let direction = self
            .return_path
            .as_ref()
            .map(|rp| rp.direction)
            .unwrap_or(Direction::Out);
        let path = self.result_path().to_string();
        self.put_value(path, value, direction)
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.get_value(self.result_path())
    }

    /// Arguments for a provider: the return path's input paths in order,
    /// or every input entry in path order.
    pub fn input_values(&self) -> Vec<&Value> {
        match &self.return_path {
            Some(rp) if !rp.in_paths.is_empty() => rp
                .in_paths
                .iter()
                .filter_map(|p| self.get_value(p))
                .collect(),
            _ => self
                .entries
                .values()
                .filter(|e| e.direction.is_input())
                .map(|e| &e.value)
                .collect(),
        }
    }

    /// Copy of the entries named by `paths`, missing ones skipped.
    pub fn sub_context(&self, paths: &[String]) -> ServiceContext {
        let mut sub = ServiceContext::new(self.name.clone());
        for path in paths {
            if let Some(entry) = self.entries.get(path) {
                sub.entries.insert(path.clone(), entry.clone());
            }
        }
        sub
    }

    /// Merge `other` into `self`; entries of `other` win.
    pub fn merge(&mut self, other: &ServiceContext) {
        for (path, entry) in &other.entries {
            self.entries.insert(path.clone(), entry.clone());
        }
    }

    /// Flatten to a JSON object `{path: value}`.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect(),
        )
    }
}
