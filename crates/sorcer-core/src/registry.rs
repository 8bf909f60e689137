//! Capability registry for object-bound signatures.
//!
//! Types are registered up front under a type tag together with their
//! constructors and operations. Resolution maps `(type tag, initializer)` to a
//! constructor and `(type tag, selector)` to an invoker; nothing is looked up
//! by name at call time beyond these tables.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ServiceContext;
use crate::error::{Result, SorcerError};
use crate::signature::Initializer;

/// A constructed provider object.
pub type Instance = Arc<dyn Any + Send + Sync>;

type BuildFn = dyn Fn(&[Value]) -> anyhow::Result<Instance> + Send + Sync;
type InvokeFn = dyn Fn(&Instance, &ServiceContext) -> anyhow::Result<ServiceContext> + Send + Sync;

/// Operation of a registered type, callable on an [`Instance`].
#[derive(Clone)]
pub struct Invoker(Arc<InvokeFn>);

impl Invoker {
    pub fn invoke(
        &self,
        instance: &Instance,
        context: &ServiceContext,
    ) -> anyhow::Result<ServiceContext> {
        (self.0)(instance, context)
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invoker(..)")
    }
}

/// Structural type of an argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
    Any,
}

impl ArgType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ArgType::Null,
            Value::Bool(_) => ArgType::Bool,
            Value::Number(n) if n.is_f64() => ArgType::Float,
            Value::Number(_) => ArgType::Int,
            Value::String(_) => ArgType::String,
            Value::Array(_) => ArgType::Array,
            Value::Object(_) => ArgType::Object,
        }
    }

    pub fn matches_exactly(self, value: &Value) -> bool {
        self == ArgType::Any || self == ArgType::of(value)
    }

    /// Convert `value` the way a single-argument constructor of this type
    /// would, or `None` when no such conversion exists.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        if self.matches_exactly(value) {
            return Some(value.clone());
        }
        match (self, value) {
            (ArgType::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (ArgType::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
            (ArgType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ArgType::Bool, Value::String(s)) => s.trim().parse::<bool>().ok().map(Value::from),
            (ArgType::String, Value::Number(n)) => Some(Value::from(n.to_string())),
            (ArgType::String, Value::Bool(b)) => Some(Value::from(b.to_string())),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Constructor {
    /// `None` for the default constructor.
    selector: Option<String>,
    params: Vec<ArgType>,
    build: Arc<BuildFn>,
}

#[derive(Clone, Default)]
struct TypeEntry {
    constructors: Vec<Constructor>,
    operations: HashMap<String, Invoker>,
}

/// Type tag → constructors and operations.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    types: HashMap<String, TypeEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start registering `T` under `type_tag`.
    pub fn register<T>(&mut self, type_tag: impl Into<String>) -> TypeRegistration<'_, T>
    where
        T: Any + Send + Sync,
    {
        let type_tag = type_tag.into();
        let entry = self.types.entry(type_tag.clone()).or_default();
        TypeRegistration {
            type_tag,
            entry,
            _marker: PhantomData,
        }
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.types.contains_key(type_tag)
    }

    pub fn has_operation(&self, type_tag: &str, selector: &str) -> bool {
        self.types
            .get(type_tag)
            .is_some_and(|t| t.operations.contains_key(selector))
    }

    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.types.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    fn entry(&self, type_tag: &str) -> Result<&TypeEntry> {
        self.types.get(type_tag).ok_or_else(|| {
            SorcerError::signature(type_tag, "type is not registered with the provider registry")
        })
    }

    pub fn invoker(&self, type_tag: &str, selector: &str) -> Result<Invoker> {
        self.entry(type_tag)?
            .operations
            .get(selector)
            .cloned()
            .ok_or_else(|| {
                SorcerError::signature(
                    format!("{type_tag}#{selector}"),
                    "operation is not registered",
                )
            })
    }

    /// Construct an instance of `type_tag` as described by `initializer`.
    ///
    /// Positional arguments are matched first by exact structural type, then
    /// by single-argument coercion of each argument.
    pub fn instantiate(&self, type_tag: &str, initializer: &Initializer) -> Result<Instance> {
        let entry = self.entry(type_tag)?;
        let (selector, args): (Option<&str>, &[Value]) = match initializer {
            Initializer::Default => (None, &[]),
            Initializer::Factory(name) => (Some(name.as_str()), &[]),
            Initializer::Init { selector, args } => (Some(selector.as_str()), args.as_slice()),
        };

        let candidates: Vec<&Constructor> = entry
            .constructors
            .iter()
            .filter(|c| c.selector.as_deref() == selector && c.params.len() == args.len())
            .collect();

        let describe = || {
            let types: Vec<String> = args.iter().map(|a| format!("{:?}", ArgType::of(a))).collect();
            format!(
                "{type_tag}::{}({})",
                selector.unwrap_or("new"),
                types.join(", ")
            )
        };

        let exact = candidates.iter().find(|c| {
            c.params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.matches_exactly(arg))
        });
        if let Some(ctor) = exact {
            return (ctor.build)(args).map_err(|e| SorcerError::signature(describe(), format!("{e:#}")));
        }

        for ctor in &candidates {
            let coerced: Option<Vec<Value>> = ctor
                .params
                .iter()
                .zip(args)
                .map(|(param, arg)| param.coerce(arg))
                .collect();
            if let Some(coerced) = coerced {
                return (ctor.build)(&coerced)
                    .map_err(|e| SorcerError::signature(describe(), format!("{e:#}")));
            }
        }

        Err(SorcerError::signature(
            describe(),
            "no matching constructor or factory",
        ))
    }
}

/// Builder returned by [`ProviderRegistry::register`].
pub struct TypeRegistration<'r, T> {
    type_tag: String,
    entry: &'r mut TypeEntry,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T> TypeRegistration<'r, T>
where
    T: Any + Send + Sync,
{
    fn push(&mut self, selector: Option<String>, params: Vec<ArgType>, build: Arc<BuildFn>) {
        self.entry.constructors.push(Constructor {
            selector,
            params,
            build,
        });
    }

    /// Default (no-argument) constructor.
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.push(None, Vec::new(), Arc::new(move |_| Ok(Arc::new(f()) as Instance)));
        self
    }

    /// Named no-argument factory.
    pub fn factory<F>(mut self, selector: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.push(
            Some(selector.into()),
            Vec::new(),
            Arc::new(move |_| Ok(Arc::new(f()) as Instance)),
        );
        self
    }

    /// Named initializer taking positional arguments of the given types.
    pub fn init<F>(mut self, selector: impl Into<String>, params: &[ArgType], f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.push(
            Some(selector.into()),
            params.to_vec(),
            Arc::new(move |args| Ok(Arc::new(f(args)?) as Instance)),
        );
        self
    }

    /// Operation invoked for `selector` on instances of `T`.
    pub fn operation<F>(self, selector: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T, &ServiceContext) -> anyhow::Result<ServiceContext> + Send + Sync + 'static,
    {
        let type_tag = self.type_tag.clone();
        let invoke = move |instance: &Instance, ctx: &ServiceContext| {
            let target = instance
                .downcast_ref::<T>()
                .ok_or_else(|| anyhow!("instance is not a {type_tag}"))?;
            f(target, ctx)
        };
        self.entry
            .operations
            .insert(selector.into(), Invoker(Arc::new(invoke)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Scaler {
        factor: f64,
    }

    fn registry() -> ProviderRegistry {
        let mut reg = ProviderRegistry::new();
        reg.register::<Scaler>("Scaler")
            .constructor(|| Scaler { factor: 1.0 })
            .factory("doubling", || Scaler { factor: 2.0 })
            .init("withFactor", &[ArgType::Float], |args| {
                let factor = args[0].as_f64().ok_or_else(|| anyhow!("factor"))?;
                Ok(Scaler { factor })
            })
            .operation("scale", |s: &Scaler, ctx: &ServiceContext| {
                let x = ctx.get_f64("x").unwrap_or_default();
                let mut out = ctx.clone();
                out.set_return_value(x * s.factor);
                Ok(out)
            });
        reg
    }

    fn scale(reg: &ProviderRegistry, init: &Initializer) -> f64 {
        let instance = reg.instantiate("Scaler", init).unwrap();
        let invoker = reg.invoker("Scaler", "scale").unwrap();
        let ctx = ServiceContext::new("t").with_in("x", 3.0);
        invoker
            .invoke(&instance, &ctx)
            .unwrap()
            .return_value()
            .and_then(Value::as_f64)
            .unwrap()
    }

    #[test]
    fn test_default_factory_and_init_constructors() {
        let reg = registry();
        assert_eq!(scale(&reg, &Initializer::Default), 3.0);
        assert_eq!(scale(&reg, &Initializer::Factory("doubling".into())), 6.0);
        let init = Initializer::Init {
            selector: "withFactor".into(),
            args: vec![json!(0.5)],
        };
        assert_eq!(scale(&reg, &init), 1.5);
    }

    #[test]
    fn test_init_coerces_int_and_string_arguments() {
        let reg = registry();
        let from_int = Initializer::Init {
            selector: "withFactor".into(),
            args: vec![json!(4)],
        };
        assert_eq!(scale(&reg, &from_int), 12.0);

        let from_str = Initializer::Init {
            selector: "withFactor".into(),
            args: vec![json!("10")],
        };
        assert_eq!(scale(&reg, &from_str), 30.0);
    }

    #[test]
    fn test_unmatched_initializer_is_signature_error() {
        let reg = registry();
        let bad = Initializer::Init {
            selector: "withFactor".into(),
            args: vec![json!({"factor": 1})],
        };
        match reg.instantiate("Scaler", &bad) {
            Err(SorcerError::Signature { signature, .. }) => {
                assert!(signature.contains("withFactor(Object)"));
            }
            Err(other) => panic!("expected Signature error, got {other:?}"),
            Ok(_) => panic!("expected Signature error"),
        }
        assert!(reg
            .instantiate("Scaler", &Initializer::Factory("missing".into()))
            .is_err());
        assert!(reg.instantiate("Unknown", &Initializer::Default).is_err());
    }

    #[test]
    fn test_unknown_operation_is_signature_error() {
        let reg = registry();
        assert!(reg.has_operation("Scaler", "scale"));
        assert!(matches!(
            reg.invoker("Scaler", "shrink"),
            Err(SorcerError::Signature { .. })
        ));
    }

    #[test]
    fn test_arg_type_coercion_table() {
        assert_eq!(ArgType::Float.coerce(&json!(2)), Some(json!(2.0)));
        assert_eq!(ArgType::Int.coerce(&json!("7")), Some(json!(7)));
        assert_eq!(ArgType::String.coerce(&json!(true)), Some(json!("true")));
        assert_eq!(ArgType::Int.coerce(&json!(1.5)), None);
        assert_eq!(ArgType::Any.coerce(&json!([1])), Some(json!([1])));
    }
}
