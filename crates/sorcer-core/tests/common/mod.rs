//! Shared fixtures: an arithmetic provider type registered with the
//! capability registry, plus a call recorder for exactly-once assertions.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use sorcer_core::{ProviderRegistry, ReturnPath, ServiceContext, Session, Signature};

pub const ARITHMETIC: &str = "Arithmetic";

/// Records every operation invocation in order.
#[derive(Debug, Default)]
pub struct Calls(Mutex<Vec<String>>);

impl Calls {
    pub fn record(&self, op: &str) {
        self.0.lock().unwrap().push(op.to_string());
    }

    pub fn count(&self, op: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    pub fn order(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct Arithmetic;

type Op = fn(&[f64]) -> anyhow::Result<f64>;

fn add(args: &[f64]) -> anyhow::Result<f64> {
    Ok(args.iter().sum())
}

fn multiply(args: &[f64]) -> anyhow::Result<f64> {
    Ok(args.iter().product())
}

fn subtract(args: &[f64]) -> anyhow::Result<f64> {
    let (first, rest) = args.split_first().ok_or_else(|| anyhow!("nothing to subtract"))?;
    Ok(first - rest.iter().sum::<f64>())
}

fn divide(args: &[f64]) -> anyhow::Result<f64> {
    let (first, rest) = args.split_first().ok_or_else(|| anyhow!("nothing to divide"))?;
    let divisor: f64 = rest.iter().product();
    if divisor == 0.0 {
        bail!("division by zero");
    }
    Ok(first / divisor)
}

fn numbers(ctx: &ServiceContext) -> anyhow::Result<Vec<f64>> {
    ctx.input_values()
        .into_iter()
        .map(|v| v.as_f64().ok_or_else(|| anyhow!("not a number: {v}")))
        .collect()
}

/// Registry with `Arithmetic` exposing add, multiply, subtract and divide.
pub fn arithmetic(calls: &Arc<Calls>) -> ProviderRegistry {
    let ops: [(&'static str, Op); 4] = [
        ("add", add),
        ("multiply", multiply),
        ("subtract", subtract),
        ("divide", divide),
    ];
    let mut registry = ProviderRegistry::new();
    {
        let mut registration = registry
            .register::<Arithmetic>(ARITHMETIC)
            .constructor(|| Arithmetic);
        for (name, op) in ops {
            let calls = Arc::clone(calls);
            registration =
                registration.operation(name, move |_: &Arithmetic, ctx: &ServiceContext| {
                    calls.record(name);
                    let value = op(&numbers(ctx)?)?;
                    let mut out = ctx.clone();
                    out.set_return_value(value);
                    Ok(out)
                });
        }
    }
    registry
}

/// Object-bound arithmetic signature reading `inputs` and answering at
/// `result`.
pub fn op(selector: &str, result: &str, inputs: &[&str]) -> Signature {
    Signature::object(selector, ARITHMETIC)
        .with_return_path(ReturnPath::new(result).with_inputs(inputs.iter().copied()))
}

pub fn session(calls: &Arc<Calls>) -> Session {
    Session::builder()
        .registry(arithmetic(calls))
        .build()
        .expect("session")
}
