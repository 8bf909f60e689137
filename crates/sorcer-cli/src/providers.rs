//! Built-in arithmetic providers available to model files.

use anyhow::{anyhow, bail};
use sorcer_core::{ProviderRegistry, ReturnPath, ServiceContext, Signature};

/// Type tag of the built-in arithmetic provider.
pub const ARITHMETIC: &str = "Arithmetic";

/// Operation selectors understood by [`registry`].
pub const OPERATIONS: [&str; 5] = ["add", "subtract", "multiply", "divide", "average"];

struct Arithmetic;

fn apply(op: &str, args: &[f64]) -> anyhow::Result<f64> {
    let (first, rest) = match args.split_first() {
        Some(split) => split,
        None => bail!("{op} needs at least one argument"),
    };
    match op {
        "add" => Ok(args.iter().sum()),
        "multiply" => Ok(args.iter().product()),
        "subtract" => Ok(first - rest.iter().sum::<f64>()),
        "divide" => {
            let divisor: f64 = rest.iter().product();
            if divisor == 0.0 {
                bail!("division by zero");
            }
            Ok(first / divisor)
        }
        "average" => Ok(args.iter().sum::<f64>() / args.len() as f64),
        other => Err(anyhow!("unknown operation '{other}'")),
    }
}

fn arguments(ctx: &ServiceContext) -> anyhow::Result<Vec<f64>> {
    ctx.input_values()
        .into_iter()
        .map(|v| v.as_f64().ok_or_else(|| anyhow!("argument {v} is not a number")))
        .collect()
}

/// Registry exposing every operation in [`OPERATIONS`] on [`ARITHMETIC`].
pub fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    {
        let mut registration = registry
            .register::<Arithmetic>(ARITHMETIC)
            .constructor(|| Arithmetic);
        for op in OPERATIONS {
            registration =
                registration.operation(op, move |_: &Arithmetic, ctx: &ServiceContext| {
                    let value = apply(op, &arguments(ctx)?)?;
                    let mut out = ctx.clone();
                    out.set_return_value(value);
                    Ok(out)
                });
        }
    }
    registry
}

/// Object-bound signature for `op` reading `args` and answering at `result`.
pub fn signature(op: &str, result: &str, args: &[String]) -> Signature {
    Signature::object(op, ARITHMETIC)
        .with_return_path(ReturnPath::new(result).with_inputs(args.iter().cloned()))
}
