use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ServiceContext;
use crate::deploy::Deployment;
use crate::model::Model;

/// Role of a signature within a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecKind {
    #[default]
    Process,
    Preprocess,
    Postprocess,
    /// Contributes context data before any processing.
    Append,
}

/// How an object-bound signature constructs its instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Registered no-argument constructor.
    #[default]
    Default,
    /// Named no-argument factory.
    Factory(String),
    /// Named initializer with positional arguments, matched structurally.
    Init { selector: String, args: Vec<Value> },
}

type EvalFn = dyn Fn(&ServiceContext) -> anyhow::Result<Value> + Send + Sync;

/// Inline function bound by an evaluation signature.
#[derive(Clone)]
pub struct Evaluator(Arc<EvalFn>);

impl Evaluator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ServiceContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, context: &ServiceContext) -> anyhow::Result<Value> {
        (self.0)(context)
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Evaluator(..)")
    }
}

/// Binding variant of a signature.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Object {
        initializer: Initializer,
        reused: bool,
    },
    Net,
    Deploy(Deployment),
    #[serde(skip)]
    Evaluation(Evaluator),
    #[serde(skip)]
    Model(Arc<Model>),
    Netlet {
        source: String,
    },
    Ant {
        build_file: String,
        target: String,
    },
}

impl SignatureKind {
    pub fn label(&self) -> &'static str {
        match self {
            SignatureKind::Object { .. } => "object",
            SignatureKind::Net => "net",
            SignatureKind::Deploy(_) => "deploy",
            SignatureKind::Evaluation(_) => "evaluation",
            SignatureKind::Model(_) => "model",
            SignatureKind::Netlet { .. } => "netlet",
            SignatureKind::Ant { .. } => "ant",
        }
    }
}

impl fmt::Debug for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureKind::Object {
                initializer,
                reused,
            } => f
                .debug_struct("Object")
                .field("initializer", initializer)
                .field("reused", reused)
                .finish(),
            SignatureKind::Deploy(d) => f.debug_tuple("Deploy").field(d).finish(),
            SignatureKind::Model(m) => f.debug_tuple("Model").field(&m.name()).finish(),
            SignatureKind::Netlet { source } => {
                f.debug_struct("Netlet").field("source", source).finish()
            }
            SignatureKind::Ant { build_file, target } => f
                .debug_struct("Ant")
                .field("build_file", build_file)
                .field("target", target)
                .finish(),
            other => f.write_str(other.label()),
        }
    }
}
