//! Task exertion: a flat list of signatures run against one context.

use tracing::instrument;

use crate::context::ServiceContext;
use crate::error::{Result, SorcerError};
use crate::resolve::CancelToken;
use crate::session::Session;
use crate::signature::{ExecKind, Signature};

/// A named set of signatures sharing one context. Exactly one signature
/// must be of kind [`ExecKind::Process`].
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    signatures: Vec<Signature>,
    context: ServiceContext,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            context: ServiceContext::new(name.clone()),
            name,
            signatures: Vec::new(),
        }
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }

    pub fn context(mut self, context: ServiceContext) -> Self {
        self.context = context;
        self
    }

    pub fn input(mut self, path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.put_in(path, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn service_context(&self) -> &ServiceContext {
        &self.context
    }

    /// The single process signature.
    pub fn process_signature(&self) -> Result<&Signature> {
        let mut process = self
            .signatures
            .iter()
            .filter(|s| s.exec_kind() == ExecKind::Process);
        match (process.next(), process.next()) {
            (Some(signature), None) => Ok(signature),
            (None, _) => Err(SorcerError::Signature {
                signature: self.name.clone(),
                reason: "task has no process signature".into(),
            }),
            (Some(_), Some(_)) => Err(SorcerError::Signature {
                signature: self.name.clone(),
                reason: "task has more than one process signature".into(),
            }),
        }
    }

    /// Signatures in execution order: append, preprocess, process,
    /// postprocess. Declaration order is kept within each kind.
    fn ordered(&self) -> Result<Vec<&Signature>> {
        let process = self.process_signature()?;
        let of_kind = |kind: ExecKind| {
            self.signatures
                .iter()
                .filter(move |s| s.exec_kind() == kind)
        };
        let mut ordered: Vec<&Signature> = of_kind(ExecKind::Append).collect();
        ordered.extend(of_kind(ExecKind::Preprocess));
        ordered.push(process);
        ordered.extend(of_kind(ExecKind::Postprocess));
        Ok(ordered)
    }
}

impl Session {
    /// Run `task` and return the accumulated context. Its return path is
    /// the process signature's, so [`ServiceContext::return_value`] reads
    /// the task result.
    pub async fn exert(&self, task: &Task) -> Result<ServiceContext> {
        self.exert_with(task, &CancelToken::new()).await
    }

    #[instrument(skip_all, fields(task = %task.name()))]
    pub async fn exert_with(&self, task: &Task, cancel: &CancelToken) -> Result<ServiceContext> {
        let mut context = task.service_context().clone();
        let process = task.process_signature()?;
        for signature in task.ordered()? {
            let bound = self.resolve(signature, task.signatures(), cancel).await?;
            let mut input = context.clone();
            input.set_return_path(signature.return_path().cloned());
            let output = self.invoke(&bound, signature, input, cancel).await?;
            self.metrics.inc_evaluations();
            context.merge(&output);
        }
        context.set_return_path(process.return_path().cloned());
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add() -> Signature {
        Signature::eval("add", |ctx: &ServiceContext| {
            let sum: f64 = ctx.input_values().iter().filter_map(|v| v.as_f64()).sum();
            Ok(json!(sum))
        })
    }

    #[test]
    fn test_task_requires_exactly_one_process_signature() {
        let none = Task::new("empty");
        assert!(matches!(
            none.process_signature(),
            Err(SorcerError::Signature { .. })
        ));

        let two = Task::new("two").signature(add()).signature(add());
        assert!(matches!(
            two.process_signature(),
            Err(SorcerError::Signature { .. })
        ));

        let one = Task::new("one")
            .signature(add())
            .signature(add().with_kind(ExecKind::Postprocess));
        assert_eq!(one.process_signature().unwrap().selector(), "add");
    }

    #[test]
    fn test_ordering_by_kind() {
        let noop = |selector: &str| Signature::eval(selector, |_: &ServiceContext| Ok(json!(0)));
        let task = Task::new("ordered")
            .signature(noop("post").with_kind(ExecKind::Postprocess))
            .signature(noop("main"))
            .signature(noop("pre").with_kind(ExecKind::Preprocess))
            .signature(noop("data").with_kind(ExecKind::Append));
        let order: Vec<&str> = task
            .ordered()
            .unwrap()
            .into_iter()
            .map(Signature::selector)
            .collect();
        assert_eq!(order, vec!["data", "pre", "main", "post"]);
    }

    #[tokio::test]
    async fn test_exert_runs_eval_task() {
        let session = Session::builder().build().unwrap();
        let task = Task::new("sum")
            .input("arg/x1", 20.0)
            .input("arg/x2", 80.0)
            .signature(add());
        let result = session.exert(&task).await.unwrap();
        assert_eq!(result.return_value(), Some(&json!(100.0)));
        assert_eq!(session.metrics().evaluations(), 1);
    }
}
