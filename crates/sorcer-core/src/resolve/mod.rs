//! Signature resolution: turning a [`Signature`] into a [`Bound`] executable
//! and invoking it.
//!
//! Object signatures go through the
//! [`ProviderRegistry`](crate::registry::ProviderRegistry). Net and deploy
//! signatures go through the resolution worker and, when nothing is running,
//! one provisioning attempt. Evaluation, model and script signatures bind
//! directly.

mod cancel;
mod worker;

use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, instrument};

use crate::collab::{ProviderHandle, Provisioner, Script, ScriptHost};
use crate::context::ServiceContext;
use crate::deploy::{build_deployable_group, deployment_id, DeployableGroup, Deployment};
use crate::engine::Pass;
use crate::error::{Result, SorcerError};
use crate::model::Model;
use crate::obs;
use crate::registry::{Instance, Invoker};
use crate::session::{settle, Session};
use crate::signature::{Evaluator, Initializer, Signature, SignatureKind};
use crate::sync::lock;

pub use cancel::CancelToken;
pub use worker::{ArtifactKey, Resolved, ResolverHandle};
pub(crate) use worker::WorkerDeps;

/// A signature bound to something that can be invoked.
#[derive(Clone)]
pub enum Bound {
    Object { instance: Instance, invoker: Invoker },
    Net(ProviderHandle),
    Evaluation(Evaluator),
    Model(Arc<Model>),
    Script { host: Arc<dyn ScriptHost>, script: Script },
}

impl Bound {
    pub fn label(&self) -> &'static str {
        match self {
            Bound::Object { .. } => "object",
            Bound::Net(_) => "net",
            Bound::Evaluation(_) => "evaluation",
            Bound::Model(_) => "model",
            Bound::Script { .. } => "script",
        }
    }

    /// Same bound instance or provider, by pointer identity.
    pub fn same_target(&self, other: &Bound) -> bool {
        match (self, other) {
            (Bound::Object { instance: a, .. }, Bound::Object { instance: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            (Bound::Net(a), Bound::Net(b)) => a.id() == b.id(),
            (Bound::Model(a), Bound::Model(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Downcast an object-bound instance.
    pub fn instance<T: 'static>(&self) -> Option<&T> {
        match self {
            Bound::Object { instance, .. } => instance.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// One provisioning attempt, awaited by every concurrent resolution of the
/// same deployment unit.
pub(crate) type ProvisionAttempt = Shared<BoxFuture<'static, Result<()>>>;

fn provision_attempt(
    provisioner: Arc<dyn Provisioner>,
    group: DeployableGroup,
) -> ProvisionAttempt {
    async move {
        provisioner
            .provision(&group)
            .await
            .map_err(|e| SorcerError::Deployment {
                deployment_id: group.id.clone(),
                reason: format!("{e:#}"),
            })?;
        obs::emit_deployment_provisioned(&group.id, group.elements.len());
        Ok(())
    }
    .boxed()
    .shared()
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Net(p) => write!(f, "Net({}#{})", p.name(), p.id()),
            Bound::Model(m) => write!(f, "Model({})", m.name()),
            Bound::Script { script, .. } => write!(f, "Script({script:?})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Cache key of a reused object instance.
pub(crate) fn instance_key(signature: &Signature, initializer: &Initializer) -> String {
    let init = serde_json::to_string(initializer).unwrap_or_else(|_| format!("{initializer:?}"));
    format!("{signature}|{init}")
}

impl Session {
    /// Resolve `signature` to an executable.
    ///
    /// `siblings` are the other signatures of the same model or task; a
    /// provisionable signature is provisioned together with the siblings
    /// that share its deployment.
    #[instrument(skip_all, fields(signature = %signature, kind = signature.variant().label()))]
    pub async fn resolve(
        &self,
        signature: &Signature,
        siblings: &[Signature],
        cancel: &CancelToken,
    ) -> Result<Bound> {
        if cancel.is_cancelled() {
            return Err(SorcerError::Cancelled);
        }
        self.metrics.inc_resolutions();

        if !signature.codebase().is_empty() && !signature.codebase_checked() {
            let key = ArtifactKey::codebase(signature.service_type(), signature.codebase());
            self.resolver.resolve(key, cancel).await?;
            signature.mark_codebase_checked();
        }

        let bound = match signature.variant() {
            SignatureKind::Object {
                initializer,
                reused,
            } => self.bind_object(signature, initializer, *reused)?,
            SignatureKind::Net | SignatureKind::Deploy(_) => {
                Bound::Net(self.bind_net(signature, siblings, cancel).await?)
            }
            SignatureKind::Evaluation(evaluator) => Bound::Evaluation(evaluator.clone()),
            SignatureKind::Model(model) => Bound::Model(Arc::clone(model)),
            SignatureKind::Netlet { source } => self.bind_script(
                signature,
                Script::Netlet {
                    source: source.clone(),
                },
            )?,
            SignatureKind::Ant { build_file, target } => self.bind_script(
                signature,
                Script::Ant {
                    build_file: build_file.clone(),
                    target: target.clone(),
                },
            )?,
        };
        obs::emit_provider_resolved(&signature.to_string(), bound.label());
        Ok(bound)
    }

    fn bind_object(
        &self,
        signature: &Signature,
        initializer: &Initializer,
        reused: bool,
    ) -> Result<Bound> {
        let invoker = self
            .registry
            .invoker(signature.service_type(), signature.selector())?;
        let instance = if reused {
            let key = instance_key(signature, initializer);
            let mut instances = lock(&self.instances);
            match instances.get(&key) {
                Some(instance) => {
                    self.metrics.inc_cache_hits();
                    Arc::clone(instance)
                }
                None => {
                    let instance = self
                        .registry
                        .instantiate(signature.service_type(), initializer)?;
                    instances.insert(key, Arc::clone(&instance));
                    instance
                }
            }
        } else {
            self.registry
                .instantiate(signature.service_type(), initializer)?
        };
        Ok(Bound::Object { instance, invoker })
    }

    fn bind_script(&self, signature: &Signature, script: Script) -> Result<Bound> {
        let host = self
            .scripts
            .clone()
            .ok_or_else(|| SorcerError::signature(signature, "no script host configured"))?;
        Ok(Bound::Script { host, script })
    }

    async fn bind_net(
        &self,
        signature: &Signature,
        siblings: &[Signature],
        cancel: &CancelToken,
    ) -> Result<ProviderHandle> {
        let key = ArtifactKey::provider(signature.service_type(), signature.provider_name());

        if let Some(provider) = signature.cached_provider() {
            if cancel.guard(provider.is_alive()).await? {
                self.metrics.inc_cache_hits();
                return Ok(provider);
            }
            debug!(provider = provider.name(), "cached provider failed liveness check");
            signature.close();
            self.resolver.invalidate(key.clone()).await;
        }

        let provider = match self.lookup_live(signature, &key, cancel).await {
            Ok(provider) => provider,
            Err(SorcerError::ProviderNotFound { .. })
                if signature.is_provisionable() && self.config.provisioning =>
            {
                let deployment_id = self.provision(signature, siblings, cancel).await?;
                self.lookup_live(signature, &key, cancel)
                    .await
                    .map_err(|e| match e {
                        SorcerError::Cancelled => e,
                        other => SorcerError::Deployment {
                            deployment_id,
                            reason: format!("no provider after provisioning: {other}"),
                        },
                    })?
            }
            Err(e) => return Err(e),
        };
        signature.bind_provider(Arc::clone(&provider));
        Ok(provider)
    }

    /// Look up a provider that passes its liveness check, discarding one
    /// dead result before giving up.
    async fn lookup_live(
        &self,
        signature: &Signature,
        key: &ArtifactKey,
        cancel: &CancelToken,
    ) -> Result<ProviderHandle> {
        for _ in 0..2 {
            let provider = match self.resolver.resolve(key.clone(), cancel).await? {
                Resolved::Provider(provider) => provider,
                Resolved::Codebase => {
                    return Err(SorcerError::signature(signature, "resolved to a codebase"))
                }
            };
            if cancel.guard(provider.is_alive()).await? {
                return Ok(provider);
            }
            debug!(provider = provider.name(), "discovered provider is not alive");
            self.resolver.invalidate(key.clone()).await;
        }
        Err(SorcerError::ProviderNotFound {
            service_type: signature.service_type().to_string(),
            provider_name: signature.provider_name().to_string(),
        })
    }

    /// Provision the deployment unit of `signature`. Returns the deployment
    /// id.
    ///
    /// Concurrent callers for the same deployment id await one shared
    /// attempt. The entry is dropped once the attempt settles, so a later
    /// resolution may provision the unit again.
    async fn provision(
        &self,
        signature: &Signature,
        siblings: &[Signature],
        cancel: &CancelToken,
    ) -> Result<String> {
        let unit = signature.deployment().map(Deployment::normalized);
        let mut group_signatures = vec![signature.clone()];
        for sibling in siblings {
            let same_unit = sibling.deployment().map(Deployment::normalized) == unit;
            if same_unit && !group_signatures.contains(sibling) {
                group_signatures.push(sibling.clone());
            }
        }

        let Some(provisioner) = self.provisioner.as_ref() else {
            return Err(SorcerError::Deployment {
                deployment_id: deployment_id(&group_signatures),
                reason: "no provisioning collaborator configured".into(),
            });
        };

        let group = build_deployable_group(&group_signatures)?;
        let id = group.id.clone();
        let attempt = {
            let mut in_flight = lock(&self.provisioning);
            match in_flight.get(&id) {
                Some(attempt) => {
                    debug!(deployment = %id, "joining in-flight provisioning");
                    attempt.clone()
                }
                None => {
                    self.metrics.inc_provisionings();
                    let attempt = provision_attempt(Arc::clone(provisioner), group);
                    in_flight.insert(id.clone(), attempt.clone());
                    attempt
                }
            }
        };

        let outcome = cancel.guard(attempt.clone()).await;
        if outcome.is_ok() {
            let mut in_flight = lock(&self.provisioning);
            if in_flight
                .get(&id)
                .is_some_and(|current| Shared::ptr_eq(current, &attempt))
            {
                in_flight.remove(&id);
            }
        }
        outcome??;
        Ok(id)
    }

    /// Invoke a bound executable with `input` and return its result context.
    ///
    /// Callback failures become [`SorcerError::Evaluation`] labelled with the
    /// signature's selector.
    #[instrument(skip_all, fields(signature = %signature, binding = bound.label()))]
    pub async fn invoke(
        &self,
        bound: &Bound,
        signature: &Signature,
        input: ServiceContext,
        cancel: &CancelToken,
    ) -> Result<ServiceContext> {
        let label = signature.selector();
        match bound {
            Bound::Object { instance, invoker } => invoker
                .invoke(instance, &input)
                .map_err(|e| SorcerError::evaluation(label, &e)),
            Bound::Net(provider) => {
                let timeout = self.config.invoke_timeout();
                let call = tokio::time::timeout(timeout, provider.exert(label, input));
                match cancel.guard(call).await? {
                    Ok(result) => result.map_err(|e| SorcerError::evaluation(label, &e)),
                    Err(_) => Err(SorcerError::Evaluation {
                        path: label.to_string(),
                        reason: format!(
                            "provider {} did not answer within {} ms",
                            provider.name(),
                            timeout.as_millis()
                        ),
                    }),
                }
            }
            Bound::Evaluation(evaluator) => {
                let value = evaluator
                    .evaluate(&input)
                    .map_err(|e| SorcerError::evaluation(label, &e))?;
                let mut output = input;
                output.set_return_value(value);
                Ok(output)
            }
            Bound::Model(model) => self.invoke_model(model, input, cancel).await,
            Bound::Script { host, script } => cancel
                .guard(host.run(script, input))
                .await?
                .map_err(|e| SorcerError::evaluation(label, &e)),
        }
    }

    /// Evaluate a sub-model in its own pass. Input entries naming model
    /// paths override them; every response lands under its own path, and a
    /// single response also lands at the result path.
    async fn invoke_model(
        &self,
        model: &Arc<Model>,
        input: ServiceContext,
        cancel: &CancelToken,
    ) -> Result<ServiceContext> {
        let mut pass = Pass::new(self, model).with_cancel(cancel.clone());
        for (path, entry) in input.iter() {
            if model.contains(path) {
                pass.put_input(path, entry.value.clone())?;
            }
        }

        let paths = model.response_paths().to_vec();
        let responses = pass.responses(&paths).await;
        let values = settle(model, responses.into_result(), pass.finish())?;

        let mut output = input;
        for (path, value) in &values {
            output.put_out(path.clone(), value.clone());
        }
        let result = if values.len() == 1 {
            values.into_values().next().unwrap_or_default()
        } else {
            serde_json::Value::Object(values.into_iter().collect())
        };
        output.set_return_value(result);
        Ok(output)
    }
}
