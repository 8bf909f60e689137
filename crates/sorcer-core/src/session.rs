//! The session: injected collaborators, session-owned caches and the
//! resolution worker.
//!
//! Nothing here is process-global. Two sessions never share a cache, which
//! keeps tests isolated from each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::collab::{CodebaseLoader, Discovery, Provisioner, ScriptHost};
use crate::config::SessionConfig;
use crate::engine::{Pass, Responses};
use crate::error::{Result, SorcerError};
use crate::metrics::Metrics;
use crate::model::Model;
use crate::obs;
use crate::registry::{Instance, ProviderRegistry};
use crate::resolve::{ProvisionAttempt, ResolverHandle, WorkerDeps};

pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) instances: Mutex<HashMap<String, Instance>>,
    pub(crate) resolver: ResolverHandle,
    pub(crate) provisioner: Option<Arc<dyn Provisioner>>,
    pub(crate) scripts: Option<Arc<dyn ScriptHost>>,
    /// Provisioning attempts still running, by deployment id.
    pub(crate) provisioning: Mutex<HashMap<String, ProvisionAttempt>>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn resolver(&self) -> &ResolverHandle {
        &self.resolver
    }

    /// A fresh evaluation pass over `model`.
    pub fn pass<'s>(&'s self, model: &'s Model) -> Pass<'s> {
        Pass::new(self, model)
    }

    /// Evaluate one response path in its own pass and commit the
    /// reconfiguration staged by morphers.
    ///
    /// An evaluation error is returned as is; a commit failure behind it is
    /// logged. When the path evaluates but the commit fails, the commit
    /// error is returned.
    pub async fn response(&self, model: &Model, path: &str) -> Result<Value> {
        let mut pass = self.pass(model);
        let value = pass.response(path).await;
        settle(model, value, pass.finish())
    }

    /// Evaluate several paths in one shared pass. The outer error is only
    /// returned when committing staged reconfiguration fails.
    pub async fn responses(&self, model: &Model, paths: &[String]) -> Result<Responses> {
        let mut pass = self.pass(model);
        let responses = pass.responses(paths).await;
        settle(model, Ok(responses), pass.finish())
    }
}

/// Combine an evaluation outcome with the commit that ended its pass. The
/// evaluation error takes precedence.
pub(crate) fn settle<T>(
    model: &Model,
    evaluated: Result<T>,
    committed: Result<()>,
) -> Result<T> {
    if let Err(error) = &committed {
        obs::emit_commit_failed(model.name(), error);
    }
    let value = evaluated?;
    committed.map(|()| value)
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("types", &self.registry.type_tags())
            .field("provisioner", &self.provisioner.is_some())
            .field("scripts", &self.scripts.is_some())
            .finish()
    }
}

/// Builder for [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    registry: ProviderRegistry,
    discovery: Option<Arc<dyn Discovery>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    codebase: Option<Arc<dyn CodebaseLoader>>,
    scripts: Option<Arc<dyn ScriptHost>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn codebase(mut self, codebase: Arc<dyn CodebaseLoader>) -> Self {
        self.codebase = Some(codebase);
        self
    }

    pub fn scripts(mut self, scripts: Arc<dyn ScriptHost>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Must be called inside a tokio runtime: the resolution worker is
    /// spawned onto it.
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SorcerError::config(
                "a session must be built inside a tokio runtime",
            ));
        }
        let metrics = Arc::new(Metrics::new());
        let resolver = ResolverHandle::spawn(
            WorkerDeps {
                discovery: self.discovery,
                codebase: self.codebase,
                lookup_timeout: self.config.lookup_timeout(),
                metrics: Arc::clone(&metrics),
            },
            self.config.queue_depth,
        );
        tracing::debug!(
            types = self.registry.type_tags().len(),
            queue_depth = self.config.queue_depth,
            "session ready"
        );
        Ok(Session {
            config: self.config,
            registry: Arc::new(self.registry),
            instances: Mutex::new(HashMap::new()),
            resolver,
            provisioner: self.provisioner,
            scripts: self.scripts,
            provisioning: Mutex::new(HashMap::new()),
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn model() -> Arc<Model> {
        Model::builder("settled").input("x", 1.0).build().unwrap()
    }

    #[test]
    fn test_build_outside_runtime_is_config_error() {
        let err = Session::builder().build().unwrap_err();
        assert!(matches!(err, SorcerError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = SessionConfig {
            queue_depth: 0,
            ..SessionConfig::default()
        };
        assert!(Session::builder().config(config).build().is_err());
        assert!(Session::builder().build().is_ok());
    }

    #[traced_test]
    #[test]
    fn test_evaluation_error_wins_over_commit_failure() {
        let evaluated: Result<Value> = Err(SorcerError::UnknownPath("ratio".into()));
        let committed = Err(SorcerError::config("fidelity 'mFi1' has no candidate 'x'"));

        let err = settle(&model(), evaluated, committed).unwrap_err();
        assert_eq!(err, SorcerError::UnknownPath("ratio".into()));
        assert!(logs_contain("reconfiguration.commit_failed"));
        assert!(logs_contain("has no candidate"));
    }

    #[test]
    fn test_commit_failure_surfaces_after_successful_evaluation() {
        let committed = Err(SorcerError::config("stale selection"));
        let err = settle(&model(), Ok(Value::from(1.0)), committed).unwrap_err();
        assert!(matches!(err, SorcerError::Config(_)));

        let value = settle(&model(), Ok(Value::from(2.0)), Ok(())).unwrap();
        assert_eq!(value, Value::from(2.0));
    }
}
