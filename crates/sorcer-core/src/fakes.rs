//! In-memory fakes for the collaborator traits (testing and local runs).
//!
//! Provides `MemoryProvider`, `MemoryDiscovery`, `MemoryProvisioner`,
//! `MemoryCodebase` and `MemoryScriptHost`, which satisfy the contracts in
//! [`crate::collab`] without any transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::collab::{
    name_matches, CodebaseLoader, Discovery, Provider, ProviderHandle, Provisioner, Script,
    ScriptHost,
};
use crate::context::ServiceContext;
use crate::deploy::{DeployableGroup, ServiceElement};
use crate::sync::lock;

type Operation = Arc<dyn Fn(&ServiceContext) -> anyhow::Result<ServiceContext> + Send + Sync>;

// ---------------------------------------------------------------------------
// MemoryProvider
// ---------------------------------------------------------------------------

/// Provider whose operations are closures over the request context.
pub struct MemoryProvider {
    name: String,
    id: String,
    service_types: Vec<String>,
    operations: HashMap<String, Operation>,
    alive: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: uuid::Uuid::new_v4().to_string(),
            service_types: vec![service_type.into()],
            operations: HashMap::new(),
            alive: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn operation<F>(mut self, selector: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ServiceContext) -> anyhow::Result<ServiceContext> + Send + Sync + 'static,
    {
        self.operations.insert(selector.into(), Arc::new(f));
        self
    }

    /// Simulate provider death: the liveness check fails from now on.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_handle(self) -> ProviderHandle {
        Arc::new(self)
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn service_types(&self) -> Vec<String> {
        self.service_types.clone()
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn exert(
        &self,
        selector: &str,
        context: ServiceContext,
    ) -> anyhow::Result<ServiceContext> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(anyhow!("provider {} is not alive", self.name));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let op = self
            .operations
            .get(selector)
            .ok_or_else(|| anyhow!("provider {} has no operation '{selector}'", self.name))?;
        op(&context)
    }
}

// ---------------------------------------------------------------------------
// MemoryDiscovery
// ---------------------------------------------------------------------------

/// Registry of providers searched in registration order.
#[derive(Default)]
pub struct MemoryDiscovery {
    providers: Mutex<Vec<ProviderHandle>>,
    lookups: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lookup sleeps `delay` first (simulates a slow network lookup).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn register(&self, provider: ProviderHandle) {
        lock(&self.providers).push(provider);
    }

    pub fn unregister(&self, provider_id: &str) {
        lock(&self.providers).retain(|p| p.id() != provider_id);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    async fn lookup(
        &self,
        service_type: &str,
        provider_name: &str,
        timeout: Duration,
    ) -> Option<ProviderHandle> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return None;
            }
            tokio::time::sleep(delay).await;
        }
        lock(&self.providers)
            .iter()
            .find(|p| {
                name_matches(provider_name, p.name())
                    && p.service_types().iter().any(|t| t == service_type)
            })
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// MemoryProvisioner
// ---------------------------------------------------------------------------

type Launcher = Arc<dyn Fn(&ServiceElement) -> Option<ProviderHandle> + Send + Sync>;

/// Provisioner that "deploys" a group by launching providers into a
/// [`MemoryDiscovery`].
pub struct MemoryProvisioner {
    discovery: Arc<MemoryDiscovery>,
    launcher: Launcher,
    provisioned: Mutex<Vec<DeployableGroup>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl MemoryProvisioner {
    /// `launcher` builds the provider for one service element, or `None`
    /// when it cannot be started.
    pub fn new<F>(discovery: Arc<MemoryDiscovery>, launcher: F) -> Self
    where
        F: Fn(&ServiceElement) -> Option<ProviderHandle> + Send + Sync + 'static,
    {
        Self {
            discovery,
            launcher: Arc::new(launcher),
            provisioned: Mutex::new(Vec::new()),
            fail_with: None,
            delay: None,
        }
    }

    /// Every provisioning attempt fails with `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }

    /// Every attempt takes `delay` before launching anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn provisioned(&self) -> Vec<DeployableGroup> {
        lock(&self.provisioned).clone()
    }
}

#[async_trait]
impl Provisioner for MemoryProvisioner {
    async fn provision(&self, group: &DeployableGroup) -> anyhow::Result<()> {
        lock(&self.provisioned).push(group.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(anyhow!("{reason}"));
        }
        for element in &group.elements {
            let provider = (self.launcher)(element).ok_or_else(|| {
                anyhow!(
                    "no launcher for provider {}",
                    element.deployment.provider_name
                )
            })?;
            for _ in 0..element.deployment.multiplicity.max(1) {
                self.discovery.register(Arc::clone(&provider));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCodebase
// ---------------------------------------------------------------------------

/// Codebase serving a fixed set of classes.
#[derive(Default)]
pub struct MemoryCodebase {
    classes: HashMap<String, Vec<u8>>,
    loads: AtomicUsize,
}

impl MemoryCodebase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.classes.insert(class_name.into(), bytes);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodebaseLoader for MemoryCodebase {
    async fn load_class(&self, class_name: &str, codebase: &[String]) -> anyhow::Result<Vec<u8>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if codebase.is_empty() {
            return Err(anyhow!("empty codebase for {class_name}"));
        }
        self.classes
            .get(class_name)
            .cloned()
            .ok_or_else(|| anyhow!("class {class_name} not found in {}", codebase.join(" ")))
    }
}

// ---------------------------------------------------------------------------
// MemoryScriptHost
// ---------------------------------------------------------------------------

/// Script host keyed by netlet source or `build_file#target`.
#[derive(Default)]
pub struct MemoryScriptHost {
    scripts: HashMap<String, Operation>,
}

impl MemoryScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn netlet<F>(mut self, source: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ServiceContext) -> anyhow::Result<ServiceContext> + Send + Sync + 'static,
    {
        self.scripts.insert(source.into(), Arc::new(f));
        self
    }

    pub fn target<F>(mut self, build_file: &str, target: &str, f: F) -> Self
    where
        F: Fn(&ServiceContext) -> anyhow::Result<ServiceContext> + Send + Sync + 'static,
    {
        self.scripts
            .insert(format!("{build_file}#{target}"), Arc::new(f));
        self
    }
}

#[async_trait]
impl ScriptHost for MemoryScriptHost {
    async fn run(
        &self,
        script: &Script,
        context: ServiceContext,
    ) -> anyhow::Result<ServiceContext> {
        let key = match script {
            Script::Netlet { source } => source.clone(),
            Script::Ant { build_file, target } => format!("{build_file}#{target}"),
        };
        let op = self
            .scripts
            .get(&key)
            .ok_or_else(|| anyhow!("unknown script '{key}'"))?;
        op(&context)
    }
}
