//! Background resolution worker.
//!
//! One tokio task drains a bounded request queue and owns the resolved cache
//! and the in-flight table, so neither needs a lock. Blocking collaborator
//! calls (discovery lookups, class loading) run in their own tasks and
//! report back through the same queue. A request for a key already in
//! flight joins the waiters of the first request instead of issuing a
//! second lookup.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

use crate::collab::{CodebaseLoader, Discovery, ProviderHandle};
use crate::error::{Result, SorcerError};
use crate::metrics::Metrics;
use crate::resolve::CancelToken;

/// Normalized identity of something the worker resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    Provider {
        service_type: String,
        provider_name: String,
    },
    Codebase {
        class_name: String,
        codebase: Vec<String>,
    },
}

impl ArtifactKey {
    pub fn provider(service_type: &str, provider_name: &str) -> Self {
        ArtifactKey::Provider {
            service_type: service_type.trim().to_string(),
            provider_name: provider_name.trim().to_string(),
        }
    }

    /// URL order does not matter.
    pub fn codebase(class_name: &str, codebase: &[String]) -> Self {
        let mut urls: Vec<String> = codebase.iter().map(|u| u.trim().to_string()).collect();
        urls.sort();
        urls.dedup();
        ArtifactKey::Codebase {
            class_name: class_name.trim().to_string(),
            codebase: urls,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKey::Provider {
                service_type,
                provider_name,
            } => write!(f, "provider:{service_type}@{provider_name}"),
            ArtifactKey::Codebase {
                class_name,
                codebase,
            } => write!(f, "class:{class_name}[{}]", codebase.join(" ")),
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Clone)]
pub enum Resolved {
    Provider(ProviderHandle),
    /// The class is loadable from the codebase.
    Codebase,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Provider(p) => f
                .debug_tuple("Provider")
                .field(&format_args!("{}#{}", p.name(), p.id()))
                .finish(),
            Resolved::Codebase => f.write_str("Codebase"),
        }
    }
}

type Reply = oneshot::Sender<Result<Resolved>>;

enum Command {
    Resolve { key: ArtifactKey, reply: Reply },
    Completed { key: ArtifactKey, result: Result<Resolved> },
    Invalidate { key: ArtifactKey },
}

/// Collaborators the worker calls into.
pub(crate) struct WorkerDeps {
    pub(crate) discovery: Option<Arc<dyn Discovery>>,
    pub(crate) codebase: Option<Arc<dyn CodebaseLoader>>,
    pub(crate) lookup_timeout: Duration,
    pub(crate) metrics: Arc<Metrics>,
}

struct Worker {
    rx: mpsc::Receiver<Command>,
    tx: mpsc::WeakSender<Command>,
    deps: Arc<WorkerDeps>,
    cache: HashMap<ArtifactKey, Resolved>,
    in_flight: HashMap<ArtifactKey, Vec<Reply>>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Resolve { key, reply } => self.on_resolve(key, reply),
                Command::Completed { key, result } => self.on_completed(key, result),
                Command::Invalidate { key } => {
                    if self.cache.remove(&key).is_some() {
                        debug!(artifact = %key, "invalidated cached artifact");
                    }
                }
            }
        }
        debug!("resolution worker stopped");
    }

    fn on_resolve(&mut self, key: ArtifactKey, reply: Reply) {
        if let Some(hit) = self.cache.get(&key) {
            self.deps.metrics.inc_cache_hits();
            let _ = reply.send(Ok(hit.clone()));
            return;
        }
        match self.in_flight.entry(key) {
            MapEntry::Occupied(mut waiting) => {
                debug!(artifact = %waiting.key(), "joining in-flight resolution");
                waiting.get_mut().push(reply);
            }
            MapEntry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(vec![reply]);
                self.start(key);
            }
        }
    }

    fn on_completed(&mut self, key: ArtifactKey, result: Result<Resolved>) {
        if let Ok(resolved) = &result {
            self.cache.insert(key.clone(), resolved.clone());
        }
        for waiter in self.in_flight.remove(&key).unwrap_or_default() {
            // A waiter that gave up (cancelled) has dropped its receiver.
            let _ = waiter.send(result.clone());
        }
    }

    fn start(&self, key: ArtifactKey) {
        let deps = Arc::clone(&self.deps);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = perform(&deps, &key).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Completed { key, result }).await;
            }
        });
    }
}

#[instrument(skip(deps, key), fields(artifact = %key))]
async fn perform(deps: &WorkerDeps, key: &ArtifactKey) -> Result<Resolved> {
    match key {
        ArtifactKey::Provider {
            service_type,
            provider_name,
        } => {
            let discovery = deps.discovery.as_ref().ok_or_else(|| {
                SorcerError::signature(key, "no discovery collaborator configured")
            })?;
            deps.metrics.inc_lookups();
            let not_found = || SorcerError::ProviderNotFound {
                service_type: service_type.clone(),
                provider_name: provider_name.clone(),
            };
            let lookup = discovery.lookup(service_type, provider_name, deps.lookup_timeout);
            match tokio::time::timeout(deps.lookup_timeout, lookup).await {
                Ok(Some(provider)) => {
                    debug!(provider = provider.name(), "discovered provider");
                    Ok(Resolved::Provider(provider))
                }
                Ok(None) => Err(not_found()),
                Err(_) => {
                    debug!(timeout_ms = deps.lookup_timeout.as_millis() as u64, "lookup timed out");
                    Err(not_found())
                }
            }
        }
        ArtifactKey::Codebase {
            class_name,
            codebase,
        } => {
            let loader = deps.codebase.as_ref().ok_or_else(|| {
                SorcerError::signature(key, "no codebase collaborator configured")
            })?;
            loader
                .load_class(class_name, codebase)
                .await
                .map(|_| Resolved::Codebase)
                .map_err(|e| {
                    SorcerError::signature(class_name, format!("class is not loadable: {e:#}"))
                })
        }
    }
}

/// Cloneable handle to the resolution worker. The worker stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct ResolverHandle {
    tx: mpsc::Sender<Command>,
}

impl fmt::Debug for ResolverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ResolverHandle {
    /// Spawn the worker on the current tokio runtime.
    pub(crate) fn spawn(deps: WorkerDeps, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = Worker {
            rx,
            tx: tx.downgrade(),
            deps: Arc::new(deps),
            cache: HashMap::new(),
            in_flight: HashMap::new(),
        };
        tokio::spawn(worker.run());
        Self { tx }
    }

    /// Resolve `key`, waiting on an in-flight resolution of the same key if
    /// there is one. Returns [`SorcerError::Cancelled`] as soon as `cancel`
    /// fires.
    pub async fn resolve(&self, key: ArtifactKey, cancel: &CancelToken) -> Result<Resolved> {
        let (reply, rx) = oneshot::channel();
        cancel
            .guard(self.tx.send(Command::Resolve { key, reply }))
            .await?
            .map_err(|_| SorcerError::ResolverUnavailable)?;
        cancel
            .guard(rx)
            .await?
            .map_err(|_| SorcerError::ResolverUnavailable)?
    }

    /// Drop the cached resolution of `key`.
    pub async fn invalidate(&self, key: ArtifactKey) {
        let _ = self.tx.send(Command::Invalidate { key }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryCodebase, MemoryDiscovery, MemoryProvider};

    fn handle(discovery: Arc<MemoryDiscovery>, timeout: Duration) -> ResolverHandle {
        ResolverHandle::spawn(
            WorkerDeps {
                discovery: Some(discovery),
                codebase: Some(Arc::new(
                    MemoryCodebase::new().with_class("Adder", vec![1, 2, 3]),
                )),
                lookup_timeout: timeout,
                metrics: Arc::new(Metrics::new()),
            },
            8,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_lookup() {
        let discovery = Arc::new(MemoryDiscovery::new().with_delay(Duration::from_millis(50)));
        discovery.register(MemoryProvider::new("Adder", "Adder").into_handle());
        let resolver = handle(Arc::clone(&discovery), Duration::from_secs(1));
        let cancel = CancelToken::new();
        let key = ArtifactKey::provider("Adder", "*");

        let (a, b) = tokio::join!(
            resolver.resolve(key.clone(), &cancel),
            resolver.resolve(key.clone(), &cancel)
        );
        assert!(matches!(a, Ok(Resolved::Provider(_))));
        assert!(matches!(b, Ok(Resolved::Provider(_))));
        assert_eq!(discovery.lookups(), 1);

        // cached afterwards
        resolver.resolve(key, &cancel).await.unwrap();
        assert_eq!(discovery.lookups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_provider_not_found_and_not_cached() {
        let discovery = Arc::new(MemoryDiscovery::new().with_delay(Duration::from_secs(10)));
        discovery.register(MemoryProvider::new("Adder", "Adder").into_handle());
        let resolver = handle(Arc::clone(&discovery), Duration::from_millis(100));
        let cancel = CancelToken::new();
        let key = ArtifactKey::provider("Adder", "*");

        let err = resolver.resolve(key.clone(), &cancel).await.unwrap_err();
        assert!(matches!(err, SorcerError::ProviderNotFound { .. }));
        let _ = resolver.resolve(key, &cancel).await;
        assert_eq!(discovery.lookups(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_returns_promptly() {
        let discovery = Arc::new(MemoryDiscovery::new().with_delay(Duration::from_secs(30)));
        let resolver = handle(discovery, Duration::from_secs(60));
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });
        let result = resolver
            .resolve(ArtifactKey::provider("Adder", "*"), &cancel)
            .await;
        assert!(matches!(result, Err(SorcerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_lookup() {
        let discovery = Arc::new(MemoryDiscovery::new());
        discovery.register(MemoryProvider::new("Adder", "Adder").into_handle());
        let resolver = handle(Arc::clone(&discovery), Duration::from_secs(1));
        let cancel = CancelToken::new();
        let key = ArtifactKey::provider("Adder", "*");

        resolver.resolve(key.clone(), &cancel).await.unwrap();
        resolver.invalidate(key.clone()).await;
        resolver.resolve(key, &cancel).await.unwrap();
        assert_eq!(discovery.lookups(), 2);
    }

    #[tokio::test]
    async fn test_codebase_resolution() {
        let resolver = handle(Arc::new(MemoryDiscovery::new()), Duration::from_secs(1));
        let cancel = CancelToken::new();
        let urls = vec!["http://codebase/adder.jar".to_string()];

        let ok = resolver
            .resolve(ArtifactKey::codebase("Adder", &urls), &cancel)
            .await;
        assert!(matches!(ok, Ok(Resolved::Codebase)));
        let missing = resolver
            .resolve(ArtifactKey::codebase("Divider", &urls), &cancel)
            .await;
        assert!(matches!(missing, Err(SorcerError::Signature { .. })));
    }

    #[test]
    fn test_codebase_key_ignores_url_order() {
        let a = ArtifactKey::codebase("Adder", &["b".into(), "a".into()]);
        let b = ArtifactKey::codebase("Adder", &["a".into(), "b".into(), "a".into()]);
        assert_eq!(a, b);
    }
}
