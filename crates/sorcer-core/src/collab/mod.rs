//! External collaborator contracts.
//!
//! The engine never talks to a network or a class loader directly. These
//! traits are the seams it calls into:
//! - [`Discovery`]: look up a live provider by service type and name pattern
//! - [`Provisioner`]: deploy a [`DeployableGroup`] so its providers become discoverable
//! - [`CodebaseLoader`]: fetch class bytes for a service type from codebase URLs
//! - [`ScriptHost`]: run netlet scripts and build-file targets
//!
//! In-memory fakes live in [`crate::fakes`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::ServiceContext;
use crate::deploy::DeployableGroup;

/// A remote service provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name matched against signature name patterns.
    fn name(&self) -> &str;

    /// Unique identity of this provider instance.
    fn id(&self) -> &str;

    fn service_types(&self) -> Vec<String>;

    /// Liveness check; `false` means the handle must be discarded.
    async fn is_alive(&self) -> bool;

    async fn exert(&self, selector: &str, context: ServiceContext)
        -> anyhow::Result<ServiceContext>;
}

pub type ProviderHandle = Arc<dyn Provider>;

/// Lookup of providers by service type and provider-name pattern.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// `None` when nothing matches within `timeout`.
    async fn lookup(
        &self,
        service_type: &str,
        provider_name: &str,
        timeout: Duration,
    ) -> Option<ProviderHandle>;
}

/// On-demand deployment of services.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, group: &DeployableGroup) -> anyhow::Result<()>;
}

/// Class loading from codebase URLs.
#[async_trait]
pub trait CodebaseLoader: Send + Sync {
    async fn load_class(&self, class_name: &str, codebase: &[String]) -> anyhow::Result<Vec<u8>>;
}

/// A script-bound executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Script {
    Netlet { source: String },
    Ant { build_file: String, target: String },
}

/// Runs scripts against a context.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn run(&self, script: &Script, context: ServiceContext)
        -> anyhow::Result<ServiceContext>;
}

/// Matches a provider name against a pattern: `*` matches anything, a
/// trailing `*` matches a prefix, anything else must be equal.
pub fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern {
        "*" | "" => true,
        p => match p.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => p == name,
        },
    }
}
