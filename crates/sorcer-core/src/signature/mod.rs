//! Signatures: serializable descriptors of an operation binding.
//!
//! A [`Signature`] names *what* to call (selector), *on what* (service type
//! and provider-name pattern), *how* its result flows back (return path and
//! connectors), and *where* it is bound ([`SignatureKind`]). The binding
//! variant is a tagged union matched by the resolver, never overridden.

mod kind;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collab::ProviderHandle;
use crate::context::{Connector, ReturnPath};
use crate::deploy::Deployment;
use crate::model::Model;
use crate::sync::lock;

pub use kind::{Evaluator, ExecKind, Initializer, SignatureKind};

/// Provider-name pattern matching any provider.
pub const ANY: &str = "*";

/// Identity of a signature: selector, service type and provider name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignatureKey {
    pub selector: String,
    pub service_type: String,
    pub provider_name: String,
}

/// Lazily populated binding state shared by clones of one signature.
#[derive(Default)]
pub(crate) struct Binding {
    pub(crate) provider: Option<ProviderHandle>,
    pub(crate) codebase_checked: bool,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Signature {
    selector: String,
    service_type: String,
    provider_name: String,
    #[serde(default)]
    exec_kind: ExecKind,
    variant: SignatureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_path: Option<ReturnPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    in_connector: Option<Connector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    out_connector: Option<Connector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    codebase: Vec<String>,
    #[serde(skip)]
    binding: Arc<Mutex<Binding>>,
}

impl Signature {
    fn with_variant(
        selector: impl Into<String>,
        service_type: impl Into<String>,
        variant: SignatureKind,
    ) -> Self {
        Self {
            selector: selector.into(),
            service_type: service_type.into(),
            provider_name: ANY.to_string(),
            exec_kind: ExecKind::Process,
            variant,
            return_path: None,
            in_connector: None,
            out_connector: None,
            codebase: Vec::new(),
            binding: Arc::default(),
        }
    }

    /// Bound to a locally constructed instance of a registered type.
    pub fn object(selector: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self::with_variant(
            selector,
            service_type,
            SignatureKind::Object {
                initializer: Initializer::Default,
                reused: false,
            },
        )
    }

    /// Bound to a remote provider found through discovery.
    pub fn net(selector: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self::with_variant(selector, service_type, SignatureKind::Net)
    }

    /// Bound to a provider that may have to be provisioned first.
    pub fn deploy(
        selector: impl Into<String>,
        service_type: impl Into<String>,
        deployment: Deployment,
    ) -> Self {
        let provider_name = deployment.provider_name.clone();
        let mut sig = Self::with_variant(selector, service_type, SignatureKind::Deploy(deployment));
        sig.provider_name = provider_name;
        sig
    }

    /// Bound to an inline function of the input context.
    pub fn eval<F>(selector: impl Into<String>, f: F) -> Self
    where
        F: Fn(&crate::context::ServiceContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::with_variant(
            selector,
            "evaluator",
            SignatureKind::Evaluation(Evaluator::new(f)),
        )
    }

    /// Bound to a sub-model whose response paths form the result.
    pub fn model(selector: impl Into<String>, model: Arc<Model>) -> Self {
        let service_type = model.name().to_string();
        Self::with_variant(selector, service_type, SignatureKind::Model(model))
    }

    /// Bound to a script run by the script host.
    pub fn netlet(selector: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_variant(
            selector,
            "netlet",
            SignatureKind::Netlet {
                source: source.into(),
            },
        )
    }

    /// Bound to a build-file target run by the script host.
    pub fn ant(
        selector: impl Into<String>,
        build_file: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::with_variant(
            selector,
            "ant",
            SignatureKind::Ant {
                build_file: build_file.into(),
                target: target.into(),
            },
        )
    }

    pub fn with_provider_name(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = provider_name.into();
        self
    }

    pub fn with_kind(mut self, kind: ExecKind) -> Self {
        self.exec_kind = kind;
        self
    }

    /// Object-bound only: how the instance is constructed.
    pub fn with_initializer(mut self, init: Initializer) -> Self {
        if let SignatureKind::Object { initializer, .. } = &mut self.variant {
            *initializer = init;
        }
        self
    }

    /// Object-bound only: share one instance across resolutions.
    pub fn reused(mut self) -> Self {
        if let SignatureKind::Object { reused, .. } = &mut self.variant {
            *reused = true;
        }
        self
    }

    pub fn with_return_path(mut self, return_path: ReturnPath) -> Self {
        self.return_path = Some(return_path);
        self
    }

    pub fn with_in_connector(mut self, connector: Connector) -> Self {
        self.in_connector = Some(connector);
        self
    }

    pub fn with_out_connector(mut self, connector: Connector) -> Self {
        self.out_connector = Some(connector);
        self
    }

    pub fn with_codebase<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codebase = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn exec_kind(&self) -> ExecKind {
        self.exec_kind
    }

    pub fn variant(&self) -> &SignatureKind {
        &self.variant
    }

    pub fn return_path(&self) -> Option<&ReturnPath> {
        self.return_path.as_ref()
    }

    pub fn in_connector(&self) -> Option<&Connector> {
        self.in_connector.as_ref()
    }

    pub fn out_connector(&self) -> Option<&Connector> {
        self.out_connector.as_ref()
    }

    pub fn codebase(&self) -> &[String] {
        &self.codebase
    }

    pub fn deployment(&self) -> Option<&Deployment> {
        match &self.variant {
            SignatureKind::Deploy(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_provisionable(&self) -> bool {
        self.deployment().is_some_and(|d| d.provisionable)
    }

    pub fn is_reused(&self) -> bool {
        matches!(self.variant, SignatureKind::Object { reused: true, .. })
    }

    pub fn key(&self) -> SignatureKey {
        SignatureKey {
            selector: self.selector.clone(),
            service_type: self.service_type.clone(),
            provider_name: self.provider_name.clone(),
        }
    }

    /// Context paths this signature reads from its caller.
    pub fn input_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        if let Some(rp) = &self.return_path {
            paths.extend(rp.in_paths.iter().cloned());
        }
        if let Some(connector) = &self.in_connector {
            for path in connector.external_paths() {
                if !paths.iter().any(|p| p == path) {
                    paths.push(path.to_string());
                }
            }
        }
        paths
    }

    /// Drop the cached provider binding; the next resolution looks it up again.
    pub fn close(&self) {
        let mut binding = lock(&self.binding);
        binding.provider = None;
        binding.codebase_checked = false;
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.binding).provider.is_some()
    }

    pub(crate) fn cached_provider(&self) -> Option<ProviderHandle> {
        lock(&self.binding).provider.clone()
    }

    pub(crate) fn bind_provider(&self, provider: ProviderHandle) {
        lock(&self.binding).provider = Some(provider);
    }

    pub(crate) fn codebase_checked(&self) -> bool {
        lock(&self.binding).codebase_checked
    }

    pub(crate) fn mark_codebase_checked(&self) {
        lock(&self.binding).codebase_checked = true;
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.selector == other.selector
            && self.service_type == other.service_type
            && self.provider_name == other.provider_name
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.selector.hash(state);
        self.service_type.hash(state);
        self.provider_name.hash(state);
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}",
            self.service_type, self.selector, self.provider_name
        )
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("selector", &self.selector)
            .field("service_type", &self.service_type)
            .field("provider_name", &self.provider_name)
            .field("exec_kind", &self.exec_kind)
            .field("variant", &self.variant)
            .field("return_path", &self.return_path)
            .field("bound", &self.is_bound())
            .finish()
    }
}
