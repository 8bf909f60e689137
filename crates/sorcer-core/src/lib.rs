//! SORCER core: signature resolution, multi-fidelity selection and
//! dependency-ordered model evaluation.
//!
//! A [`Session`] owns the caches and collaborators; [`Model`]s declare
//! entries, dependencies and fidelity slots; a [`Pass`] evaluates response
//! paths against a model.

pub mod collab;
pub mod config;
pub mod context;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod exertion;
pub mod fakes;
pub mod fidelity;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod registry;
pub mod resolve;
pub mod session;
pub mod signature;
mod sync;
pub mod telemetry;

pub use collab::{
    CodebaseLoader, Discovery, Provider, ProviderHandle, Provisioner, Script, ScriptHost,
};
pub use config::SessionConfig;
pub use context::{Connector, ContextEntry, Direction, ReturnPath, ServiceContext, RESULT_PATH};
pub use deploy::{
    build_deployable_group, deployment_id, DeployableGroup, Deployment, DeploymentBuildError,
    ServiceElement,
};
pub use engine::{Pass, Responses};
pub use error::{Result, SorcerError};
pub use exertion::Task;
pub use fidelity::{
    Candidate, Change, Fidelity, FidelityChanges, FidelityManager, FidelityView, Morpher,
    MultiFidelity, Named, Projection, Selection,
};
pub use metrics::Metrics;
pub use model::{Entry, Model, ModelBuilder};
pub use registry::{ArgType, ProviderRegistry};
pub use resolve::{ArtifactKey, Bound, CancelToken, Resolved, ResolverHandle};
pub use session::{Session, SessionBuilder};
pub use signature::{Evaluator, ExecKind, Initializer, Signature, SignatureKind, ANY};

/// Crate version, shared by every workspace member.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
