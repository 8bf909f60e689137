//! Deployment descriptors and the deployable-group builder consumed when a
//! provisionable signature has no live provider.
//!
//! Signatures whose normalized deployment attributes are identical coalesce
//! into one [`ServiceElement`]. The group id is derived deterministically
//! from the sorted `provider:type` pairs of the input signatures, so the same
//! set of signatures always maps to the same group.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::signature::Signature;

/// Provisioning attributes carried by a deployment-bound signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deployment {
    pub provider_name: String,
    pub service_types: Vec<String>,
    pub multiplicity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_node: Option<u32>,
    #[serde(default)]
    pub jars: Vec<String>,
    #[serde(default)]
    pub codebase: Vec<String>,
    /// Minutes without use after which the provisioned service is released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_minutes: Option<u32>,
    pub provisionable: bool,
}

impl Deployment {
    pub fn new(provider_name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            service_types: vec![service_type.into()],
            multiplicity: 1,
            max_per_node: None,
            jars: Vec::new(),
            codebase: Vec::new(),
            idle_minutes: None,
            provisionable: true,
        }
    }

    pub fn with_multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn with_max_per_node(mut self, max: u32) -> Self {
        self.max_per_node = Some(max);
        self
    }

    pub fn with_jars<I, S>(mut self, jars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jars = jars.into_iter().map(Into::into).collect();
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

    pub fn with_idle_minutes(mut self, minutes: u32) -> Self {
        self.idle_minutes = Some(minutes);
        self
    }

    pub fn not_provisionable(mut self) -> Self {
        self.provisionable = false;
        self
    }

    /// Canonical form used for coalescing: trimmed name, sorted and
    /// de-duplicated lists.
    pub fn normalized(&self) -> Deployment {
        fn canon(list: &[String]) -> Vec<String> {
            let mut out: Vec<String> = list.iter().map(|s| s.trim().to_string()).collect();
            out.sort();
            out.dedup();
            out
        }
        Deployment {
            provider_name: self.provider_name.trim().to_string(),
            service_types: canon(&self.service_types),
            multiplicity: self.multiplicity,
            max_per_node: self.max_per_node,
            jars: canon(&self.jars),
            codebase: canon(&self.codebase),
            idle_minutes: self.idle_minutes,
            provisionable: self.provisionable,
        }
    }
}

/// Why a set of signatures could not be turned into a deployable group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeploymentBuildError {
    #[error("no signatures to deploy")]
    Empty,

    #[error("signature {signature} carries no deployment descriptor")]
    MissingDeployment { signature: String },

    #[error("signature {signature} declares invalid multiplicity {multiplicity}")]
    InvalidMultiplicity { signature: String, multiplicity: u32 },

    #[error("signature {signature} declares an empty provider name")]
    EmptyProviderName { signature: String },

    #[error("signature {signature} is not provisionable")]
    NotProvisionable { signature: String },
}

/// One deployable service: a normalized deployment plus the operations
/// (signatures) it must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceElement {
    pub deployment: Deployment,
    pub operations: Vec<String>,
}

/// Opaque unit handed to the provisioning collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployableGroup {
    pub id: String,
    pub name: String,
    pub elements: Vec<ServiceElement>,
}

/// Deterministic id for a set of signatures: `provider:type` pairs sorted,
/// `;`-joined, `*` replaced by `#`, SHA-256 hex.
pub fn deployment_id(signatures: &[Signature]) -> String {
    let mut names: Vec<String> = signatures
        .iter()
        .map(|s| format!("{}:{}", s.provider_name(), s.service_type()))
        .collect();
    names.sort();
    names.dedup();
    let joined = names.join(";").replace('*', "#");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Build one deployable group from deployment-bound signatures.
pub fn build_deployable_group(
    signatures: &[Signature],
) -> Result<DeployableGroup, DeploymentBuildError> {
    if signatures.is_empty() {
        return Err(DeploymentBuildError::Empty);
    }

    let mut elements: Vec<ServiceElement> = Vec::new();
    for signature in signatures {
        let deployment =
            signature
                .deployment()
                .ok_or_else(|| DeploymentBuildError::MissingDeployment {
                    signature: signature.to_string(),
                })?;
        if !deployment.provisionable {
            return Err(DeploymentBuildError::NotProvisionable {
                signature: signature.to_string(),
            });
        }
        if deployment.multiplicity == 0 {
            return Err(DeploymentBuildError::InvalidMultiplicity {
                signature: signature.to_string(),
                multiplicity: deployment.multiplicity,
            });
        }
        let normalized = deployment.normalized();
        if normalized.provider_name.is_empty() {
            return Err(DeploymentBuildError::EmptyProviderName {
                signature: signature.to_string(),
            });
        }

        let operation = signature.to_string();
        match elements.iter_mut().find(|e| e.deployment == normalized) {
            Some(element) => {
                if !element.operations.contains(&operation) {
                    element.operations.push(operation);
                }
            }
            None => elements.push(ServiceElement {
                deployment: normalized,
                operations: vec![operation],
            }),
        }
    }

    let id = deployment_id(signatures);
    let name = elements
        .iter()
        .map(|e| e.deployment.provider_name.as_str())
        .collect::<Vec<_>>()
        .join("+");
    tracing::debug!(deployment_id = %id, elements = elements.len(), "built deployable group");

    Ok(DeployableGroup { id, name, elements })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(selector: &str, provider: &str, service_type: &str) -> Signature {
        Signature::deploy(selector, service_type, Deployment::new(provider, service_type))
    }

    #[test]
    fn test_deployment_id_is_order_independent() {
        let a = sig("add", "Adder", "Adder");
        let m = sig("multiply", "Multiplier", "Multiplier");
        assert_eq!(
            deployment_id(&[a.clone(), m.clone()]),
            deployment_id(&[m, a])
        );
    }

    #[test]
    fn test_deployment_id_replaces_wildcards() {
        let any = Signature::net("add", "Adder");
        let joined = "*:Adder".replace('*', "#");
        assert_eq!(
            deployment_id(&[any]),
            hex::encode(Sha256::digest(joined.as_bytes()))
        );
    }

    #[test]
    fn test_identical_deployments_coalesce() {
        let add = sig("add", "Arithmetic", "Arithmetic");
        let sub = sig("subtract", "Arithmetic", "Arithmetic");
        let mul = sig("multiply", "Multiplier", "Multiplier");
        let group = build_deployable_group(&[add, sub, mul]).unwrap();
        assert_eq!(group.elements.len(), 2);
        assert_eq!(group.elements[0].operations.len(), 2);
        assert_eq!(group.id.len(), 64);
    }

    #[test]
    fn test_missing_deployment_names_signature() {
        let plain = Signature::net("add", "Adder");
        match build_deployable_group(&[plain]) {
            Err(DeploymentBuildError::MissingDeployment { signature }) => {
                assert!(signature.contains("add"));
            }
            other => panic!("expected MissingDeployment, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_multiplicity_rejected() {
        let bad = Signature::deploy(
            "add",
            "Adder",
            Deployment::new("Adder", "Adder").with_multiplicity(0),
        );
        assert!(matches!(
            build_deployable_group(&[bad]),
            Err(DeploymentBuildError::InvalidMultiplicity { multiplicity: 0, .. })
        ));
    }

    #[test]
    fn test_normalized_sorts_lists() {
        let d = Deployment::new(" Adder ", "Adder")
            .with_jars(["b.jar", "a.jar", "a.jar"])
            .normalized();
        assert_eq!(d.provider_name, "Adder");
        assert_eq!(d.jars, vec!["a.jar".to_string(), "b.jar".to_string()]);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(build_deployable_group(&[]), Err(DeploymentBuildError::Empty));
    }
}
