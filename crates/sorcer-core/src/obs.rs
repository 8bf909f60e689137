//! Structured observability hooks for model evaluation.
//!
//! This module provides:
//! - Pass-scoped tracing spans via [`pass_span`]
//! - Emission functions for resolution, evaluation and reconfiguration events
//!
//! Events are emitted at `info!` level (failures at `warn!`). Filter them with
//! `RUST_LOG`, e.g. `RUST_LOG=sorcer_core=debug`.

use tracing::{info, warn, Span};

/// Span covering one evaluation pass. Attach it with
/// [`tracing::Instrument`] so it stays correct across await points.
///
/// # Example
///
/// ```ignore
/// pass.evaluate(path).instrument(pass_span("arithmetic", 0)).await
/// // every event below carries model = "arithmetic", tick = 0
/// ```
pub fn pass_span(model: &str, tick: u64) -> Span {
    tracing::info_span!("sorcer.pass", model = %model, tick = tick)
}

/// Emit event: an evaluation pass started for the given response paths.
pub fn emit_pass_started(model: &str, tick: u64, paths: &[String]) {
    info!(
        event = "pass.started",
        model = %model,
        tick = tick,
        paths = %paths.join(","),
    );
}

/// Emit event: a path produced its value.
pub fn emit_path_evaluated(path: &str, elapsed_ms: u64) {
    info!(event = "path.evaluated", path = %path, elapsed_ms = elapsed_ms);
}

/// Emit event: a path failed (warning level).
pub fn emit_path_failed(path: &str, error: &dyn std::fmt::Display) {
    warn!(event = "path.failed", path = %path, error = %error);
}

/// Emit event: a fidelity slot switched candidates.
pub fn emit_fidelity_reconfigured(slot: &str, candidate: &str, generation: u64) {
    info!(
        event = "fidelity.reconfigured",
        slot = %slot,
        candidate = %candidate,
        generation = generation,
    );
}

/// Emit event: a signature was bound to an executable.
pub fn emit_provider_resolved(signature: &str, binding: &str) {
    info!(event = "provider.resolved", signature = %signature, binding = %binding);
}

/// Emit event: a deployable group was provisioned.
pub fn emit_deployment_provisioned(deployment_id: &str, elements: usize) {
    info!(
        event = "deployment.provisioned",
        deployment_id = %deployment_id,
        elements = elements,
    );
}

/// Emit event: a pass ended without committing its staged reconfiguration
/// (warning level).
pub fn emit_reconfiguration_discarded(model: &str, changes: usize) {
    warn!(
        event = "reconfiguration.discarded",
        model = %model,
        changes = changes,
    );
}

/// Emit event: committing staged reconfiguration failed (warning level).
pub fn emit_commit_failed(model: &str, error: &dyn std::fmt::Display) {
    warn!(event = "reconfiguration.commit_failed", model = %model, error = %error);
}
