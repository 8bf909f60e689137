//! Structured tracing events and pass spans.

mod common;

use std::sync::Arc;

use sorcer_core::obs::{
    emit_deployment_provisioned, emit_fidelity_reconfigured, emit_pass_started,
    emit_path_evaluated, emit_path_failed, emit_provider_resolved, pass_span,
};
use anyhow::Result;
use serde_json::Value;
use sorcer_core::{FidelityChanges, FidelityView, Model, MultiFidelity};
use tracing_test::traced_test;

use common::{op, session, Calls};

#[traced_test]
#[test]
fn test_emitters_log_event_names() {
    let _entered = pass_span("arithmetic", 0).entered();
    emit_pass_started("arithmetic", 0, &["subtract".to_string()]);
    emit_path_evaluated("subtract", 3);
    emit_fidelity_reconfigured("mFi2", "divide", 1);
    emit_provider_resolved("Arithmetic#add@*", "object");
    emit_deployment_provisioned("ab12", 1);

    assert!(logs_contain("pass.started"));
    assert!(logs_contain("path.evaluated"));
    assert!(logs_contain("fidelity.reconfigured"));
    assert!(logs_contain("provider.resolved"));
    assert!(logs_contain("deployment.provisioned"));
}

#[traced_test]
#[test]
fn test_path_failed_logs_at_warn() {
    emit_path_failed("ratio", &"division by zero");
    assert!(logs_contain("WARN"));
    assert!(logs_contain("division by zero"));
}

#[traced_test]
#[tokio::test]
async fn test_evaluation_emits_pass_and_path_events() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = Model::builder("traced")
        .input("x1", 1.0)
        .input("x2", 2.0)
        .srv("sum", op("add", "sum/out", &["x1", "x2"]))
        .build()
        .unwrap();

    let paths = ["sum".to_string()];
    session.responses(&model, &paths).await.unwrap();
    session.metrics().flush();

    assert!(logs_contain("sorcer.pass"));
    assert!(logs_contain("path.evaluated"));
    assert!(logs_contain("provider.resolved"));
}

fn divide_next(
    changes: &mut FidelityChanges<'_>,
    _view: &FidelityView,
    _value: &Value,
) -> Result<()> {
    changes.select("mFi2", "divide")?;
    Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_dropped_pass_warns_about_discarded_reconfiguration() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let out = |slot: &str| format!("{slot}/out");
    let model = Model::builder("abandoned")
        .input("x1", 90.0)
        .input("x2", 10.0)
        .fidelity(
            MultiFidelity::of_signatures(
                "mFi1",
                [op("add", &out("mFi1"), &["x1", "x2"])],
            )
            .unwrap()
            .with_morpher(divide_next),
        )
        .fidelity(
            MultiFidelity::of_signatures(
                "mFi2",
                ["multiply", "divide"].map(|o| op(o, &out("mFi2"), &["x1", "x2"])),
            )
            .unwrap(),
        )
        .build()
        .unwrap();

    {
        let mut pass = session.pass(&model);
        pass.response("mFi1").await.unwrap();
        assert_eq!(pass.staged().len(), 1);
    }

    assert!(logs_contain("reconfiguration.discarded"));
    assert_eq!(model.fidelities().selected_name("mFi2").unwrap(), "multiply");
}
