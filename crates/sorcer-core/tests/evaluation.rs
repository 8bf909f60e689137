//! Dependency-ordered evaluation of model response paths.

mod common;

use std::sync::Arc;

use serde_json::json;
use sorcer_core::{
    CancelToken, Candidate, Model, MultiFidelity, ReturnPath, ServiceContext, Signature,
    SorcerError,
};

use common::{op, session, Calls};

fn arithmetic_model() -> Arc<Model> {
    Model::builder("arithmetic")
        .input("multiply/x1", 10.0)
        .input("multiply/x2", 50.0)
        .input("add/x1", 20.0)
        .input("add/x2", 80.0)
        .srv(
            "multiply",
            op("multiply", "multiply/out", &["multiply/x1", "multiply/x2"]),
        )
        .srv("add", op("add", "add/out", &["add/x1", "add/x2"]))
        .srv(
            "subtract",
            op("subtract", "subtract/out", &["multiply", "add"]),
        )
        .responses(["subtract"])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_subtract_of_product_and_sum() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = arithmetic_model();

    let value = session.response(&model, "subtract").await.unwrap();

    assert_eq!(value, json!(400.0));
    assert_eq!(calls.count("multiply"), 1);
    assert_eq!(calls.count("add"), 1);
    assert_eq!(calls.count("subtract"), 1);
    assert_eq!(calls.order().last().map(String::as_str), Some("subtract"));
}

#[tokio::test]
async fn test_shared_pass_evaluates_each_path_once() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = arithmetic_model();

    let paths = ["subtract", "add", "multiply"].map(String::from);
    let responses = session.responses(&model, &paths).await.unwrap();

    assert!(responses.is_ok());
    assert_eq!(responses.get_f64("subtract"), Some(400.0));
    assert_eq!(responses.get_f64("multiply"), Some(500.0));
    assert_eq!(responses.get_f64("add"), Some(100.0));
    assert_eq!(calls.order(), vec!["multiply", "add", "subtract"]);
}

#[test]
fn test_static_order_matches_evaluation() {
    let model = arithmetic_model();
    let order = model.evaluation_order(&["subtract".into()]).unwrap();
    assert_eq!(order, vec!["multiply", "add", "subtract"]);
}

#[tokio::test]
async fn test_dependencies_run_before_dependent_regardless_of_request_order() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let recorder = Arc::clone(&calls);
    let model = Model::builder("ordering")
        .input("x1", 1.0)
        .input("x3", 3.0)
        .input("x4", 4.0)
        .input("x5", 5.0)
        .srv("y1", op("add", "y1/out", &["x1", "x3"]))
        .srv("y2", op("multiply", "y2/out", &["x4", "x5"]))
        .srv(
            "out",
            Signature::eval("h", move |ctx: &ServiceContext| {
                recorder.record("h");
                let y1 = ctx.get_f64("y1").unwrap_or_default();
                let y2 = ctx.get_f64("y2").unwrap_or_default();
                Ok(json!(y1 + y2))
            }),
        )
        .depends("out", ["y1", "y2"])
        .build()
        .unwrap();

    let paths = ["y2", "out", "y1"].map(String::from);
    let responses = session.responses(&model, &paths).await.unwrap();

    assert_eq!(responses.get_f64("out"), Some(24.0));
    assert_eq!(calls.order(), vec!["multiply", "add", "h"]);
    for name in ["add", "multiply", "h"] {
        assert_eq!(calls.count(name), 1, "{name} evaluated more than once");
    }
}

fn constant(selector: &str, value: f64) -> Signature {
    Signature::eval(selector, move |_: &ServiceContext| Ok(json!(value)))
}

#[tokio::test]
async fn test_transitive_cycle_fails_instead_of_hanging() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = Model::builder("cyclic")
        .srv("a", constant("a", 1.0))
        .srv("b", constant("b", 2.0))
        .srv("ok", constant("ok", 3.0))
        .depends("a", ["b"])
        .depends("b", ["a"])
        .build()
        .unwrap();

    let paths = ["a", "ok"].map(String::from);
    let responses = session.responses(&model, &paths).await.unwrap();

    assert_eq!(
        responses.failure("a"),
        Some(&SorcerError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        })
    );
    assert_eq!(responses.get_f64("ok"), Some(3.0));
    assert!(matches!(
        model.evaluation_order(&["b".into()]),
        Err(SorcerError::CyclicDependency { .. })
    ));
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = Model::builder("self")
        .srv("c", constant("c", 1.0))
        .depends("c", ["c"])
        .build()
        .unwrap();

    let err = session.response(&model, "c").await.unwrap_err();
    assert_eq!(
        err,
        SorcerError::CyclicDependency {
            cycle: vec!["c".into(), "c".into()],
        }
    );
}

#[tokio::test]
async fn test_cycle_through_signature_inputs() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = Model::builder("implicit")
        .srv("p", op("add", "p/out", &["q"]))
        .srv("q", op("add", "q/out", &["p"]))
        .build()
        .unwrap();

    let err = session.response(&model, "p").await.unwrap_err();
    assert!(matches!(err, SorcerError::CyclicDependency { ref cycle } if cycle.len() == 3));
    assert_eq!(calls.count("add"), 0);
}

#[tokio::test]
async fn test_failed_path_does_not_poison_independent_paths() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = Model::builder("partial")
        .input("x", 6.0)
        .input("zero", 0.0)
        .srv("ratio", op("divide", "ratio/out", &["x", "zero"]))
        .srv("double", op("add", "double/out", &["x", "x"]))
        .srv("scaled", op("multiply", "scaled/out", &["ratio", "x"]))
        .build()
        .unwrap();

    let paths = ["double", "scaled", "ratio"].map(String::from);
    let responses = session.responses(&model, &paths).await.unwrap();

    assert_eq!(responses.get_f64("double"), Some(12.0));
    assert!(matches!(
        responses.failure("ratio"),
        Some(SorcerError::Evaluation { path, reason }) if path == "ratio" && reason.contains("division by zero")
    ));
    // The dependent path surfaces the dependency's failure; divide ran once.
    assert_eq!(responses.failure("scaled"), responses.failure("ratio"));
    assert_eq!(calls.count("divide"), 1);
    assert!(responses.into_result().is_err());
}

#[tokio::test]
async fn test_put_input_overrides_and_starts_a_new_tick() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = arithmetic_model();

    let mut pass = session.pass(&model);
    assert_eq!(pass.response("subtract").await.unwrap(), json!(400.0));
    assert_eq!(pass.tick(), 0);

    pass.put_input("add/x2", 0.0).unwrap();
    assert_eq!(pass.tick(), 1);
    assert_eq!(pass.response("subtract").await.unwrap(), json!(480.0));
    assert_eq!(calls.count("multiply"), 2);

    assert_eq!(
        pass.put_input("missing", 1.0),
        Err(SorcerError::UnknownPath("missing".into()))
    );
    pass.finish().unwrap();
}

#[tokio::test]
async fn test_cancelled_pass_stops_before_resolution() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = arithmetic_model();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut pass = session.pass(&model).with_cancel(cancel);
    assert_eq!(
        pass.response("subtract").await,
        Err(SorcerError::Cancelled)
    );
    assert!(calls.order().is_empty());
}

#[tokio::test]
async fn test_sub_model_answers_with_its_responses() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let inner = arithmetic_model();
    let outer = Model::builder("outer")
        .input("add/x1", 1.0)
        .srv(
            "inner",
            Signature::model("run", Arc::clone(&inner))
                .with_return_path(ReturnPath::new("inner/out").with_inputs(["add/x1"])),
        )
        .build()
        .unwrap();

    // add/x1 = 1 overrides the inner input: 500 - (1 + 80).
    let value = session.response(&outer, "inner").await.unwrap();
    assert_eq!(value, json!(419.0));
}

#[tokio::test]
async fn test_value_candidate_short_circuits_signature() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let fidelity = MultiFidelity::new(
        "speed",
        vec![
            Candidate::value("cached", 42.0),
            Candidate::signature(op("add", "speed/out", &["x"])),
        ],
    )
    .unwrap();
    let model = Model::builder("values")
        .input("x", 5.0)
        .fidelity(fidelity)
        .build()
        .unwrap();

    assert_eq!(session.response(&model, "speed").await.unwrap(), json!(42.0));
    assert_eq!(calls.count("add"), 0);

    model.fidelities().select("speed", "add").unwrap();
    assert_eq!(session.response(&model, "speed").await.unwrap(), json!(5.0));
}

#[tokio::test]
async fn test_unknown_response_path() {
    let calls = Arc::new(Calls::default());
    let session = session(&calls);
    let model = arithmetic_model();
    assert_eq!(
        session.response(&model, "nope").await,
        Err(SorcerError::UnknownPath("nope".into()))
    );
}
