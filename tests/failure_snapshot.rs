//! Fatal-path behavior: errors propagate unchanged and the process-wide
//! diagnostic slot captures the live tracer at the failure point.
//!
//! These tests share one process-wide slot, so they run serially in one
//! test to avoid racing on it.

mod common;

use common::fixture;
use tapir::ir::{CfgBuilder, Expr};
use tapir::registry::ParamType;
use tapir::trace::{latest_failed_trace, print_failure_stack, TraceError};
use tapir::value::Value;
use tapir::trace;

#[test]
fn test_failure_snapshots() {
    let fx = fixture();

    // --- AmbiguousDispatch two frames deep ---------------------------------
    // outer -> mid -> amb(Int) has two candidate methods.
    let err = trace(&fx.registry, fx.outer, &[Value::Int(7)]).unwrap_err();
    match &err {
        TraceError::AmbiguousDispatch {
            func, candidates, ..
        } => {
            assert_eq!(func, "amb");
            assert_eq!(*candidates, 2);
        }
        other => panic!("expected AmbiguousDispatch, got {:?}", other),
    }

    // The slot holds the tracer as it stood: outer and mid active, amb
    // never entered.
    let snapshot = latest_failed_trace().expect("failure slot must be populated");
    assert_eq!(snapshot.depth(), 2);
    assert_eq!(snapshot.stack()[0].func_name(), "outer");
    assert_eq!(snapshot.stack()[1].func_name(), "mid");
    // The input had been registered before the failure
    assert_eq!(snapshot.tape().len(), 1);
    assert!(snapshot.tape().result().is_none());
    print_failure_stack();

    // --- UnsupportedInstruction ---------------------------------------------
    let mut registry = fx.registry;
    let with_enter = registry.register("with_enter", "user");
    let mut b = CfgBuilder::new(0);
    b.opaque("enter #2");
    b.ret(Expr::int(0));
    registry.add_cfg_method(with_enter, vec![], b.finish());

    let err = trace(&registry, with_enter, &[]).unwrap_err();
    match &err {
        TraceError::UnsupportedInstruction { pc, instr, cfg } => {
            assert_eq!(*pc, 0);
            assert_eq!(instr, "enter #2");
            assert_eq!(cfg.blocks.len(), 1);
        }
        other => panic!("expected UnsupportedInstruction, got {:?}", other),
    }
    // The slot was overwritten, not accumulated
    let snapshot = latest_failed_trace().expect("failure slot must be populated");
    assert_eq!(snapshot.depth(), 1);
    assert_eq!(snapshot.stack()[0].func_name(), "with_enter");

    // --- MalformedControlFlow: phi with no matching edge --------------------
    let bad_phi = registry.register("bad_phi", "user");
    let mut b = CfgBuilder::new(1);
    b.goto(1);
    b.start_block();
    // The only edge names a pc outside any block
    let p = b.phi(vec![(99, Expr::arg(0))]);
    b.ret(p);
    registry.add_cfg_method(bad_phi, vec![ParamType::Any], b.finish());

    let err = trace(&registry, bad_phi, &[Value::Int(1)]).unwrap_err();
    assert!(matches!(err, TraceError::MalformedControlFlow { .. }));

    // --- MalformedControlFlow: jump to a nonexistent block ------------------
    let bad_goto = registry.register("bad_goto", "user");
    let mut b = CfgBuilder::new(0);
    b.goto(5);
    registry.add_cfg_method(bad_goto, vec![], b.finish());

    let err = trace(&registry, bad_goto, &[]).unwrap_err();
    assert!(matches!(err, TraceError::MalformedControlFlow { .. }));

    // --- Dispatch failure for an argument type with no method ---------------
    let err = trace(&registry, fx.g, &[Value::Int(1), Value::Int(2)]).unwrap_err();
    match &err {
        TraceError::AmbiguousDispatch { candidates, .. } => assert_eq!(*candidates, 0),
        other => panic!("expected AmbiguousDispatch, got {:?}", other),
    }
}
