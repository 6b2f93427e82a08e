//! The interception policy decides what lands on the tape: the default
//! scope-based test, allow-lists as the sole criterion, and recording-hook
//! overrides that replace calls wholesale.

mod common;

use std::sync::Arc;

use common::fixture;
use tapir::registry::Registry;
use tapir::tape::{Entry, Operand, Tape, ValueId};
use tapir::trace::{default_record_primitive, DefaultPolicy, TracePolicy, TraceResult};
use tapir::value::Value;
use tapir::{trace, trace_with};

fn call_entries(tape: &Tape) -> Vec<&Entry> {
    tape.iter().filter(|e| e.is_call()).collect()
}

#[test]
fn test_default_policy_inlines_user_functions() {
    let fx = fixture();
    let mul = fx.registry.lookup("*").unwrap();
    let add = fx.registry.lookup("+").unwrap();

    let (value, tape) = trace(&fx.registry, fx.f, &[Value::Float(3.0)]).unwrap();
    assert_eq!(value, Value::Float(7.0));

    // Exactly two call entries: *(2, 3.0) then +(., 1)
    let calls = call_entries(&tape);
    assert_eq!(calls.len(), 2);
    match calls[0] {
        Entry::Call { callee, args, value } => {
            assert_eq!(callee.as_func(), Some(mul));
            assert_eq!(
                args.as_slice(),
                &[Operand::Lit(Value::Int(2)), Operand::Id(ValueId(0))]
            );
            assert_eq!(value, &Value::Float(6.0));
        }
        other => panic!("expected a call entry, got {:?}", other),
    }
    match calls[1] {
        Entry::Call { callee, args, value } => {
            assert_eq!(callee.as_func(), Some(add));
            assert_eq!(
                args.as_slice(),
                &[Operand::Id(ValueId(1)), Operand::Lit(Value::Int(1))]
            );
            assert_eq!(value, &Value::Float(7.0));
        }
        other => panic!("expected a call entry, got {:?}", other),
    }
}

#[test]
fn test_allowlist_keeps_g_opaque() {
    let fx = fixture();
    let add = fx.registry.lookup("+").unwrap();
    let policy = Arc::new(DefaultPolicy::with_allowlist([fx.g, add]));

    let (value, tape) = trace_with(&fx.registry, fx.f, &[Value::Float(3.0)], policy).unwrap();
    assert_eq!(value, Value::Float(7.0));

    // Exactly two call entries: g(3.0) then +(., 1) - g is not inlined
    let calls = call_entries(&tape);
    assert_eq!(calls.len(), 2);
    match calls[0] {
        Entry::Call { callee, args, value } => {
            assert_eq!(callee.as_func(), Some(fx.g));
            assert_eq!(args.as_slice(), &[Operand::Id(ValueId(0))]);
            assert_eq!(value, &Value::Float(6.0));
        }
        other => panic!("expected a call entry, got {:?}", other),
    }
    assert!(matches!(calls[1], Entry::Call { callee, .. } if callee.as_func() == Some(add)));
}

#[test]
fn test_allowlist_of_operators_still_inlines_g() {
    let fx = fixture();
    let add = fx.registry.lookup("+").unwrap();
    let mul = fx.registry.lookup("*").unwrap();
    let policy = Arc::new(DefaultPolicy::with_allowlist([add, mul]));

    let (value, tape) = trace_with(&fx.registry, fx.f, &[Value::Float(3.0)], policy).unwrap();
    assert_eq!(value, Value::Float(7.0));
    let calls = call_entries(&tape);
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], Entry::Call { callee, .. } if callee.as_func() == Some(mul)));
    assert!(matches!(calls[1], Entry::Call { callee, .. } if callee.as_func() == Some(add)));
}

/// A policy that records `x * 2` as `x + x` instead - call replacement
/// through the recording hook, one handle out, original callee invoked
/// zero times.
#[derive(Debug)]
struct DoubleAsAdd {
    mul: tapir::FuncId,
    add: tapir::FuncId,
}

impl TracePolicy for DoubleAsAdd {
    fn record_primitive(
        &self,
        tape: &mut Tape,
        registry: &Registry,
        callee: Value,
        args: Vec<Operand>,
    ) -> TraceResult<ValueId> {
        if callee.as_func() == Some(self.mul) {
            if let [Operand::Lit(Value::Int(2)), x] = args.as_slice() {
                let x = x.clone();
                return default_record_primitive(
                    tape,
                    registry,
                    Value::Func(self.add),
                    vec![x.clone(), x],
                );
            }
        }
        default_record_primitive(tape, registry, callee, args)
    }
}

#[test]
fn test_record_hook_replaces_calls() {
    let fx = fixture();
    let add = fx.registry.lookup("+").unwrap();
    let mul = fx.registry.lookup("*").unwrap();
    let policy = Arc::new(DoubleAsAdd { mul, add });

    let (value, tape) = trace_with(&fx.registry, fx.f, &[Value::Float(3.0)], policy).unwrap();
    assert_eq!(value, Value::Float(7.0));
    let calls = call_entries(&tape);
    assert_eq!(calls.len(), 2);
    // The doubling is now recorded as x + x
    match calls[0] {
        Entry::Call { callee, args, value } => {
            assert_eq!(callee.as_func(), Some(add));
            assert_eq!(
                args.as_slice(),
                &[Operand::Id(ValueId(0)), Operand::Id(ValueId(0))]
            );
            assert_eq!(value, &Value::Float(6.0));
        }
        other => panic!("expected a call entry, got {:?}", other),
    }
}

#[test]
fn test_named_tuple_callee_records_verbatim() {
    let fx = fixture();
    let mut registry = fx.registry;
    // pick(x, sel) = sel("a")
    let pick = registry.register("pick", "user");
    let mut b = tapir::CfgBuilder::new(2);
    let v = b.call(tapir::Expr::arg(1), vec![tapir::Expr::str("a")]);
    b.ret(v);
    registry.add_cfg_method(
        pick,
        vec![tapir::ParamType::Any, tapir::ParamType::Any],
        b.finish(),
    );

    let sel = Value::NamedTuple(vec![
        ("a".to_string(), Value::Int(5)),
        ("b".to_string(), Value::Int(6)),
    ]);
    let (value, tape) = trace(&registry, pick, &[Value::Int(0), sel.clone()]).unwrap();
    assert_eq!(value, Value::Int(5));
    let calls = call_entries(&tape);
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], Entry::Call { callee, .. } if *callee == sel));
}

#[test]
fn test_policy_identity_partitions_traces() {
    let fx = fixture();
    let add = fx.registry.lookup("+").unwrap();
    let (_, default_tape) = trace(&fx.registry, fx.f, &[Value::Float(3.0)]).unwrap();
    let (_, listed_tape) = trace_with(
        &fx.registry,
        fx.f,
        &[Value::Float(3.0)],
        Arc::new(DefaultPolicy::with_allowlist([fx.g, add])),
    )
    .unwrap();
    // Same code, same arguments, different recorded graphs
    let d: Vec<&Entry> = default_tape.iter().collect();
    let l: Vec<&Entry> = listed_tape.iter().collect();
    assert_ne!(d, l);
}
