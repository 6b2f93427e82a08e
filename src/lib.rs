//! Tapir - CFG-linearizing execution tracer
//!
//! Tapir takes a callable and concrete argument values, abstractly
//! interprets the callable's lowered control-flow-graph representation,
//! recursively inlines calls to ordinary functions, and records calls to
//! designated *primitive* functions onto a flat, append-only, SSA
//! execution record (the **tape**). The result is a reproducible,
//! replayable linearization of one dynamic execution: no branches, only a
//! straight-line sequence of operations plus the final value - the
//! substrate for building computation graphs for differentiation, graph
//! optimization, or symbolic replay.
//!
//! # Architecture
//!
//! - **`ir`** - the lowered CFG artifact (basic blocks, phi/pi nodes,
//!   calls, control transfers, pass-inserted instructions) and a builder
//! - **`registry`** - the callable table and signature resolver: typed
//!   method signatures, variadic arities, static (generic) parameters,
//!   declaring scopes
//! - **`tape`** - the append-only record: Input/Const/Call entries,
//!   result pointer, metadata, replay (`play`) and JSON dump
//! - **`trace`** - the driver: an iterative state machine over an explicit
//!   activation stack, a resumable block interpreter, and the pluggable
//!   interception policy deciding primitive-vs-recurse per call site
//! - **`interp`** - direct (non-traced) evaluation, used to compute the
//!   concrete values cached on recorded entries
//!
//! # Example
//!
//! ```rust
//! use tapir::ir::{CfgBuilder, Expr};
//! use tapir::registry::{ParamType, Registry};
//! use tapir::value::Value;
//!
//! // double(x) = 2 * x
//! let mut registry = Registry::new();
//! let mul = registry.lookup("*").unwrap();
//! let double = registry.register("double", "demo");
//! let mut b = CfgBuilder::new(1);
//! let d = b.call(Expr::func(mul), vec![Expr::int(2), Expr::arg(0)]);
//! b.ret(d);
//! registry.add_cfg_method(double, vec![ParamType::Any], b.finish());
//!
//! let (value, tape) = tapir::trace(&registry, double, &[Value::Int(21)]).unwrap();
//! assert_eq!(value, Value::Int(42));
//! assert_eq!(tape.len(), 2); // one input entry, one recorded call
//! ```
//!
//! # Interception
//!
//! The default policy records calls whose callee is an always-primitive
//! special form, a named-tuple-shaped value, or a function declared in a
//! standard-library scope, and recurses into everything else. Attach a
//! custom [`TracePolicy`] with [`trace_with`] to move the primitive
//! boundary or to replace recorded calls wholesale.

mod builtins;
pub mod interp;
pub mod ir;
pub mod registry;
pub mod tape;
pub mod trace;
pub mod value;

pub use interp::{EvalError, EvalLimits, EvalResult};
pub use ir::{Cfg, CfgBuilder, Expr, Instr, Layout, Local};
pub use registry::{FuncId, Method, MethodBody, ParamType, Registry};
pub use tape::{Entry, Operand, Tape, ValueId};
pub use trace::{
    latest_failed_trace, print_failure_stack, trace, trace_with, DefaultPolicy, TraceError,
    TracePolicy, TraceResult, Tracer,
};
pub use value::{Value, ValueType};

#[cfg(test)]
mod tests {
    use super::*;

    fn double_fixture() -> (Registry, FuncId) {
        let mut registry = Registry::new();
        let mul = registry.lookup("*").unwrap();
        let double = registry.register("double", "demo");
        let mut b = CfgBuilder::new(1);
        let d = b.call(Expr::func(mul), vec![Expr::int(2), Expr::arg(0)]);
        b.ret(d);
        registry.add_cfg_method(double, vec![ParamType::Any], b.finish());
        (registry, double)
    }

    #[test]
    fn test_trace_simple() {
        let (registry, double) = double_fixture();
        let (value, tape) = trace(&registry, double, &[Value::Int(21)]).unwrap();
        assert_eq!(value, Value::Int(42));
        assert_eq!(tape.len(), 2);
        assert_eq!(tape.result(), tape.last_id());
    }

    #[test]
    fn test_trace_agrees_with_direct_call() {
        let (registry, double) = double_fixture();
        let direct = registry.call(double, &[Value::Float(1.5)]).unwrap();
        let (traced, _) = trace(&registry, double, &[Value::Float(1.5)]).unwrap();
        assert_eq!(direct, traced);
    }

    #[test]
    fn test_replay_on_new_inputs() {
        let (registry, double) = double_fixture();
        let (_, tape) = trace(&registry, double, &[Value::Int(21)]).unwrap();
        assert_eq!(
            tape.play(&registry, &[Value::Int(5)]).unwrap(),
            Value::Int(10)
        );
    }
}
