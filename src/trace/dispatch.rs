//! Call-site dispatch: interception, variadic regrouping, recursion setup.

use std::sync::Arc;

use tracing::trace;

use crate::ir::{Expr, Local};
use crate::registry::{MethodBody, Registry};
use crate::tape::Operand;
use crate::value::Value;

use super::block::Descend;
use super::types::{TraceError, TraceResult};
use super::Tracer;

impl Tracer {
    /// Handle one call site: resolve operands, run the primitive test, and
    /// either record via the policy's hook (returning `None`) or prepare a
    /// descent into the callee's CFG.
    pub(super) fn dispatch_call(
        &mut self,
        registry: &Registry,
        act_idx: usize,
        pc: usize,
        callee: &Expr,
        args: &[Expr],
    ) -> TraceResult<Option<Descend>> {
        let callee_op = self.stack[act_idx].frame.resolve(callee)?;
        let callee_val = self.concrete(&callee_op)?;
        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.stack[act_idx].frame.resolve(arg)?);
        }
        let arg_vals = operands
            .iter()
            .map(|op| self.concrete(op))
            .collect::<TraceResult<Vec<_>>>()?;

        let policy = Arc::clone(self.tape.context());
        if policy.is_primitive(registry, &callee_val, &arg_vals) {
            trace!(
                target: "tapir::trace::call",
                pc,
                callee = %callee_val,
                "primitive"
            );
            let id = policy.record_primitive(&mut self.tape, registry, callee_val, operands)?;
            self.stack[act_idx]
                .frame
                .bind(Local::Ssa(pc), Operand::Id(id));
            return Ok(None);
        }

        let func = callee_val
            .as_func()
            .ok_or_else(|| TraceError::NotCallable(callee_val.to_string()))?;
        let types: Vec<_> = arg_vals.iter().map(Value::value_type).collect();
        let resolved = registry.resolve(func, &types)?;
        let method = registry.method_of(func, resolved.method).ok_or_else(|| {
            TraceError::MalformedControlFlow {
                pc: Some(pc),
                detail: "resolved method index out of range".to_string(),
            }
        })?;
        let cfg = match &method.body {
            MethodBody::Cfg(cfg) => Arc::clone(cfg),
            // A builtin the policy declined to record has no CFG to
            // recurse into: zero candidate CFGs.
            MethodBody::Builtin(_) => {
                return Err(TraceError::AmbiguousDispatch {
                    func: registry.name_of(func).to_string(),
                    types,
                    candidates: 0,
                });
            }
        };

        if method.variadic {
            let fixed = method.fixed_arity();
            let trailing = operands.split_off(fixed);
            trace!(
                target: "tapir::trace::call",
                pc,
                trailing = trailing.len(),
                "group varargs"
            );
            let tuple = Value::Func(registry.tuple_func());
            let grouped = policy.record_primitive(&mut self.tape, registry, tuple, trailing)?;
            operands.push(Operand::Id(grouped));
        }

        trace!(
            target: "tapir::trace::call",
            pc,
            func = registry.name_of(func),
            "descend"
        );
        Ok(Some(Descend {
            pc,
            func,
            cfg,
            args: operands,
            statics: resolved.statics,
        }))
    }
}
