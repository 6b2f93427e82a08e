//! The interception policy: the tracer's customization seam.
//!
//! At every call site the tracer asks the policy whether the callee is
//! *primitive* (recorded onto the tape verbatim, or replaced by whatever
//! entries the recording hook chooses to append) or *ordinary* (recursed
//! into via its CFG). The policy travels on the tape as its user context;
//! its identity partitions otherwise-identical traces - same code,
//! different recorded graphs.
//!
//! Policy operations must not touch the frame stack; they operate purely on
//! the record store and the supplied operand values.

use std::collections::HashSet;

use smallvec::SmallVec;
use tracing::trace;

use crate::registry::{FuncId, Registry};
use crate::tape::{Entry, Operand, Tape, ValueId};
use crate::value::Value;

use super::types::{TraceError, TraceResult};

/// Declaring scopes whose functions the default policy treats as
/// primitive.
pub const STD_SCOPES: &[&str] = &["core", "math"];

/// Strategy object deciding, per call site, primitive-vs-recurse and how a
/// primitive call lands on the tape.
pub trait TracePolicy: Send + Sync {
    /// Should this call be recorded rather than recursed into? `args` are
    /// the already-resolved concrete argument values.
    fn is_primitive(&self, registry: &Registry, callee: &Value, args: &[Value]) -> bool {
        let _ = args;
        default_is_primitive(registry, callee)
    }

    /// Record a primitive call, returning the handle of its logical
    /// result. Overrides may append a different entry sequence (call
    /// replacement or decomposition) as long as exactly one handle
    /// representing the result comes back, without invoking the original
    /// callee twice.
    fn record_primitive(
        &self,
        tape: &mut Tape,
        registry: &Registry,
        callee: Value,
        args: Vec<Operand>,
    ) -> TraceResult<ValueId> {
        default_record_primitive(tape, registry, callee, args)
    }
}

/// The default primitive test: true for the always-primitive special forms
/// (tuple/allocation helpers, the colon range marker, the generator
/// wrapper), for any named-tuple-shaped callee, and for functions whose
/// declaring scope is in [`STD_SCOPES`].
pub fn default_is_primitive(registry: &Registry, callee: &Value) -> bool {
    if callee.is_named_tuple() {
        return true;
    }
    match callee.as_func() {
        Some(func) => {
            registry.is_special_form(func) || STD_SCOPES.contains(&registry.scope_of(func))
        }
        None => false,
    }
}

/// The default recording hook: compute the concrete result by direct
/// application, append one Call entry, return its handle.
pub fn default_record_primitive(
    tape: &mut Tape,
    registry: &Registry,
    callee: Value,
    args: Vec<Operand>,
) -> TraceResult<ValueId> {
    let vals = args
        .iter()
        .map(|op| match op {
            Operand::Id(id) => tape.value_of(*id).cloned().ok_or_else(|| {
                TraceError::MalformedControlFlow {
                    pc: None,
                    detail: format!("operand {} is not on the tape", id),
                }
            }),
            Operand::Lit(v) => Ok(v.clone()),
        })
        .collect::<TraceResult<Vec<_>>>()?;
    let value = registry.apply(&callee, &vals)?;
    let id = tape.append(Entry::Call {
        callee,
        args: SmallVec::from_vec(args),
        value,
    });
    trace!(target: "tapir::trace::record", id = id.0, "recorded primitive");
    Ok(id)
}

/// The stock policy. With an empty allow-list it applies the default
/// primitive test; with a non-empty allow-list, membership in the list is
/// the sole criterion.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    pub allowlist: HashSet<FuncId>,
}

impl DefaultPolicy {
    pub fn new() -> DefaultPolicy {
        DefaultPolicy::default()
    }

    /// A policy treating exactly the listed functions as primitive.
    pub fn with_allowlist(funcs: impl IntoIterator<Item = FuncId>) -> DefaultPolicy {
        DefaultPolicy {
            allowlist: funcs.into_iter().collect(),
        }
    }
}

impl TracePolicy for DefaultPolicy {
    fn is_primitive(&self, registry: &Registry, callee: &Value, _args: &[Value]) -> bool {
        if self.allowlist.is_empty() {
            default_is_primitive(registry, callee)
        } else {
            callee
                .as_func()
                .map(|f| self.allowlist.contains(&f))
                .unwrap_or(false)
        }
    }
}
