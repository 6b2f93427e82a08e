//! The trace driver.
//!
//! Tracing walks one concrete execution of a callable's CFG and linearizes
//! it onto a [`Tape`]: ordinary calls are recursed into, primitive calls
//! are recorded, control flow is resolved away. The walk is one explicit
//! iterative state machine over an explicit activation stack - nested
//! traced calls never recurse on the host stack, which keeps host stack
//! depth bounded and lets the failure snapshot capture the whole dynamic
//! call tree uniformly.
//!
//! This module is organized into submodules by functionality:
//! - `types`: `TraceError`/`TraceResult`
//! - `frame`: per-activation frames and CFG flattening
//! - `block`: resumable block interpretation
//! - `dispatch`: call interception, variadic regrouping, recursion setup
//! - `policy`: the interception-policy seam and the default policy

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::registry::{FuncId, MethodBody, Registry};
use crate::tape::{Entry, Operand, Tape, ValueId};
use crate::value::Value;

// === Submodules ===

mod block;
mod dispatch;
mod frame;
pub mod policy;
mod types;

// === Re-exports ===

pub use frame::Frame;
pub use policy::{
    default_is_primitive, default_record_primitive, DefaultPolicy, TracePolicy, STD_SCOPES,
};
pub use types::{TraceError, TraceResult};

use block::{BlockExit, StepEvent};

/// Process-wide diagnostic slot holding the most recent failing tracer.
/// Written only on trace failure, overwritten (not accumulated) on each new
/// failure, read only by [`latest_failed_trace`] and
/// [`print_failure_stack`]. Never consulted for control flow.
static LAST_FAILURE: Mutex<Option<Tracer>> = Mutex::new(None);

/// One element of the driver's activation stack: a frame plus the walk
/// position inside it.
#[derive(Debug, Clone)]
pub struct Activation {
    func: FuncId,
    func_name: String,
    pub(crate) frame: Frame,
    /// Current block index
    pub(crate) bi: usize,
    /// Previously executed block index (phi resolution)
    pub(crate) prev: Option<usize>,
    /// Resume index into the current block's flattened instruction list
    pub(crate) idx: usize,
    /// The call pc in the caller awaiting this activation's result
    pub(crate) caller_pc: Option<usize>,
}

impl Activation {
    pub fn func(&self) -> FuncId {
        self.func
    }

    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    /// The block the walk was in
    pub fn block(&self) -> usize {
        self.bi
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

/// Driver state for one top-level trace: the tape under construction plus
/// the explicit activation stack mirroring the dynamic call tree.
#[derive(Debug, Clone)]
pub struct Tracer {
    pub(crate) tape: Tape,
    pub(crate) stack: Vec<Activation>,
}

impl Tracer {
    fn new(policy: Arc<dyn TracePolicy>) -> Tracer {
        Tracer {
            tape: Tape::new(policy),
            stack: Vec::new(),
        }
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// The activation stack as it stood (bottom first)
    pub fn stack(&self) -> &[Activation] {
        &self.stack
    }

    /// Dynamic call nesting depth
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Dereference an operand to its concrete value.
    pub(crate) fn concrete(&self, op: &Operand) -> TraceResult<Value> {
        match op {
            Operand::Id(id) => self.tape.value_of(*id).cloned().ok_or_else(|| {
                TraceError::MalformedControlFlow {
                    pc: None,
                    detail: format!("operand {} is not on the tape", id),
                }
            }),
            Operand::Lit(v) => Ok(v.clone()),
        }
    }

    /// Set up the root activation and run the walk to completion.
    fn run_root(
        &mut self,
        registry: &Registry,
        func: FuncId,
        args: &[Value],
    ) -> TraceResult<ValueId> {
        let types: Vec<_> = args.iter().map(Value::value_type).collect();
        let resolved = registry.resolve(func, &types)?;
        let method = registry.method_of(func, resolved.method).ok_or_else(|| {
            TraceError::MalformedControlFlow {
                pc: None,
                detail: "resolved method index out of range".to_string(),
            }
        })?;
        let cfg = match &method.body {
            MethodBody::Cfg(cfg) => Arc::clone(cfg),
            MethodBody::Builtin(_) => {
                return Err(TraceError::AmbiguousDispatch {
                    func: registry.name_of(func).to_string(),
                    types,
                    candidates: 0,
                });
            }
        };

        // Variadic callables group their trailing arguments into one tuple
        // before the inputs are registered; the tape is tagged so
        // downstream consumers know the input surface was regrouped.
        let mut vals = args.to_vec();
        if method.variadic {
            let fixed = method.fixed_arity();
            let trailing = vals.split_off(fixed);
            vals.push(Value::Tuple(trailing));
            self.tape
                .meta
                .insert("variadic".to_string(), Value::Bool(true));
        }

        // Every top-level argument is registered as an Input entry;
        // literals are never passed through unrecorded at the top level.
        let inputs = self.tape.register_inputs(&vals);
        let frame = Frame::new(
            cfg,
            inputs.into_iter().map(Operand::Id).collect(),
            resolved.statics,
        )?;
        self.stack.push(Activation {
            func,
            func_name: registry.name_of(func).to_string(),
            frame,
            bi: 0,
            prev: None,
            idx: 0,
            caller_pc: None,
        });
        self.run(registry)
    }

    /// The iterative walk: step the active frame's block, descend on
    /// non-primitive calls, follow transfers, pop on return.
    fn run(&mut self, registry: &Registry) -> TraceResult<ValueId> {
        loop {
            match self.step_block(registry)? {
                StepEvent::Descend(d) => {
                    let frame = Frame::new(d.cfg, d.args, d.statics)?;
                    let func_name = registry.name_of(d.func).to_string();
                    trace!(
                        target: "tapir::trace::frame",
                        func = %func_name,
                        depth = self.stack.len() + 1,
                        "push"
                    );
                    self.stack.push(Activation {
                        func: d.func,
                        func_name,
                        frame,
                        bi: 0,
                        prev: None,
                        idx: 0,
                        caller_pc: Some(d.pc),
                    });
                }
                StepEvent::Exit(exit) => {
                    if let Some(result) = self.follow_exit(registry, exit)? {
                        return Ok(result);
                    }
                }
            }
        }
    }

    /// Apply one block exit to the active activation. `Some` means the
    /// top-level trace finished with that result handle.
    fn follow_exit(
        &mut self,
        _registry: &Registry,
        exit: BlockExit,
    ) -> TraceResult<Option<ValueId>> {
        let act_idx = self.stack.len().checked_sub(1).ok_or_else(|| {
            TraceError::MalformedControlFlow {
                pc: None,
                detail: "control transfer with no active frame".to_string(),
            }
        })?;
        match exit {
            BlockExit::Return(src) => {
                let op = self.stack[act_idx].frame.resolve(&src)?;
                // A binding that is already a tape handle is used
                // directly; a literal is wrapped as a fresh constant.
                let id = match op {
                    Operand::Id(id) => id,
                    Operand::Lit(value) => self.tape.append(Entry::Const { value }),
                };
                self.finish_activation(id)
            }
            BlockExit::FellThrough => {
                let exhausted = {
                    let act = &mut self.stack[act_idx];
                    act.prev = Some(act.bi);
                    act.bi += 1;
                    act.idx = 0;
                    act.bi >= act.frame.layout.blocks.len()
                };
                if exhausted {
                    self.implicit_result()
                } else {
                    Ok(None)
                }
            }
            BlockExit::Goto(dest) => {
                self.jump_to(act_idx, dest)?;
                Ok(None)
            }
            BlockExit::Branch { cond, dest } => {
                // A CFG-local condition dereferences to its concrete
                // value; a literal condition is used as-is.
                let op = self.stack[act_idx].frame.resolve(&cond)?;
                let value = self.concrete(&op)?;
                let taken = value.as_bool().ok_or_else(|| {
                    TraceError::Eval(crate::interp::EvalError::TypeMismatch {
                        expected: "Bool",
                        got: value.type_name(),
                    })
                })?;
                trace!(target: "tapir::trace::block", taken, dest, "branch");
                if taken {
                    let exhausted = {
                        let act = &mut self.stack[act_idx];
                        act.prev = Some(act.bi);
                        act.bi += 1;
                        act.idx = 0;
                        act.bi >= act.frame.layout.blocks.len()
                    };
                    if exhausted {
                        self.implicit_result()
                    } else {
                        Ok(None)
                    }
                } else {
                    self.jump_to(act_idx, dest)?;
                    Ok(None)
                }
            }
        }
    }

    fn jump_to(&mut self, act_idx: usize, dest: usize) -> TraceResult<()> {
        let act = &mut self.stack[act_idx];
        if dest >= act.frame.layout.blocks.len() {
            return Err(TraceError::MalformedControlFlow {
                pc: None,
                detail: format!("jump to nonexistent block {}", dest),
            });
        }
        act.prev = Some(act.bi);
        act.bi = dest;
        act.idx = 0;
        Ok(())
    }

    /// Blocks exhausted with no return: the most recently appended tape
    /// entry stands in as the result. A documented heuristic for callables
    /// whose last statement is their value - there is no validation that
    /// the entry belongs to the final block executed.
    fn implicit_result(&mut self) -> TraceResult<Option<ValueId>> {
        let id = self
            .tape
            .last_id()
            .ok_or_else(|| TraceError::MalformedControlFlow {
                pc: None,
                detail: "no explicit return and the record is empty".to_string(),
            })?;
        self.finish_activation(id)
    }

    /// Pop the finished activation and deliver its result: bind it into
    /// the caller's awaiting slot, or finish the trace at top level.
    fn finish_activation(&mut self, id: ValueId) -> TraceResult<Option<ValueId>> {
        let finished = self.stack.pop().ok_or_else(|| {
            TraceError::MalformedControlFlow {
                pc: None,
                detail: "return with no active frame".to_string(),
            }
        })?;
        trace!(
            target: "tapir::trace::frame",
            func = %finished.func_name,
            depth = self.stack.len(),
            "pop"
        );
        match self.stack.last_mut() {
            None => Ok(Some(id)),
            Some(parent) => {
                let pc = finished.caller_pc.ok_or_else(|| {
                    TraceError::MalformedControlFlow {
                        pc: None,
                        detail: "nested activation has no caller slot".to_string(),
                    }
                })?;
                parent.frame.bind(crate::ir::Local::Ssa(pc), Operand::Id(id));
                Ok(None)
            }
        }
    }
}

/// Trace one concrete execution of `func` on `args` with the default
/// interception policy, returning the result value and the finished tape.
pub fn trace(registry: &Registry, func: FuncId, args: &[Value]) -> TraceResult<(Value, Tape)> {
    trace_with(registry, func, args, Arc::new(DefaultPolicy::new()))
}

/// Like [`trace`], with an explicit interception policy. On failure the
/// live tracer (tape plus activation stack) is moved into the process-wide
/// diagnostic slot before the original error propagates unchanged.
pub fn trace_with(
    registry: &Registry,
    func: FuncId,
    args: &[Value],
    policy: Arc<dyn TracePolicy>,
) -> TraceResult<(Value, Tape)> {
    debug!(
        target: "tapir::trace",
        func = registry.name_of(func),
        nargs = args.len(),
        "trace start"
    );
    let mut tracer = Tracer::new(policy);
    match tracer.run_root(registry, func, args) {
        Ok(id) => {
            tracer.tape.set_result(id);
            let Tracer { tape, .. } = tracer;
            let value = tape.value_of(id).cloned().ok_or_else(|| {
                TraceError::MalformedControlFlow {
                    pc: None,
                    detail: "result handle is not on the tape".to_string(),
                }
            })?;
            debug!(
                target: "tapir::trace",
                entries = tape.len(),
                "trace complete"
            );
            Ok((value, tape))
        }
        Err(err) => {
            debug!(target: "tapir::trace", error = %err, "trace failed");
            *LAST_FAILURE.lock() = Some(tracer);
            Err(err)
        }
    }
}

/// The most recent failing tracer, if any trace has failed in this
/// process. Intended purely for interactive post-mortem inspection; not a
/// substitute for structured error reporting.
pub fn latest_failed_trace() -> Option<Tracer> {
    LAST_FAILURE.lock().clone()
}

/// Print the frame stack of the most recent failing trace to stdout.
pub fn print_failure_stack() {
    match latest_failed_trace() {
        None => println!("no failed trace recorded"),
        Some(tracer) => {
            println!(
                "most recent failed trace: {} frame(s), {} tape entries",
                tracer.depth(),
                tracer.tape().len()
            );
            for (depth, act) in tracer.stack().iter().enumerate().rev() {
                println!(
                    "  #{} {} (block {}, {} operand(s))",
                    depth,
                    act.func_name(),
                    act.block(),
                    act.frame().args().len()
                );
            }
        }
    }
}
