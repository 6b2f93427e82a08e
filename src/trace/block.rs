//! Block interpretation.
//!
//! Executes the flattened instruction list of the active frame's current
//! block, resumably: stepping stops either at a control transfer (handed
//! back to the driver unexecuted) or at a call the policy declines to
//! record, which becomes a descent into a fresh activation. The resume
//! index on the activation lets the walk continue mid-block once the
//! callee's result handle is bound.

use std::sync::Arc;

use crate::ir::{Cfg, Expr, Instr, Local};
use crate::registry::{FuncId, Registry};
use crate::tape::{Entry, Operand};
use crate::value::Value;

use super::types::{TraceError, TraceResult};
use super::Tracer;

/// A call site that must be recursed into.
pub(super) struct Descend {
    /// The call's pc in the caller, awaiting the result handle
    pub pc: usize,
    pub func: FuncId,
    pub cfg: Arc<Cfg>,
    /// Operands for the callee's formal parameters (variadic tail already
    /// grouped)
    pub args: Vec<Operand>,
    pub statics: Vec<Value>,
}

/// How a block stopped executing.
pub(super) enum BlockExit {
    /// End of the instruction list, no control transfer
    FellThrough,
    Goto(usize),
    /// Conditional jump, condition not yet resolved
    Branch { cond: Expr, dest: usize },
    Return(Expr),
}

pub(super) enum StepEvent {
    Descend(Descend),
    Exit(BlockExit),
}

impl Tracer {
    /// Execute the active frame's current block from its resume index.
    pub(super) fn step_block(&mut self, registry: &Registry) -> TraceResult<StepEvent> {
        let act_idx = self.stack.len().checked_sub(1).ok_or_else(|| {
            TraceError::MalformedControlFlow {
                pc: None,
                detail: "block step with no active frame".to_string(),
            }
        })?;
        loop {
            let (pc, slot) = {
                let act = &self.stack[act_idx];
                match act
                    .frame
                    .layout
                    .blocks
                    .get(act.bi)
                    .and_then(|block| block.get(act.idx))
                {
                    Some(&entry) => entry,
                    None => return Ok(StepEvent::Exit(BlockExit::FellThrough)),
                }
            };
            self.stack[act_idx].idx += 1;
            let instr = self.stack[act_idx].frame.cfg.instr(slot).clone();
            match instr {
                Instr::Phi { edges } => self.exec_phi(act_idx, pc, &edges)?,
                Instr::Pi { src } => {
                    // Re-materialize the already-computed value as a fresh
                    // constant entry; no operation is re-invoked.
                    let op = self.stack[act_idx].frame.resolve(&src)?;
                    let value = self.concrete(&op)?;
                    let id = self.tape.append(Entry::Const { value });
                    self.stack[act_idx]
                        .frame
                        .bind(Local::Ssa(pc), Operand::Id(id));
                }
                Instr::Call { callee, args } => {
                    if let Some(descend) =
                        self.dispatch_call(registry, act_idx, pc, &callee, &args)?
                    {
                        return Ok(StepEvent::Descend(descend));
                    }
                }
                Instr::New { fields } => {
                    // Normalize object construction to a call of the
                    // allocation primitive so it is interceptable.
                    let callee = Expr::Const(Value::Func(registry.alloc_func()));
                    if let Some(descend) =
                        self.dispatch_call(registry, act_idx, pc, &callee, &fields)?
                    {
                        return Ok(StepEvent::Descend(descend));
                    }
                }
                Instr::Value(src) => {
                    let op = self.stack[act_idx].frame.resolve(&src)?;
                    self.stack[act_idx].frame.bind(Local::Ssa(pc), op);
                }
                Instr::Nop => {}
                Instr::Opaque(repr) => {
                    return Err(TraceError::UnsupportedInstruction {
                        pc,
                        instr: repr,
                        cfg: Arc::clone(&self.stack[act_idx].frame.cfg),
                    });
                }
                Instr::Goto(dest) => return Ok(StepEvent::Exit(BlockExit::Goto(dest))),
                Instr::GotoIfNot { cond, dest } => {
                    return Ok(StepEvent::Exit(BlockExit::Branch { cond, dest }));
                }
                Instr::Return(src) => return Ok(StepEvent::Exit(BlockExit::Return(src))),
            }
        }
    }

    /// Phi merge: copy the binding of the operand matching the previously
    /// executed block into the phi's own slot.
    fn exec_phi(
        &mut self,
        act_idx: usize,
        pc: usize,
        edges: &[(usize, Expr)],
    ) -> TraceResult<()> {
        let prev = self.stack[act_idx].prev.ok_or_else(|| {
            TraceError::MalformedControlFlow {
                pc: Some(pc),
                detail: "phi reached with no predecessor block".to_string(),
            }
        })?;
        let src = edges
            .iter()
            .find(|(edge_pc, _)| self.stack[act_idx].frame.layout.block_of(*edge_pc) == Some(prev))
            .map(|(_, expr)| expr)
            .ok_or_else(|| TraceError::MalformedControlFlow {
                pc: Some(pc),
                detail: format!("previous block {} is not among the phi's edges", prev),
            })?;
        let op = self.stack[act_idx].frame.resolve(src)?;
        self.stack[act_idx].frame.bind(Local::Ssa(pc), op);
        Ok(())
    }
}
