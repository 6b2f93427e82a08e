//! Lowered control-flow-graph IR.
//!
//! This module defines the CFG artifact the tracer consumes: an ordered
//! primary instruction list partitioned into basic blocks, plus a side list
//! of instructions inserted by transformation passes. Program counters are
//! stable: primary instructions occupy `0..code.len()` and inserted
//! instructions receive synthetic pcs past that range, so SSA references
//! stay valid as passes add instrumentation.
//!
//! The instruction vocabulary is closed. Control transfers are
//! `Goto`/`GotoIfNot`/`Return`; block-entry merges are `Phi`; `Pi` marks a
//! type refinement of an already-computed value; everything else computes or
//! renames a value. `Opaque` stands for lowered constructs outside this
//! vocabulary (exception regions and the like) - reaching one during a walk
//! is a fatal error, never silently skipped.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use serde::Serialize;

use crate::value::Value;

/// An operand expression inside an instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Reference to a formal parameter slot (0-based)
    Arg(usize),
    /// Reference to the value defined at a program counter
    Ssa(usize),
    /// Reference to a static (generic) parameter of the enclosing method
    Static(usize),
    /// An embedded literal
    Const(Value),
}

impl Expr {
    pub fn arg(i: usize) -> Expr {
        Expr::Arg(i)
    }

    pub fn ssa(pc: usize) -> Expr {
        Expr::Ssa(pc)
    }

    pub fn int(n: i64) -> Expr {
        Expr::Const(Value::Int(n))
    }

    pub fn float(x: f64) -> Expr {
        Expr::Const(Value::Float(x))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Const(Value::Bool(b))
    }

    pub fn str(s: impl Into<String>) -> Expr {
        Expr::Const(Value::Str(s.into()))
    }

    pub fn func(id: crate::registry::FuncId) -> Expr {
        Expr::Const(Value::Func(id))
    }

    /// The pc this expression was defined at, if it is an SSA reference
    pub fn as_ssa(&self) -> Option<usize> {
        match self {
            Expr::Ssa(pc) => Some(*pc),
            _ => None,
        }
    }
}

/// A CFG-local binding site: a formal parameter or an SSA definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Local {
    Arg(usize),
    Ssa(usize),
}

/// One instruction of the lowered IR.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Instr {
    /// Block-entry merge: selects the operand whose predecessor edge the
    /// walk actually arrived from. Each edge names any pc inside the
    /// predecessor block.
    Phi { edges: Vec<(usize, Expr)> },
    /// Type-refinement marker over an already-computed operand
    Pi { src: Expr },
    /// A call: callee operand plus argument operands
    Call { callee: Expr, args: Vec<Expr> },
    /// Object construction; normalized to a call of the allocation
    /// primitive before interpretation so it can be intercepted like any
    /// other call
    New { fields: Vec<Expr> },
    /// Plain alias/renaming of another operand
    Value(Expr),
    /// No-op diagnostic instruction (line markers etc.); skipped
    Nop,
    /// A lowered construct outside the tracer's vocabulary; fatal to reach
    Opaque(String),
    /// Unconditional jump to a block index
    Goto(usize),
    /// Conditional jump: taken (to `dest`) when the condition is false,
    /// falls through to the next block otherwise
    GotoIfNot { cond: Expr, dest: usize },
    /// Return the operand to the caller
    Return(Expr),
}

impl Instr {
    /// Check if this instruction transfers control
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Instr::Goto(_) | Instr::GotoIfNot { .. } | Instr::Return(_)
        )
    }
}

/// Placement of a pass-inserted instruction relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Placement {
    Before,
    After,
}

/// An instruction inserted by a transformation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insertion {
    /// Primary pc the instruction anchors to
    pub anchor: usize,
    pub placement: Placement,
    /// Synthetic pc assigned to the inserted instruction
    pub pc: usize,
    pub instr: Instr,
}

/// A contiguous span of primary pcs forming one basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSpan {
    pub start: usize,
    /// Exclusive end
    pub end: usize,
}

/// A lowered control-flow graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cfg {
    /// Number of formal parameters
    pub arity: usize,
    /// Number of static (generic) parameters the body may reference
    pub statics: usize,
    /// Primary instruction list; pc = index
    pub code: Vec<Instr>,
    /// Basic-block partition of `code`
    pub blocks: Vec<BlockSpan>,
    /// Pass-inserted instructions, in insertion order
    pub inserted: Vec<Insertion>,
}

/// Index of an instruction within a [`Cfg`], covering both the primary list
/// and the inserted side list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slot {
    Code(usize),
    Inserted(usize),
}

impl Cfg {
    /// Look up an instruction by slot.
    pub fn instr(&self, slot: Slot) -> &Instr {
        match slot {
            Slot::Code(i) => &self.code[i],
            Slot::Inserted(i) => &self.inserted[i].instr,
        }
    }

    /// Insert an instruction immediately before the primary instruction at
    /// `anchor`. Returns the inserted instruction's synthetic pc, or `None`
    /// if `anchor` is not a primary pc.
    pub fn insert_before(&mut self, anchor: usize, instr: Instr) -> Option<usize> {
        self.insert_at(anchor, Placement::Before, instr)
    }

    /// Insert an instruction immediately after the primary instruction at
    /// `anchor`. If the anchor is its block's final instruction, the
    /// inserted instruction lands at the front of the next block,
    /// consistent with final execution order.
    pub fn insert_after(&mut self, anchor: usize, instr: Instr) -> Option<usize> {
        self.insert_at(anchor, Placement::After, instr)
    }

    fn insert_at(&mut self, anchor: usize, placement: Placement, instr: Instr) -> Option<usize> {
        if anchor >= self.code.len() {
            return None;
        }
        let pc = self.code.len() + self.inserted.len();
        self.inserted.push(Insertion {
            anchor,
            placement,
            pc,
            instr,
        });
        Some(pc)
    }
}

/// The flattened per-block layout of a [`Cfg`]: every block's ordered
/// `(pc, slot)` list with pass insertions merged at their anchors, plus the
/// reverse pc-to-block map used to resolve phi predecessor edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// One ordered `(pc, slot)` list per basic block
    pub blocks: Vec<Vec<(usize, Slot)>>,
    block_of: HashMap<usize, usize>,
}

impl Layout {
    /// Flatten a CFG. Multiple insertions at one anchor keep their relative
    /// insertion order; an After-insertion anchored at a block's final
    /// instruction flows to the front of the next block (or stays at the
    /// tail of the last block, unreachable past its transfer).
    pub fn new(cfg: &Cfg) -> Layout {
        let mut before: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut after: HashMap<usize, Vec<usize>> = HashMap::new();
        for (idx, ins) in cfg.inserted.iter().enumerate() {
            match ins.placement {
                Placement::Before => before.entry(ins.anchor).or_default().push(idx),
                Placement::After => after.entry(ins.anchor).or_default().push(idx),
            }
        }

        let mut blocks: Vec<Vec<(usize, Slot)>> = Vec::with_capacity(cfg.blocks.len());
        let mut carried: Vec<usize> = Vec::new();
        for span in &cfg.blocks {
            let mut list: Vec<(usize, Slot)> = Vec::with_capacity(span.end - span.start);
            for idx in carried.drain(..) {
                list.push((cfg.inserted[idx].pc, Slot::Inserted(idx)));
            }
            for pc in span.start..span.end {
                if let Some(idxs) = before.get(&pc) {
                    for &idx in idxs {
                        list.push((cfg.inserted[idx].pc, Slot::Inserted(idx)));
                    }
                }
                list.push((pc, Slot::Code(pc)));
                if let Some(idxs) = after.get(&pc) {
                    if pc + 1 == span.end {
                        carried.extend(idxs.iter().copied());
                    } else {
                        for &idx in idxs {
                            list.push((cfg.inserted[idx].pc, Slot::Inserted(idx)));
                        }
                    }
                }
            }
            blocks.push(list);
        }
        if !carried.is_empty() {
            if let Some(last) = blocks.last_mut() {
                for idx in carried.drain(..) {
                    last.push((cfg.inserted[idx].pc, Slot::Inserted(idx)));
                }
            }
        }

        let mut block_of = HashMap::new();
        for (bi, list) in blocks.iter().enumerate() {
            for (pc, _) in list {
                block_of.insert(*pc, bi);
            }
        }
        Layout { blocks, block_of }
    }

    /// Which block owns the instruction at `pc` (primary or inserted)?
    pub fn block_of(&self, pc: usize) -> Option<usize> {
        self.block_of.get(&pc).copied()
    }
}

/// Incremental builder for well-formed CFGs.
///
/// Instructions append to the current block and return their `Expr::Ssa`
/// handle; `start_block` opens the next block. Jump destinations are block
/// indices, which are sequential in creation order, so forward targets can
/// be named before the block exists. Loop phis whose back edges are not yet
/// known are created with [`CfgBuilder::phi_placeholder`] and patched with
/// [`CfgBuilder::set_phi_edges`].
#[derive(Debug, Clone)]
pub struct CfgBuilder {
    arity: usize,
    statics: usize,
    code: Vec<Instr>,
    block_starts: Vec<usize>,
}

impl CfgBuilder {
    pub fn new(arity: usize) -> CfgBuilder {
        CfgBuilder {
            arity,
            statics: 0,
            code: Vec::new(),
            block_starts: vec![0],
        }
    }

    /// A builder for a method body referencing `statics` static parameters
    pub fn with_statics(arity: usize, statics: usize) -> CfgBuilder {
        CfgBuilder {
            arity,
            statics,
            code: Vec::new(),
            block_starts: vec![0],
        }
    }

    /// The pc the next pushed instruction will receive
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Append an instruction to the current block, returning its SSA handle
    pub fn push(&mut self, instr: Instr) -> Expr {
        let pc = self.code.len();
        self.code.push(instr);
        Expr::Ssa(pc)
    }

    pub fn call(&mut self, callee: Expr, args: Vec<Expr>) -> Expr {
        self.push(Instr::Call { callee, args })
    }

    pub fn phi(&mut self, edges: Vec<(usize, Expr)>) -> Expr {
        self.push(Instr::Phi { edges })
    }

    /// An empty phi to be patched once its back edges are known
    pub fn phi_placeholder(&mut self) -> Expr {
        self.push(Instr::Phi { edges: Vec::new() })
    }

    /// Patch the edges of a phi created with `phi_placeholder`. No-op if
    /// `phi` is not an SSA handle of a phi instruction.
    pub fn set_phi_edges(&mut self, phi: &Expr, edges: Vec<(usize, Expr)>) {
        if let Some(pc) = phi.as_ssa() {
            if let Some(Instr::Phi { edges: slot }) = self.code.get_mut(pc) {
                *slot = edges;
            }
        }
    }

    pub fn pi(&mut self, src: Expr) -> Expr {
        self.push(Instr::Pi { src })
    }

    pub fn new_object(&mut self, fields: Vec<Expr>) -> Expr {
        self.push(Instr::New { fields })
    }

    pub fn value(&mut self, src: Expr) -> Expr {
        self.push(Instr::Value(src))
    }

    pub fn nop(&mut self) {
        self.push(Instr::Nop);
    }

    pub fn opaque(&mut self, repr: impl Into<String>) {
        self.push(Instr::Opaque(repr.into()));
    }

    pub fn goto(&mut self, dest: usize) {
        self.push(Instr::Goto(dest));
    }

    pub fn goto_if_not(&mut self, cond: Expr, dest: usize) {
        self.push(Instr::GotoIfNot { cond, dest });
    }

    pub fn ret(&mut self, value: Expr) {
        self.push(Instr::Return(value));
    }

    /// Close the current block and open the next one, returning its index
    pub fn start_block(&mut self) -> usize {
        self.block_starts.push(self.code.len());
        self.block_starts.len() - 1
    }

    pub fn finish(self) -> Cfg {
        let mut blocks = Vec::with_capacity(self.block_starts.len());
        for (i, &start) in self.block_starts.iter().enumerate() {
            let end = self
                .block_starts
                .get(i + 1)
                .copied()
                .unwrap_or(self.code.len());
            blocks.push(BlockSpan { start, end });
        }
        Cfg {
            arity: self.arity,
            statics: self.statics,
            code: self.code,
            blocks,
            inserted: Vec::new(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Arg(i) => write!(f, "@{}", i),
            Expr::Ssa(pc) => write!(f, "%{}", pc),
            Expr::Static(i) => write!(f, "${}", i),
            Expr::Const(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Phi { edges } => {
                let inner = edges
                    .iter()
                    .map(|(pc, e)| format!("%{} => {}", pc, e))
                    .join(", ");
                write!(f, "phi [{}]", inner)
            }
            Instr::Pi { src } => write!(f, "pi {}", src),
            Instr::Call { callee, args } => {
                write!(
                    f,
                    "call {}({})",
                    callee,
                    args.iter().map(|a| a.to_string()).join(", ")
                )
            }
            Instr::New { fields } => {
                write!(
                    f,
                    "new({})",
                    fields.iter().map(|a| a.to_string()).join(", ")
                )
            }
            Instr::Value(e) => write!(f, "value {}", e),
            Instr::Nop => write!(f, "nop"),
            Instr::Opaque(repr) => write!(f, "opaque {}", repr),
            Instr::Goto(dest) => write!(f, "goto b{}", dest),
            Instr::GotoIfNot { cond, dest } => write!(f, "gotoifnot {} b{}", cond, dest),
            Instr::Return(e) => write!(f, "return {}", e),
        }
    }
}
