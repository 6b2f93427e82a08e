//! Per-activation frames.
//!
//! A frame binds every CFG-local value of one call activation - formal
//! parameters and SSA definition sites - to a tape operand (handle or
//! literal). Construction flattens the CFG into per-block instruction
//! lists with pass insertions merged (see [`Layout`]), which also yields
//! the pc-to-block map phi resolution needs. One frame exists per active
//! call; frames are never shared between sibling calls.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ir::{Cfg, Expr, Layout, Local};
use crate::tape::Operand;
use crate::value::Value;

use super::types::{TraceError, TraceResult};

#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) cfg: Arc<Cfg>,
    pub(crate) layout: Layout,
    bindings: HashMap<Local, Operand>,
    /// The original call operands, kept for diagnostics
    args: Vec<Operand>,
    /// Static-parameter bindings resolved for this activation
    statics: Vec<Value>,
}

impl Frame {
    /// Build a frame for one activation, binding the formal parameters to
    /// the call operands.
    pub(crate) fn new(
        cfg: Arc<Cfg>,
        args: Vec<Operand>,
        statics: Vec<Value>,
    ) -> TraceResult<Frame> {
        if args.len() != cfg.arity {
            return Err(TraceError::MalformedControlFlow {
                pc: None,
                detail: format!(
                    "call binds {} operand(s) to a body of arity {}",
                    args.len(),
                    cfg.arity
                ),
            });
        }
        let layout = Layout::new(&cfg);
        let mut bindings = HashMap::new();
        for (i, op) in args.iter().enumerate() {
            bindings.insert(Local::Arg(i), op.clone());
        }
        Ok(Frame {
            cfg,
            layout,
            bindings,
            args,
            statics,
        })
    }

    pub(crate) fn bind(&mut self, local: Local, op: Operand) {
        self.bindings.insert(local, op);
    }

    /// Resolve an operand expression against this frame: local references
    /// go through the binding map, static-parameter references substitute
    /// the active binding, and literals pass through.
    pub(crate) fn resolve(&self, expr: &Expr) -> TraceResult<Operand> {
        match expr {
            Expr::Arg(i) => self.bindings.get(&Local::Arg(*i)).cloned().ok_or_else(|| {
                TraceError::MalformedControlFlow {
                    pc: None,
                    detail: format!("use of unbound argument @{}", i),
                }
            }),
            Expr::Ssa(pc) => self.bindings.get(&Local::Ssa(*pc)).cloned().ok_or_else(|| {
                TraceError::MalformedControlFlow {
                    pc: Some(*pc),
                    detail: format!("use of %{} before its definition was executed", pc),
                }
            }),
            Expr::Static(i) => self.statics.get(*i).cloned().map(Operand::Lit).ok_or_else(
                || TraceError::MalformedControlFlow {
                    pc: None,
                    detail: format!("reference to unbound static parameter ${}", i),
                },
            ),
            Expr::Const(v) => Ok(Operand::Lit(v.clone())),
        }
    }

    /// The operands this activation was entered with
    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    /// The static-parameter bindings of this activation
    pub fn statics(&self) -> &[Value] {
        &self.statics
    }

    /// The CFG being interpreted by this activation
    pub fn cfg(&self) -> &Arc<Cfg> {
        &self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CfgBuilder;
    use crate::tape::ValueId;

    #[test]
    fn test_frame_binds_parameters() {
        let mut b = CfgBuilder::new(2);
        b.ret(Expr::arg(0));
        let cfg = Arc::new(b.finish());
        let frame = Frame::new(
            cfg,
            vec![
                Operand::Id(ValueId(0)),
                Operand::Lit(Value::Int(7)),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(
            frame.resolve(&Expr::arg(0)).unwrap(),
            Operand::Id(ValueId(0))
        );
        assert_eq!(
            frame.resolve(&Expr::arg(1)).unwrap(),
            Operand::Lit(Value::Int(7))
        );
    }

    #[test]
    fn test_frame_rejects_arity_mismatch() {
        let mut b = CfgBuilder::new(2);
        b.ret(Expr::arg(0));
        let cfg = Arc::new(b.finish());
        assert!(Frame::new(cfg, vec![Operand::Lit(Value::Int(1))], vec![]).is_err());
    }

    #[test]
    fn test_unbound_ssa_read_is_malformed() {
        let mut b = CfgBuilder::new(0);
        b.ret(Expr::int(0));
        let cfg = Arc::new(b.finish());
        let frame = Frame::new(cfg, vec![], vec![]).unwrap();
        assert!(matches!(
            frame.resolve(&Expr::ssa(5)),
            Err(TraceError::MalformedControlFlow { .. })
        ));
    }

    #[test]
    fn test_static_resolution() {
        let mut b = CfgBuilder::with_statics(0, 1);
        b.ret(Expr::Static(0));
        let cfg = Arc::new(b.finish());
        let frame = Frame::new(
            cfg,
            vec![],
            vec![Value::Type(crate::value::ValueType::Float)],
        )
        .unwrap();
        assert_eq!(
            frame.resolve(&Expr::Static(0)).unwrap(),
            Operand::Lit(Value::Type(crate::value::ValueType::Float))
        );
        assert!(frame.resolve(&Expr::Static(1)).is_err());
    }
}
