//! Error types for the tracer.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::interp::EvalError;
use crate::ir::Cfg;
use crate::registry::DispatchError;
use crate::value::ValueType;

/// Result type for tracing
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors that abort a trace. All are fatal: they propagate unchanged
/// through the driver, and the top-level entry snapshots the live tracer
/// into the process-wide diagnostic slot before re-raising. There is no
/// retry anywhere - tracing is a one-shot deterministic replay of one
/// already-decided execution path.
#[derive(Debug, Clone)]
pub enum TraceError {
    /// Zero or multiple candidate CFGs matched a call's concrete argument
    /// types
    AmbiguousDispatch {
        func: String,
        types: Vec<ValueType>,
        candidates: usize,
    },
    /// The CFG is inconsistent with the interpreter's assumed vocabulary
    /// (missing phi edge, jump to a nonexistent block, unbound local on a
    /// taken path)
    MalformedControlFlow {
        pc: Option<usize>,
        detail: String,
    },
    /// An instruction outside the closed vocabulary was reached; carries
    /// the offending instruction and the full CFG for diagnosis
    UnsupportedInstruction {
        pc: usize,
        instr: String,
        cfg: Arc<Cfg>,
    },
    /// A callee value that is neither recordable as primitive nor backed
    /// by a CFG
    NotCallable(String),
    /// Concrete evaluation of a primitive failed
    Eval(EvalError),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::AmbiguousDispatch {
                func,
                types,
                candidates,
            } => {
                let sig = format!("{}({})", func, types.iter().map(|t| t.name()).join(", "));
                if *candidates == 0 {
                    write!(f, "no candidate body for {}", sig)
                } else {
                    write!(
                        f,
                        "ambiguous dispatch for {}: {} candidate methods",
                        sig, candidates
                    )
                }
            }
            TraceError::MalformedControlFlow { pc, detail } => match pc {
                Some(pc) => write!(f, "malformed control flow at %{}: {}", pc, detail),
                None => write!(f, "malformed control flow: {}", detail),
            },
            TraceError::UnsupportedInstruction { pc, instr, cfg } => write!(
                f,
                "unsupported instruction at %{}: {} (cfg: {} blocks, {} instructions)",
                pc,
                instr,
                cfg.blocks.len(),
                cfg.code.len() + cfg.inserted.len()
            ),
            TraceError::NotCallable(v) => write!(f, "value {} is not traceable as a call", v),
            TraceError::Eval(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Eval(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EvalError> for TraceError {
    fn from(err: EvalError) -> TraceError {
        TraceError::Eval(err)
    }
}

impl From<DispatchError> for TraceError {
    fn from(err: DispatchError) -> TraceError {
        TraceError::AmbiguousDispatch {
            func: err.func,
            types: err.types,
            candidates: err.candidates,
        }
    }
}
