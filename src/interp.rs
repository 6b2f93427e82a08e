//! Direct (non-traced) evaluation of callables.
//!
//! The tracer caches a concrete value on every recorded entry, so primitive
//! calls have to actually execute. Builtins run as host functions; a
//! CFG-backed callable that is treated as primitive (or replayed from a
//! tape) runs through the concrete block walk here - the same transition
//! rules as the trace driver, with values in place of tape handles and no
//! recording. Recursion depth is bounded by [`EvalLimits`] to protect the
//! host stack; this limit applies only to direct evaluation, never to
//! tracing itself.

use std::collections::HashMap;
use std::fmt;

use crate::ir::{Cfg, Expr, Instr, Layout, Local};
use crate::registry::{DispatchError, MethodBody, Registry};
use crate::value::Value;

/// Result type for direct evaluation
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised by direct evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Signature resolution failed (zero or multiple matches)
    NoMethod(String),
    /// Incorrect argument arity or shape
    IncorrectArgument(String),
    /// Type error in an operation
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
    /// Integer modulo by zero
    DivisionByZero,
    /// Direct-evaluation recursion exceeded the configured limit
    DepthExceeded(usize),
    /// The callee value cannot be applied
    NotCallable(String),
    /// A local was read before being defined
    Unbound(String),
    /// An instruction outside the interpreter's vocabulary was reached
    Unsupported(String),
    /// The CFG is inconsistent with the interpreter's assumptions
    Malformed(String),
    /// Other runtime error
    Runtime(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::NoMethod(msg) => write!(f, "{}", msg),
            EvalError::IncorrectArgument(msg) => write!(f, "incorrect argument: {}", msg),
            EvalError::TypeMismatch { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::DepthExceeded(depth) => {
                write!(f, "evaluation depth limit exceeded at depth {}", depth)
            }
            EvalError::NotCallable(v) => write!(f, "value {} is not callable", v),
            EvalError::Unbound(what) => write!(f, "use of unbound local {}", what),
            EvalError::Unsupported(repr) => {
                write!(f, "unsupported instruction: {}", repr)
            }
            EvalError::Malformed(msg) => write!(f, "malformed control flow: {}", msg),
            EvalError::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<DispatchError> for EvalError {
    fn from(err: DispatchError) -> EvalError {
        EvalError::NoMethod(err.to_string())
    }
}

/// Limits for direct evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Maximum nesting of direct calls
    pub max_call_depth: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        EvalLimits {
            max_call_depth: 256,
        }
    }
}

impl Registry {
    /// Directly invoke a registered function on concrete arguments.
    pub fn call(&self, func: crate::registry::FuncId, args: &[Value]) -> EvalResult<Value> {
        self.call_at_depth(func, args, 0)
    }

    pub(crate) fn call_at_depth(
        &self,
        func: crate::registry::FuncId,
        args: &[Value],
        depth: usize,
    ) -> EvalResult<Value> {
        if depth >= self.limits.max_call_depth {
            return Err(EvalError::DepthExceeded(depth));
        }
        let types: Vec<_> = args.iter().map(Value::value_type).collect();
        let resolved = self.resolve(func, &types)?;
        let method = self
            .method_of(func, resolved.method)
            .ok_or_else(|| EvalError::Runtime("resolved method index out of range".to_string()))?;
        match &method.body {
            MethodBody::Builtin(f) => f(self, args),
            MethodBody::Cfg(cfg) => {
                let grouped;
                let args = if method.variadic {
                    let fixed = method.fixed_arity();
                    let mut v = args[..fixed].to_vec();
                    v.push(Value::Tuple(args[fixed..].to_vec()));
                    grouped = v;
                    &grouped[..]
                } else {
                    args
                };
                eval_cfg(self, cfg, args, &resolved.statics, depth)
            }
        }
    }

    /// Apply a callee value to concrete arguments: function references
    /// dispatch through the registry; a named tuple applied to a single
    /// string key yields that field.
    pub fn apply(&self, callee: &Value, args: &[Value]) -> EvalResult<Value> {
        self.apply_at_depth(callee, args, 0)
    }

    pub(crate) fn apply_at_depth(
        &self,
        callee: &Value,
        args: &[Value],
        depth: usize,
    ) -> EvalResult<Value> {
        match callee {
            Value::Func(func) => self.call_at_depth(*func, args, depth),
            Value::NamedTuple(fields) => match args {
                [Value::Str(key)] => fields
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        EvalError::IncorrectArgument(format!("no field named {}", key))
                    }),
                _ => Err(EvalError::IncorrectArgument(
                    "a named tuple applies to a single string key".to_string(),
                )),
            },
            other => Err(EvalError::NotCallable(other.to_string())),
        }
    }
}

enum Exit {
    Goto(usize),
    Branch(bool, usize),
}

/// Concrete block walk over a CFG body.
fn eval_cfg(
    reg: &Registry,
    cfg: &Cfg,
    args: &[Value],
    statics: &[Value],
    depth: usize,
) -> EvalResult<Value> {
    if args.len() != cfg.arity {
        return Err(EvalError::IncorrectArgument(format!(
            "body takes {} argument(s), got {}",
            cfg.arity,
            args.len()
        )));
    }
    let layout = Layout::new(cfg);
    let mut bind: HashMap<Local, Value> = HashMap::new();
    for (i, v) in args.iter().enumerate() {
        bind.insert(Local::Arg(i), v.clone());
    }

    fn resolve(
        bind: &HashMap<Local, Value>,
        statics: &[Value],
        expr: &Expr,
    ) -> EvalResult<Value> {
        match expr {
            Expr::Arg(i) => bind
                .get(&Local::Arg(*i))
                .cloned()
                .ok_or_else(|| EvalError::Unbound(format!("@{}", i))),
            Expr::Ssa(pc) => bind
                .get(&Local::Ssa(*pc))
                .cloned()
                .ok_or_else(|| EvalError::Unbound(format!("%{}", pc))),
            Expr::Static(i) => statics
                .get(*i)
                .cloned()
                .ok_or_else(|| EvalError::Unbound(format!("static ${}", i))),
            Expr::Const(v) => Ok(v.clone()),
        }
    }

    let mut bi = 0usize;
    let mut prev: Option<usize> = None;
    let mut last: Option<Value> = None;
    loop {
        if bi >= layout.blocks.len() {
            // Fell off the end without an explicit return: the most
            // recently computed value stands in as the result.
            return Ok(last.unwrap_or(Value::Unit));
        }
        let mut exit: Option<Exit> = None;
        for &(pc, slot) in &layout.blocks[bi] {
            match cfg.instr(slot) {
                Instr::Phi { edges } => {
                    let p = prev.ok_or_else(|| {
                        EvalError::Malformed(format!("phi at %{} reached with no predecessor", pc))
                    })?;
                    let (_, src) = edges
                        .iter()
                        .find(|(epc, _)| layout.block_of(*epc) == Some(p))
                        .ok_or_else(|| {
                            EvalError::Malformed(format!(
                                "phi at %{} has no edge from block {}",
                                pc, p
                            ))
                        })?;
                    let v = resolve(&bind, statics, src)?;
                    bind.insert(Local::Ssa(pc), v.clone());
                    last = Some(v);
                }
                Instr::Pi { src } => {
                    let v = resolve(&bind, statics, src)?;
                    bind.insert(Local::Ssa(pc), v.clone());
                    last = Some(v);
                }
                Instr::Call { callee, args: cargs } => {
                    let callee = resolve(&bind, statics, callee)?;
                    let vals = cargs
                        .iter()
                        .map(|a| resolve(&bind, statics, a))
                        .collect::<EvalResult<Vec<_>>>()?;
                    let v = reg.apply_at_depth(&callee, &vals, depth + 1)?;
                    bind.insert(Local::Ssa(pc), v.clone());
                    last = Some(v);
                }
                Instr::New { fields } => {
                    let vals = fields
                        .iter()
                        .map(|a| resolve(&bind, statics, a))
                        .collect::<EvalResult<Vec<_>>>()?;
                    let v = Value::Tuple(vals);
                    bind.insert(Local::Ssa(pc), v.clone());
                    last = Some(v);
                }
                Instr::Value(src) => {
                    let v = resolve(&bind, statics, src)?;
                    bind.insert(Local::Ssa(pc), v.clone());
                    last = Some(v);
                }
                Instr::Nop => {}
                Instr::Opaque(repr) => {
                    return Err(EvalError::Unsupported(repr.clone()));
                }
                Instr::Goto(dest) => {
                    exit = Some(Exit::Goto(*dest));
                    break;
                }
                Instr::GotoIfNot { cond, dest } => {
                    let c = resolve(&bind, statics, cond)?;
                    let taken = c.as_bool().ok_or(EvalError::TypeMismatch {
                        expected: "Bool",
                        got: c.type_name(),
                    })?;
                    exit = Some(Exit::Branch(taken, *dest));
                    break;
                }
                Instr::Return(src) => {
                    return resolve(&bind, statics, src);
                }
            }
        }
        let next = match exit {
            None | Some(Exit::Branch(true, _)) => bi + 1,
            Some(Exit::Goto(dest)) | Some(Exit::Branch(false, dest)) => {
                if dest >= layout.blocks.len() {
                    return Err(EvalError::Malformed(format!(
                        "jump to nonexistent block {}",
                        dest
                    )));
                }
                dest
            }
        };
        prev = Some(bi);
        bi = next;
    }
}
