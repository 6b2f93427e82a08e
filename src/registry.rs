//! The callable table and signature resolver.
//!
//! Functions live in a flat table addressed by [`FuncId`]. Each function has
//! a name, a declaring scope (used by the default primitive test), and one
//! or more methods. A method is either a host builtin or a CFG-backed body,
//! with a typed signature: concrete types, `Any`, or type variables that
//! bind the method's static (generic) parameters from the concrete argument
//! types at resolution time.
//!
//! Resolution must produce exactly one matching method for a given argument
//! type list - zero or multiple matches is a fatal dispatch error, never a
//! best-effort pick. Resolution results are memoized in an LRU cache keyed
//! by `(function, argument types)`.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use itertools::Itertools;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::builtins;
use crate::interp::{EvalError, EvalLimits};
use crate::ir::Cfg;
use crate::value::{Value, ValueType};

/// Capacity of the signature-resolution cache
const RESOLUTION_CACHE_CAP: usize = 256;

/// Handle of a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FuncId(usize);

impl FuncId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// A host-native builtin. Receives the registry so higher-order builtins
/// (e.g. the generator wrapper) can apply function arguments.
pub type BuiltinFn = fn(&Registry, &[Value]) -> Result<Value, EvalError>;

/// One formal parameter of a method signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Accepts any runtime type
    Any,
    /// Accepts exactly this runtime type
    Exact(ValueType),
    /// Accepts any runtime type and binds static parameter `i` to it;
    /// repeated occurrences must bind consistently
    Var(usize),
}

impl ParamType {
    fn accepts(&self, ty: ValueType, binds: &mut [Option<ValueType>]) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Exact(t) => *t == ty,
            ParamType::Var(i) => match binds.get_mut(*i) {
                Some(slot) => match slot {
                    Some(prev) => *prev == ty,
                    None => {
                        *slot = Some(ty);
                        true
                    }
                },
                None => false,
            },
        }
    }
}

/// The body of a method.
#[derive(Debug, Clone)]
pub enum MethodBody {
    Builtin(BuiltinFn),
    Cfg(Arc<Cfg>),
}

/// One method of a function.
#[derive(Debug, Clone)]
pub struct Method {
    /// Formal parameter types; when `variadic`, the last entry matches each
    /// trailing argument (zero or more)
    pub params: Vec<ParamType>,
    pub variadic: bool,
    /// Names of the static parameters bound by `ParamType::Var` slots
    pub static_names: Vec<String>,
    pub body: MethodBody,
}

impl Method {
    pub fn builtin(params: Vec<ParamType>, f: BuiltinFn) -> Method {
        Method {
            params,
            variadic: false,
            static_names: Vec::new(),
            body: MethodBody::Builtin(f),
        }
    }

    pub fn builtin_variadic(params: Vec<ParamType>, f: BuiltinFn) -> Method {
        Method {
            params,
            variadic: true,
            static_names: Vec::new(),
            body: MethodBody::Builtin(f),
        }
    }

    pub fn cfg(params: Vec<ParamType>, cfg: Cfg) -> Method {
        Method {
            params,
            variadic: false,
            static_names: Vec::new(),
            body: MethodBody::Cfg(Arc::new(cfg)),
        }
    }

    pub fn cfg_variadic(params: Vec<ParamType>, cfg: Cfg) -> Method {
        Method {
            params,
            variadic: true,
            static_names: Vec::new(),
            body: MethodBody::Cfg(Arc::new(cfg)),
        }
    }

    pub fn cfg_generic(params: Vec<ParamType>, static_names: Vec<String>, cfg: Cfg) -> Method {
        Method {
            params,
            variadic: false,
            static_names,
            body: MethodBody::Cfg(Arc::new(cfg)),
        }
    }

    /// Number of fixed parameters preceding the variadic tail
    pub fn fixed_arity(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }

    /// Match this method against concrete argument types, producing the
    /// static-parameter bindings on success. Every declared static
    /// parameter must be bound by some `Var` slot.
    fn match_types(&self, types: &[ValueType]) -> Option<Vec<Value>> {
        let fixed = self.fixed_arity();
        if self.variadic {
            if types.len() < fixed {
                return None;
            }
        } else if types.len() != fixed {
            return None;
        }

        let mut binds: Vec<Option<ValueType>> = vec![None; self.static_names.len()];
        for (param, ty) in self.params.iter().zip(types.iter()) {
            if !param.accepts(*ty, &mut binds) {
                return None;
            }
        }
        if self.variadic {
            let tail = self.params.last()?;
            for ty in &types[fixed..] {
                if !tail.accepts(*ty, &mut binds) {
                    return None;
                }
            }
        }
        binds
            .into_iter()
            .map(|b| b.map(Value::Type))
            .collect::<Option<Vec<_>>>()
    }
}

/// One registered function.
#[derive(Debug, Clone)]
pub struct Func {
    name: String,
    scope: String,
    methods: Vec<Method>,
}

/// Outcome of signature resolution: the matched method index and the
/// static-parameter bindings (as first-class type values).
#[derive(Debug, Clone)]
pub struct Resolved {
    pub method: usize,
    pub statics: Vec<Value>,
}

/// Zero or multiple methods matched a concrete argument type list.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchError {
    pub func: String,
    pub types: Vec<ValueType>,
    pub candidates: usize,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sig = format!(
            "{}({})",
            self.func,
            self.types.iter().map(|t| t.name()).join(", ")
        );
        if self.candidates == 0 {
            write!(f, "no method matches {}", sig)
        } else {
            write!(
                f,
                "ambiguous dispatch for {}: {} candidate methods",
                sig, self.candidates
            )
        }
    }
}

impl std::error::Error for DispatchError {}

/// Function ids of the always-primitive special forms.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpecialForms {
    pub tuple: FuncId,
    pub alloc: FuncId,
    pub colon: FuncId,
    pub generate: FuncId,
}

/// The callable table.
pub struct Registry {
    funcs: Vec<Func>,
    by_name: HashMap<String, FuncId>,
    resolution: Mutex<LruCache<(FuncId, Vec<ValueType>), Resolved>>,
    special: SpecialForms,
    /// Limits for direct (non-traced) evaluation
    pub limits: EvalLimits,
}

impl Registry {
    /// A registry with the standard builtins installed in the `"core"`
    /// scope.
    pub fn new() -> Registry {
        let cap = NonZeroUsize::new(RESOLUTION_CACHE_CAP).unwrap_or(NonZeroUsize::MIN);
        let mut registry = Registry {
            funcs: Vec::new(),
            by_name: HashMap::new(),
            resolution: Mutex::new(LruCache::new(cap)),
            special: SpecialForms {
                tuple: FuncId(0),
                alloc: FuncId(0),
                colon: FuncId(0),
                generate: FuncId(0),
            },
            limits: EvalLimits::default(),
        };
        registry.special = builtins::install(&mut registry);
        registry
    }

    /// Register a new (empty) function in `scope`, returning its id. A
    /// later registration under the same name shadows the earlier one in
    /// `lookup`.
    pub fn register(&mut self, name: impl Into<String>, scope: impl Into<String>) -> FuncId {
        let id = FuncId(self.funcs.len());
        let name = name.into();
        self.by_name.insert(name.clone(), id);
        self.funcs.push(Func {
            name,
            scope: scope.into(),
            methods: Vec::new(),
        });
        id
    }

    /// Attach a method to a function. Invalidates the resolution cache.
    pub fn add_method(&mut self, func: FuncId, method: Method) {
        if let Some(f) = self.funcs.get_mut(func.0) {
            f.methods.push(method);
        }
        self.resolution.lock().clear();
    }

    /// Convenience: attach a non-variadic CFG-backed method.
    pub fn add_cfg_method(&mut self, func: FuncId, params: Vec<ParamType>, cfg: Cfg) {
        self.add_method(func, Method::cfg(params, cfg));
    }

    pub fn lookup(&self, name: &str) -> Option<FuncId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, func: FuncId) -> &str {
        self.funcs
            .get(func.0)
            .map(|f| f.name.as_str())
            .unwrap_or("<unknown>")
    }

    /// The declaring scope of a function (used by the default primitive
    /// test).
    pub fn scope_of(&self, func: FuncId) -> &str {
        self.funcs
            .get(func.0)
            .map(|f| f.scope.as_str())
            .unwrap_or("")
    }

    /// Check if `func` is one of the always-primitive special forms
    /// (tuple/allocation helpers, the colon range marker, the generator
    /// wrapper).
    pub fn is_special_form(&self, func: FuncId) -> bool {
        func == self.special.tuple
            || func == self.special.alloc
            || func == self.special.colon
            || func == self.special.generate
    }

    /// The tuple-construction helper (used for variadic grouping)
    pub fn tuple_func(&self) -> FuncId {
        self.special.tuple
    }

    /// The allocation helper object construction normalizes to
    pub fn alloc_func(&self) -> FuncId {
        self.special.alloc
    }

    /// Check if any method of `func` is variadic.
    pub fn is_variadic(&self, func: FuncId) -> bool {
        self.funcs
            .get(func.0)
            .map(|f| f.methods.iter().any(|m| m.variadic))
            .unwrap_or(false)
    }

    /// Fixed-parameter count preceding the variadic tail of the first
    /// variadic method, if any.
    pub fn fixed_arity(&self, func: FuncId) -> Option<usize> {
        self.funcs.get(func.0).and_then(|f| {
            f.methods
                .iter()
                .find(|m| m.variadic)
                .map(Method::fixed_arity)
        })
    }

    pub(crate) fn method_of(&self, func: FuncId, index: usize) -> Option<&Method> {
        self.funcs.get(func.0).and_then(|f| f.methods.get(index))
    }

    /// Resolve the unique method of `func` matching the concrete argument
    /// types. Zero or multiple matches is a [`DispatchError`].
    pub fn resolve(&self, func: FuncId, types: &[ValueType]) -> Result<Resolved, DispatchError> {
        let key = (func, types.to_vec());
        if let Some(hit) = self.resolution.lock().get(&key) {
            return Ok(hit.clone());
        }

        let f = self.funcs.get(func.0).ok_or_else(|| DispatchError {
            func: func.to_string(),
            types: types.to_vec(),
            candidates: 0,
        })?;
        let mut hits: Vec<(usize, Vec<Value>)> = Vec::new();
        for (mi, method) in f.methods.iter().enumerate() {
            if let Some(statics) = method.match_types(types) {
                hits.push((mi, statics));
            }
        }
        match hits.as_slice() {
            [(method, statics)] => {
                let resolved = Resolved {
                    method: *method,
                    statics: statics.clone(),
                };
                self.resolution.lock().put(key, resolved.clone());
                Ok(resolved)
            }
            _ => Err(DispatchError {
                func: f.name.clone(),
                types: types.to_vec(),
                candidates: hits.len(),
            }),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("funcs", &self.funcs.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
