//! Runtime values and runtime types.
//!
//! `Value` is the dynamic vocabulary traced programs compute over. Every
//! value is concrete: the tracer executes one actual run of a program, so
//! there are no symbolic or deferred values here. `ValueType` is the
//! corresponding runtime-type enum used for signature resolution and
//! static-parameter binding.

use std::fmt;

use itertools::Itertools;
use serde::Serialize;

use crate::registry::FuncId;

/// A concrete runtime value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// The unit value (no information)
    Unit,
    /// A boolean
    Bool(bool),
    /// A 64-bit signed integer
    Int(i64),
    /// A 64-bit float
    Float(f64),
    /// A string
    Str(String),
    /// An ordered tuple of values
    Tuple(Vec<Value>),
    /// A named tuple: ordered fields with string keys
    NamedTuple(Vec<(String, Value)>),
    /// An integer range with explicit step (`start`, `start + step`, ...,
    /// up to and including `stop` when reachable)
    Range { start: i64, step: i64, stop: i64 },
    /// A reference to a registered function
    Func(FuncId),
    /// A first-class runtime type tag
    Type(ValueType),
}

/// The runtime type of a [`Value`], used for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueType {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    NamedTuple,
    Range,
    Func,
    Type,
}

impl Value {
    /// The runtime type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Unit => ValueType::Unit,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Tuple(_) => ValueType::Tuple,
            Value::NamedTuple(_) => ValueType::NamedTuple,
            Value::Range { .. } => ValueType::Range,
            Value::Func(_) => ValueType::Func,
            Value::Type(_) => ValueType::Type,
        }
    }

    /// Check if this value is a named tuple (relevant for the default
    /// primitive test, which records named-tuple-shaped callees verbatim)
    pub fn is_named_tuple(&self) -> bool {
        matches!(self, Value::NamedTuple(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<FuncId> {
        match self {
            Value::Func(f) => Some(*f),
            _ => None,
        }
    }

    /// Friendly type name for error messages
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }
}

impl ValueType {
    /// Friendly name for error messages and dumps
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Unit => "Unit",
            ValueType::Bool => "Bool",
            ValueType::Int => "Int",
            ValueType::Float => "Float",
            ValueType::Str => "Str",
            ValueType::Tuple => "Tuple",
            ValueType::NamedTuple => "NamedTuple",
            ValueType::Range => "Range",
            ValueType::Func => "Func",
            ValueType::Type => "Type",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                // Keep floats visually distinct from ints in dumps
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Tuple(items) => {
                write!(f, "({})", items.iter().map(|v| v.to_string()).join(", "))
            }
            Value::NamedTuple(fields) => {
                let inner = fields
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .join(", ");
                write!(f, "({})", inner)
            }
            Value::Range { start, step, stop } => {
                if *step == 1 {
                    write!(f, "{}:{}", start, stop)
                } else {
                    write!(f, "{}:{}:{}", start, step, stop)
                }
            }
            Value::Func(id) => write!(f, "{}", id),
            Value::Type(t) => write!(f, "{}", t),
        }
    }
}
