//! Standard builtins installed in the `"core"` scope.
//!
//! Builtins are host-native functions: the primitive vocabulary the default
//! interception policy records verbatim. Numeric operations promote to
//! float on mixed int/float operands. The special forms (`tuple`, `alloc`,
//! `colon`, `generate`) are always-primitive regardless of scope
//! configuration; `alloc` is the designated target object construction
//! normalizes to.

use crate::interp::EvalError;
use crate::registry::{Method, ParamType, Registry, SpecialForms};
use crate::value::{Value, ValueType};

/// Register the standard builtins, returning the special-form ids.
pub(crate) fn install(reg: &mut Registry) -> SpecialForms {
    fn add(reg: &mut Registry, name: &str, method: Method) -> crate::registry::FuncId {
        let id = reg.register(name, "core");
        reg.add_method(id, method);
        id
    }

    let any2 = || vec![ParamType::Any, ParamType::Any];

    add(reg, "+", Method::builtin(any2(), bi_add));
    add(reg, "-", Method::builtin(any2(), bi_sub));
    add(reg, "*", Method::builtin(any2(), bi_mul));
    add(reg, "/", Method::builtin(any2(), bi_div));
    add(reg, "mod", Method::builtin(any2(), bi_mod));
    add(reg, "neg", Method::builtin(vec![ParamType::Any], bi_neg));
    add(reg, "<", Method::builtin(any2(), bi_lt));
    add(reg, "<=", Method::builtin(any2(), bi_le));
    add(reg, ">", Method::builtin(any2(), bi_gt));
    add(reg, ">=", Method::builtin(any2(), bi_ge));
    add(reg, "==", Method::builtin(any2(), bi_eq));
    add(reg, "!=", Method::builtin(any2(), bi_ne));
    add(reg, "!", Method::builtin(vec![ParamType::Any], bi_not));
    add(
        reg,
        "zero",
        Method::builtin(vec![ParamType::Exact(ValueType::Type)], bi_zero),
    );
    add(reg, "typeof", Method::builtin(vec![ParamType::Any], bi_typeof));
    add(reg, "length", Method::builtin(vec![ParamType::Any], bi_length));
    add(reg, "get", Method::builtin(any2(), bi_get));

    let tuple = add(
        reg,
        "tuple",
        Method::builtin_variadic(vec![ParamType::Any], bi_tuple),
    );
    let alloc = add(
        reg,
        "alloc",
        Method::builtin_variadic(vec![ParamType::Any], bi_tuple),
    );
    let colon = add(
        reg,
        "colon",
        Method::builtin(
            vec![
                ParamType::Exact(ValueType::Int),
                ParamType::Exact(ValueType::Int),
            ],
            bi_colon2,
        ),
    );
    reg.add_method(
        colon,
        Method::builtin(
            vec![
                ParamType::Exact(ValueType::Int),
                ParamType::Exact(ValueType::Int),
                ParamType::Exact(ValueType::Int),
            ],
            bi_colon3,
        ),
    );
    let generate = add(reg, "generate", Method::builtin(any2(), bi_generate));

    SpecialForms {
        tuple,
        alloc,
        colon,
        generate,
    }
}

// === Numeric helpers ===

enum Num {
    I(i64),
    F(f64),
}

fn num(v: &Value) -> Result<Num, EvalError> {
    match v {
        Value::Int(n) => Ok(Num::I(*n)),
        Value::Float(x) => Ok(Num::F(*x)),
        other => Err(EvalError::TypeMismatch {
            expected: "Int or Float",
            got: other.type_name(),
        }),
    }
}

fn num_pair(a: &Value, b: &Value) -> Result<(Num, Num), EvalError> {
    Ok((num(a)?, num(b)?))
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::I(i) => *i as f64,
        Num::F(f) => *f,
    }
}

fn two<'a>(args: &'a [Value], name: &str) -> Result<(&'a Value, &'a Value), EvalError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(EvalError::IncorrectArgument(format!(
            "{} takes 2 arguments, got {}",
            name,
            args.len()
        ))),
    }
}

fn one<'a>(args: &'a [Value], name: &str) -> Result<&'a Value, EvalError> {
    match args {
        [a] => Ok(a),
        _ => Err(EvalError::IncorrectArgument(format!(
            "{} takes 1 argument, got {}",
            name,
            args.len()
        ))),
    }
}

// === Arithmetic ===

fn bi_add(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "+")?;
    Ok(match num_pair(a, b)? {
        (Num::I(x), Num::I(y)) => Value::Int(x + y),
        (x, y) => Value::Float(as_f64(&x) + as_f64(&y)),
    })
}

fn bi_sub(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "-")?;
    Ok(match num_pair(a, b)? {
        (Num::I(x), Num::I(y)) => Value::Int(x - y),
        (x, y) => Value::Float(as_f64(&x) - as_f64(&y)),
    })
}

fn bi_mul(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "*")?;
    Ok(match num_pair(a, b)? {
        (Num::I(x), Num::I(y)) => Value::Int(x * y),
        (x, y) => Value::Float(as_f64(&x) * as_f64(&y)),
    })
}

/// Division always produces a float, including on two ints
fn bi_div(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "/")?;
    let (x, y) = num_pair(a, b)?;
    Ok(Value::Float(as_f64(&x) / as_f64(&y)))
}

fn bi_mod(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "mod")?;
    match num_pair(a, b)? {
        (Num::I(x), Num::I(y)) => {
            if y == 0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Int(x.rem_euclid(y)))
            }
        }
        (x, y) => Ok(Value::Float(as_f64(&x).rem_euclid(as_f64(&y)))),
    }
}

fn bi_neg(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    match num(one(args, "neg")?)? {
        Num::I(x) => Ok(Value::Int(-x)),
        Num::F(x) => Ok(Value::Float(-x)),
    }
}

// === Comparisons ===

fn cmp_impl(
    args: &[Value],
    name: &str,
    ii: fn(i64, i64) -> bool,
    ff: fn(f64, f64) -> bool,
) -> Result<Value, EvalError> {
    let (a, b) = two(args, name)?;
    Ok(match num_pair(a, b)? {
        (Num::I(x), Num::I(y)) => Value::Bool(ii(x, y)),
        (x, y) => Value::Bool(ff(as_f64(&x), as_f64(&y))),
    })
}

fn bi_lt(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    cmp_impl(args, "<", |x, y| x < y, |x, y| x < y)
}

fn bi_le(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    cmp_impl(args, "<=", |x, y| x <= y, |x, y| x <= y)
}

fn bi_gt(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    cmp_impl(args, ">", |x, y| x > y, |x, y| x > y)
}

fn bi_ge(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    cmp_impl(args, ">=", |x, y| x >= y, |x, y| x >= y)
}

fn bi_eq(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "==")?;
    Ok(Value::Bool(a == b))
}

fn bi_ne(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "!=")?;
    Ok(Value::Bool(a != b))
}

fn bi_not(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    match one(args, "!")? {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(EvalError::TypeMismatch {
            expected: "Bool",
            got: other.type_name(),
        }),
    }
}

// === Special forms and structural builtins ===

fn bi_tuple(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Tuple(args.to_vec()))
}

fn bi_colon2(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(args, "colon")?;
    match (a, b) {
        (Value::Int(start), Value::Int(stop)) => Ok(Value::Range {
            start: *start,
            step: 1,
            stop: *stop,
        }),
        _ => Err(EvalError::TypeMismatch {
            expected: "Int",
            got: "non-integer range bound",
        }),
    }
}

/// Three-argument form: `colon(start, step, stop)`
fn bi_colon3(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    match args {
        [Value::Int(start), Value::Int(step), Value::Int(stop)] => {
            if *step == 0 {
                Err(EvalError::IncorrectArgument(
                    "range step must be nonzero".to_string(),
                ))
            } else {
                Ok(Value::Range {
                    start: *start,
                    step: *step,
                    stop: *stop,
                })
            }
        }
        _ => Err(EvalError::IncorrectArgument(
            "colon takes 3 integer arguments".to_string(),
        )),
    }
}

fn range_items(start: i64, step: i64, stop: i64) -> Result<Vec<Value>, EvalError> {
    if step == 0 {
        return Err(EvalError::IncorrectArgument(
            "range step must be nonzero".to_string(),
        ));
    }
    let mut items = Vec::new();
    let mut cur = start;
    while (step > 0 && cur <= stop) || (step < 0 && cur >= stop) {
        items.push(Value::Int(cur));
        cur += step;
    }
    Ok(items)
}

/// Generator wrapper: eagerly maps a function over a tuple or range,
/// producing a tuple.
fn bi_generate(reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (f, coll) = two(args, "generate")?;
    let items: Vec<Value> = match coll {
        Value::Tuple(items) => items.clone(),
        Value::Range { start, step, stop } => range_items(*start, *step, *stop)?,
        other => {
            return Err(EvalError::TypeMismatch {
                expected: "Tuple or Range",
                got: other.type_name(),
            })
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(reg.apply(f, &[item])?);
    }
    Ok(Value::Tuple(out))
}

fn bi_zero(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    match one(args, "zero")? {
        Value::Type(ValueType::Int) => Ok(Value::Int(0)),
        Value::Type(ValueType::Float) => Ok(Value::Float(0.0)),
        other => Err(EvalError::IncorrectArgument(format!(
            "zero is not defined for {}",
            other
        ))),
    }
}

fn bi_typeof(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Type(one(args, "typeof")?.value_type()))
}

fn bi_length(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    match one(args, "length")? {
        Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
        Value::NamedTuple(fields) => Ok(Value::Int(fields.len() as i64)),
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Range { start, step, stop } => {
            Ok(Value::Int(range_items(*start, *step, *stop)?.len() as i64))
        }
        other => Err(EvalError::TypeMismatch {
            expected: "Tuple, NamedTuple, Str or Range",
            got: other.type_name(),
        }),
    }
}

/// 0-based element access for tuples, named tuples (by index or key) and
/// ranges.
fn bi_get(_reg: &Registry, args: &[Value]) -> Result<Value, EvalError> {
    let (coll, key) = two(args, "get")?;
    match (coll, key) {
        (Value::Tuple(items), Value::Int(i)) => items
            .get(usize::try_from(*i).unwrap_or(usize::MAX))
            .cloned()
            .ok_or_else(|| {
                EvalError::IncorrectArgument(format!("index {} out of bounds", i))
            }),
        (Value::NamedTuple(fields), Value::Int(i)) => fields
            .get(usize::try_from(*i).unwrap_or(usize::MAX))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                EvalError::IncorrectArgument(format!("index {} out of bounds", i))
            }),
        (Value::NamedTuple(fields), Value::Str(k)) => fields
            .iter()
            .find(|(name, _)| name == k)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EvalError::IncorrectArgument(format!("no field named {}", k))),
        (Value::Range { start, step, stop }, Value::Int(i)) => {
            let items = range_items(*start, *step, *stop)?;
            items
                .get(usize::try_from(*i).unwrap_or(usize::MAX))
                .cloned()
                .ok_or_else(|| {
                    EvalError::IncorrectArgument(format!("index {} out of bounds", i))
                })
        }
        (coll, key) => Err(EvalError::IncorrectArgument(format!(
            "cannot index {} with {}",
            coll.type_name(),
            key.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> Registry {
        Registry::new()
    }

    fn call(reg: &Registry, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let id = reg.lookup(name).unwrap();
        reg.call(id, args)
    }

    #[test]
    fn test_arithmetic_promotion() {
        let r = reg();
        assert_eq!(call(&r, "+", &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert_eq!(
            call(&r, "*", &[Value::Int(2), Value::Float(3.0)]).unwrap(),
            Value::Float(6.0)
        );
        assert_eq!(
            call(&r, "/", &[Value::Int(1), Value::Int(2)]).unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    fn test_mod_by_zero() {
        let r = reg();
        assert!(matches!(
            call(&r, "mod", &[Value::Int(1), Value::Int(0)]),
            Err(EvalError::DivisionByZero)
        ));
    }

    #[test]
    fn test_comparisons() {
        let r = reg();
        assert_eq!(
            call(&r, "<", &[Value::Int(1), Value::Float(1.5)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call(&r, "==", &[Value::Str("a".into()), Value::Str("a".into())]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_tuple_and_get() {
        let r = reg();
        let t = call(&r, "tuple", &[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(t, Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        assert_eq!(call(&r, "length", &[t.clone()]).unwrap(), Value::Int(3));
        assert_eq!(call(&r, "get", &[t, Value::Int(2)]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_colon_and_generate() {
        let r = reg();
        let range = call(&r, "colon", &[Value::Int(1), Value::Int(3)]).unwrap();
        assert_eq!(
            range,
            Value::Range {
                start: 1,
                step: 1,
                stop: 3
            }
        );
        assert_eq!(call(&r, "length", &[range.clone()]).unwrap(), Value::Int(3));

        let neg = r.lookup("neg").unwrap();
        let mapped = call(&r, "generate", &[Value::Func(neg), range]).unwrap();
        assert_eq!(
            mapped,
            Value::Tuple(vec![Value::Int(-1), Value::Int(-2), Value::Int(-3)])
        );
    }

    #[test]
    fn test_zero_of_type() {
        let r = reg();
        assert_eq!(
            call(&r, "zero", &[Value::Type(ValueType::Float)]).unwrap(),
            Value::Float(0.0)
        );
        assert!(call(&r, "zero", &[Value::Type(ValueType::Str)]).is_err());
    }
}
