//! The append-only execution record ("tape").
//!
//! A tape is the output of one trace: a flat, single-static-assignment
//! sequence of recorded operations with all control flow resolved away.
//! Entries are addressed by [`ValueId`] handles equal to their insertion
//! position; entries are never removed or mutated in place - only the
//! cached value is set, once, at creation. The tape also carries a result
//! pointer (set once at the end of the top-level trace), a tagged metadata
//! map, and the user-supplied interception policy that produced it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::Serialize;
use serde_json::json;
use smallvec::SmallVec;

use crate::interp::EvalError;
use crate::registry::Registry;
use crate::trace::policy::TracePolicy;
use crate::value::Value;

/// Handle of one tape entry; equal to the entry's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ValueId(pub usize);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An operand of a recorded call: an earlier entry's handle or an inline
/// literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Id(ValueId),
    Lit(Value),
}

impl Operand {
    pub fn as_id(&self) -> Option<ValueId> {
        match self {
            Operand::Id(id) => Some(*id),
            _ => None,
        }
    }
}

/// One tape entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Entry {
    /// Placeholder for one of the traced call's top-level arguments
    Input { value: Value },
    /// An embedded literal
    Const { value: Value },
    /// A recorded operation with its cached computed value
    Call {
        callee: Value,
        args: SmallVec<[Operand; 4]>,
        value: Value,
    },
}

impl Entry {
    /// The concrete value cached on this entry
    pub fn value(&self) -> &Value {
        match self {
            Entry::Input { value } => value,
            Entry::Const { value } => value,
            Entry::Call { value, .. } => value,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Entry::Call { .. })
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Entry::Input { .. })
    }
}

/// The append-only execution record.
#[derive(Clone)]
pub struct Tape {
    entries: Vec<Entry>,
    result: Option<ValueId>,
    /// Tagged metadata (e.g. `"variadic"` when the traced callable's
    /// signature grouped trailing arguments)
    pub meta: HashMap<String, Value>,
    context: Arc<dyn TracePolicy>,
}

impl Tape {
    /// Create an empty tape carrying the given interception policy as its
    /// user context.
    pub fn new(context: Arc<dyn TracePolicy>) -> Tape {
        Tape {
            entries: Vec::new(),
            result: None,
            meta: HashMap::new(),
            context,
        }
    }

    /// Append an entry, returning its handle. O(1), monotonic.
    pub fn append(&mut self, entry: Entry) -> ValueId {
        let id = ValueId(self.entries.len());
        self.entries.push(entry);
        id
    }

    /// Register each top-level argument as an Input entry, in order.
    pub fn register_inputs(&mut self, args: &[Value]) -> Vec<ValueId> {
        args.iter()
            .map(|v| self.append(Entry::Input { value: v.clone() }))
            .collect()
    }

    pub fn get(&self, id: ValueId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    /// The cached concrete value of an entry
    pub fn value_of(&self, id: ValueId) -> Option<&Value> {
        self.get(id).map(Entry::value)
    }

    /// Handle of the most recently appended entry
    pub fn last_id(&self) -> Option<ValueId> {
        self.entries.len().checked_sub(1).map(ValueId)
    }

    pub fn set_result(&mut self, id: ValueId) {
        self.result = Some(id);
    }

    pub fn result(&self) -> Option<ValueId> {
        self.result
    }

    /// The user context (interception policy) attached at trace start
    pub fn context(&self) -> &Arc<dyn TracePolicy> {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Number of Input entries
    pub fn input_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_input()).count()
    }

    /// Re-execute the recorded straight-line operations against fresh
    /// input values, without re-tracing.
    ///
    /// Inputs substitute positionally (arity-checked against the recorded
    /// Input entries); each Call entry re-applies its callee to the current
    /// operand values. Variadic grouping is already baked into the recorded
    /// entries, so no signatures are consulted. Returns the value at the
    /// result pointer.
    pub fn play(&self, registry: &Registry, args: &[Value]) -> Result<Value, EvalError> {
        let inputs = self.input_count();
        if args.len() != inputs {
            return Err(EvalError::IncorrectArgument(format!(
                "replay takes {} input(s), got {}",
                inputs,
                args.len()
            )));
        }
        let result = self.result.ok_or_else(|| {
            EvalError::Runtime("tape has no result pointer; was the trace completed?".to_string())
        })?;

        let mut vals: Vec<Value> = Vec::with_capacity(self.entries.len());
        let mut next_input = 0usize;
        for entry in &self.entries {
            let v = match entry {
                Entry::Input { .. } => {
                    let v = args[next_input].clone();
                    next_input += 1;
                    v
                }
                Entry::Const { value } => value.clone(),
                Entry::Call { callee, args, .. } => {
                    let ops: Vec<Value> = args
                        .iter()
                        .map(|op| match op {
                            Operand::Id(id) => vals[id.0].clone(),
                            Operand::Lit(v) => v.clone(),
                        })
                        .collect();
                    registry.apply(callee, &ops)?
                }
            };
            vals.push(v);
        }
        Ok(vals[result.0].clone())
    }

    /// Serialize the tape (entries, result pointer, metadata) for
    /// inspection tooling. The attached context is not serialized.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "entries": self.entries,
            "result": self.result,
            "meta": self.meta,
        })
    }

    /// Human-readable rendering with callee names resolved through the
    /// registry.
    pub fn render(&self, registry: &Registry) -> String {
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let line = match entry {
                Entry::Input { value } => format!("  inp %{} = {}", i, value),
                Entry::Const { value } => format!("  const %{} = {}", i, value),
                Entry::Call {
                    callee,
                    args,
                    value,
                } => {
                    let name = match callee.as_func() {
                        Some(fid) => registry.name_of(fid).to_string(),
                        None => callee.to_string(),
                    };
                    let ops = args
                        .iter()
                        .map(|op| match op {
                            Operand::Id(id) => id.to_string(),
                            Operand::Lit(v) => v.to_string(),
                        })
                        .join(", ");
                    format!("  %{} = {}({}) = {}", i, name, ops, value)
                }
            };
            out.push_str(&line);
            out.push('\n');
        }
        if let Some(r) = self.result {
            out.push_str(&format!("  result {}\n", r));
        }
        out
    }
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape")
            .field("entries", &self.entries)
            .field("result", &self.result)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tape ({} entries)", self.entries.len())?;
        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                Entry::Input { value } => writeln!(f, "  inp %{} = {}", i, value)?,
                Entry::Const { value } => writeln!(f, "  const %{} = {}", i, value)?,
                Entry::Call {
                    callee,
                    args,
                    value,
                } => {
                    let ops = args
                        .iter()
                        .map(|op| match op {
                            Operand::Id(id) => id.to_string(),
                            Operand::Lit(v) => v.to_string(),
                        })
                        .join(", ");
                    writeln!(f, "  %{} = {}({}) = {}", i, callee, ops, value)?;
                }
            }
        }
        if let Some(r) = self.result {
            writeln!(f, "  result {}", r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::policy::DefaultPolicy;

    fn empty_tape() -> Tape {
        Tape::new(Arc::new(DefaultPolicy::new()))
    }

    #[test]
    fn test_append_returns_position() {
        let mut tape = empty_tape();
        let a = tape.append(Entry::Const {
            value: Value::Int(1),
        });
        let b = tape.append(Entry::Const {
            value: Value::Int(2),
        });
        assert_eq!(a, ValueId(0));
        assert_eq!(b, ValueId(1));
        assert_eq!(tape.last_id(), Some(b));
        assert_eq!(tape.value_of(a), Some(&Value::Int(1)));
    }

    #[test]
    fn test_register_inputs_in_order() {
        let mut tape = empty_tape();
        let ids = tape.register_inputs(&[Value::Int(1), Value::Float(2.0)]);
        assert_eq!(ids, vec![ValueId(0), ValueId(1)]);
        assert_eq!(tape.input_count(), 2);
        assert!(tape.get(ids[1]).unwrap().is_input());
    }

    #[test]
    fn test_play_checks_input_arity() {
        let registry = Registry::new();
        let mut tape = empty_tape();
        let ids = tape.register_inputs(&[Value::Int(1)]);
        tape.set_result(ids[0]);
        assert!(tape.play(&registry, &[]).is_err());
        assert_eq!(
            tape.play(&registry, &[Value::Int(9)]).unwrap(),
            Value::Int(9)
        );
    }

    #[test]
    fn test_play_reapplies_calls() {
        let registry = Registry::new();
        let add = registry.lookup("+").unwrap();
        let mut tape = empty_tape();
        let ids = tape.register_inputs(&[Value::Int(1)]);
        let call = tape.append(Entry::Call {
            callee: Value::Func(add),
            args: SmallVec::from_vec(vec![Operand::Id(ids[0]), Operand::Lit(Value::Int(10))]),
            value: Value::Int(11),
        });
        tape.set_result(call);
        assert_eq!(
            tape.play(&registry, &[Value::Int(5)]).unwrap(),
            Value::Int(15)
        );
    }

    #[test]
    fn test_json_dump_shape() {
        let mut tape = empty_tape();
        let ids = tape.register_inputs(&[Value::Int(1)]);
        tape.set_result(ids[0]);
        tape.meta
            .insert("variadic".to_string(), Value::Bool(true));
        let dump = tape.to_json();
        assert_eq!(dump["entries"].as_array().unwrap().len(), 1);
        assert_eq!(dump["result"], json!(0));
        assert_eq!(dump["meta"]["variadic"], json!({"Bool": true}));
    }
}
