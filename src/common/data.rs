use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use crate::common::closure::{Arg, Pval};
use crate::common::span::Span;
use crate::construct::env::Env;
use crate::core::ffi::HostObject;
use crate::vm::error::{RuntimeError, RuntimeErrorKind};
use crate::vm::eval;

/// The key type for a tuple's named members. Labels are always
/// strings — a label expression that evaluates to a non-string value
/// is coerced with [`Value::string_form`] at construction time.
pub type Label = String;

/// A tuple is Lark's only compound type: an ordered list of
/// positional members plus a string-keyed map of named members.
/// `BTreeMap` keeps named members in a stable, deterministic order for
/// display and iteration, which `HashMap` would not guarantee.
#[derive(Debug, Clone, Default)]
pub struct Tuple {
    pub positional: Vec<Value>,
    pub named: BTreeMap<Label, Value>,
}

impl Tuple {
    pub fn new() -> Tuple {
        Tuple { positional: Vec::new(), named: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Tuple equality ignores named members entirely and compares only
    /// the positional list — two tuples with the same positional
    /// elements but different named members are considered equal.
    pub fn equals(&self, other: &Tuple) -> bool {
        self.positional.len() == other.positional.len()
            && self.positional.iter().zip(other.positional.iter()).all(|(a, b)| a.equals(b))
    }

    pub fn deep_copy(&self) -> Tuple {
        Tuple {
            positional: self.positional.iter().map(Value::deep_copy).collect(),
            named: self.named.iter().map(|(k, v)| (k.clone(), v.deep_copy())).collect(),
        }
    }
}

/// Every runtime value a Lark program can produce or hold. Compound
/// and callable values are behind `Rc<RefCell<_>>`/`Rc<_>` so that
/// assignment and passing-by-value copy a handle rather than the
/// underlying structure, matching Lark's reference-counted object
/// model.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Tuple(Rc<RefCell<Tuple>>),
    Pval(Rc<Pval>),
    Host(Rc<dyn HostObject>),
}

impl Value {
    pub fn tuple(t: Tuple) -> Value {
        Value::Tuple(Rc::new(RefCell::new(t)))
    }

    /// The name used in error messages and by the language's `type`
    /// builtin.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Pval(_) => "pval",
            Value::Host(_) => "host",
        }
    }

    /// Falsy values are `false`, `nil`, numeric zero, the empty
    /// string, and the empty tuple (no positional or named members).
    /// Everything else, including `Pval`s and host objects, is truthy.
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Tuple(t) => t.borrow().is_empty(),
            Value::Pval(_) | Value::Host(_) => false,
        }
    }

    pub fn string_form(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{}", f),
            Value::String(s) => s.to_string(),
            Value::Tuple(t) => {
                let t = t.borrow();
                let mut parts: Vec<String> = t.positional.iter().map(Value::string_form).collect();
                parts.extend(t.named.iter().map(|(k, v)| format!("{}: {}", k, v.string_form())));
                format!("({})", parts.join(", "))
            },
            Value::Pval(p) => p.as_str(),
            Value::Host(h) => h.string_form(),
        }
    }

    /// Deep-copies compound values; primitives and callables, which
    /// are immutable or reference-identity types, are returned as
    /// cheap clones.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Tuple(t) => Value::tuple(t.borrow().deep_copy()),
            other => other.clone(),
        }
    }

    /// Structural equality. `Int`/`Float` cross-promote, so `1 == 1.0`
    /// holds, matching the promotion rule used by the binary numeric
    /// operators. `Pval` and `Host` values compare by identity — two
    /// closures are equal only if they are the same closure.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || a.borrow().equals(&b.borrow()),
            (Value::Pval(a), Value::Pval(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Invokes a callable value. Primitive values are no-ops that
    /// return themselves unchanged, so `5()` is simply `5` — this
    /// lets generic code call a value without first checking whether
    /// it's a `Pval`.
    pub fn invoke(&self, args: &[Arg], span: &Span) -> Result<Value, RuntimeError> {
        match self {
            Value::Pval(p) => eval::call_pval(p, args, span),
            Value::Host(h) => h.invoke(args, span),
            other => Ok(other.clone()),
        }
    }

    pub fn length(&self, span: &Span) -> Result<usize, RuntimeError> {
        match self {
            Value::String(s) => Ok(s.chars().count()),
            Value::Tuple(t) => Ok(t.borrow().len()),
            other => Err(RuntimeError::new(RuntimeErrorKind::NoDotAccess(other.type_tag()), span.clone())),
        }
    }

    /// Dot-access by position: `t.0`. Negative indices count from the
    /// end, mirroring the positional-index semantics documented for
    /// tuples.
    pub fn get_index(&self, index: i64, span: &Span) -> Result<Value, RuntimeError> {
        match self {
            Value::Tuple(t) => {
                let t = t.borrow();
                let len = t.positional.len() as i64;
                let real = if index < 0 { len + index } else { index };
                if real < 0 || real >= len {
                    return Err(RuntimeError::new(RuntimeErrorKind::DotAccessRange(index), span.clone()));
                }
                Ok(t.positional[real as usize].clone())
            },
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let real = if index < 0 { len + index } else { index };
                if real < 0 || real >= len {
                    return Err(RuntimeError::new(RuntimeErrorKind::DotAccessRange(index), span.clone()));
                }
                Ok(Value::String(Rc::from(chars[real as usize].to_string())))
            },
            other => Err(RuntimeError::new(RuntimeErrorKind::NoDotAccess(other.type_tag()), span.clone())),
        }
    }

    /// Dot-access by name: `t.label`.
    pub fn get_member(&self, label: &str, span: &Span) -> Result<Value, RuntimeError> {
        match self {
            Value::Tuple(t) => t
                .borrow()
                .named
                .get(label)
                .cloned()
                .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::DotAccessMissing(label.to_string()), span.clone())),
            other => Err(RuntimeError::new(RuntimeErrorKind::NoDotAccess(other.type_tag()), span.clone())),
        }
    }

    pub fn set_index(&self, index: i64, value: Value, span: &Span) -> Result<(), RuntimeError> {
        match self {
            Value::Tuple(t) => {
                let mut t = t.borrow_mut();
                let len = t.positional.len() as i64;
                let real = if index < 0 { len + index } else { index };
                if real < 0 || real >= len {
                    return Err(RuntimeError::new(RuntimeErrorKind::DotAccessRange(index), span.clone()));
                }
                t.positional[real as usize] = value;
                Ok(())
            },
            Value::String(_) => Err(RuntimeError::new(RuntimeErrorKind::ImmutableString, span.clone())),
            other => Err(RuntimeError::new(RuntimeErrorKind::NoDotAccess(other.type_tag()), span.clone())),
        }
    }

    pub fn set_member(&self, label: &str, value: Value, span: &Span) -> Result<(), RuntimeError> {
        match self {
            Value::Tuple(t) => {
                t.borrow_mut().named.insert(label.to_string(), value);
                Ok(())
            },
            Value::String(_) => Err(RuntimeError::new(RuntimeErrorKind::ImmutableString, span.clone())),
            other => Err(RuntimeError::new(RuntimeErrorKind::NoDotAccess(other.type_tag()), span.clone())),
        }
    }

    /// Looks up a tuple member that acts as an operator overload: a
    /// named member whose key is the literal operator symbol, e.g.
    /// `"+"`. User code installs one by writing `t."+" = [other]{...}`.
    fn operator_overload(&self, op: &str) -> Option<Value> {
        match self {
            Value::Tuple(t) => t.borrow().named.get(op).cloned(),
            _ => None,
        }
    }

    fn numeric_op(
        &self,
        other: &Value,
        op: &str,
        span: &Span,
        int_op: impl Fn(i64, i64) -> Result<Value, RuntimeError>,
        float_op: impl Fn(f64, f64) -> Value,
    ) -> Result<Value, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => int_op(*a, *b),
            (Value::Int(a), Value::Float(b)) => Ok(float_op(*a as f64, *b)),
            (Value::Float(a), Value::Int(b)) => Ok(float_op(*a, *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(float_op(*a, *b)),
            _ => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedOp { op: op.to_string(), ty: self.type_tag() },
                span.clone(),
            )),
        }
    }

    pub fn add(&self, other: &Value, span: &Span) -> Result<Value, RuntimeError> {
        if let Some(overload) = self.operator_overload("+") {
            return overload.invoke(&[Arg::Value(other.clone())], span);
        }
        match (self, other) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(Rc::from(format!("{}{}", a, b)))),
            (Value::Tuple(a), Value::Tuple(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                let mut positional = a.positional.clone();
                positional.extend(b.positional.iter().cloned());
                let mut named = a.named.clone();
                named.extend(b.named.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Value::tuple(Tuple { positional, named }))
            },
            _ => self.numeric_op(
                other,
                "+",
                span,
                |a, b| Ok(Value::Int(a.wrapping_add(b))),
                |a, b| Value::Float(a + b),
            ),
        }
    }

    pub fn sub(&self, other: &Value, span: &Span) -> Result<Value, RuntimeError> {
        if let Some(overload) = self.operator_overload("-") {
            return overload.invoke(&[Arg::Value(other.clone())], span);
        }
        self.numeric_op(other, "-", span, |a, b| Ok(Value::Int(a.wrapping_sub(b))), |a, b| Value::Float(a - b))
    }

    pub fn mul(&self, other: &Value, span: &Span) -> Result<Value, RuntimeError> {
        if let Some(overload) = self.operator_overload("*") {
            return overload.invoke(&[Arg::Value(other.clone())], span);
        }
        self.numeric_op(other, "*", span, |a, b| Ok(Value::Int(a.wrapping_mul(b))), |a, b| Value::Float(a * b))
    }

    /// Numeric division truncates toward zero for `int / int`; mixing
    /// an `int` and a `float` promotes to `float` division. Dividing a
    /// string splits it by the given separator into a positional
    /// tuple of substrings.
    pub fn div(&self, other: &Value, span: &Span) -> Result<Value, RuntimeError> {
        if let Some(overload) = self.operator_overload("/") {
            return overload.invoke(&[Arg::Value(other.clone())], span);
        }
        if let (Value::String(a), Value::String(b)) = (self, other) {
            let parts: Vec<Value> = if b.is_empty() {
                a.chars().map(|c| Value::String(Rc::from(c.to_string()))).collect()
            } else {
                a.split(b.as_ref()).map(|s| Value::String(Rc::from(s))).collect()
            };
            return Ok(Value::tuple(Tuple { positional: parts, named: BTreeMap::new() }));
        }
        self.numeric_op(
            other,
            "/",
            span,
            |a, b| {
                if b == 0 {
                    Err(RuntimeError::new(RuntimeErrorKind::DivisionByZero, span.clone()))
                } else {
                    Ok(Value::Int(a.wrapping_div(b)))
                }
            },
            |a, b| Value::Float(a / b),
        )
    }

    pub fn modulo(&self, other: &Value, span: &Span) -> Result<Value, RuntimeError> {
        if let Some(overload) = self.operator_overload("%") {
            return overload.invoke(&[Arg::Value(other.clone())], span);
        }
        self.numeric_op(
            other,
            "%",
            span,
            |a, b| {
                if b == 0 {
                    Err(RuntimeError::new(RuntimeErrorKind::DivisionByZero, span.clone()))
                } else {
                    Ok(Value::Int(a.wrapping_rem(b)))
                }
            },
            |a, b| Value::Float(a % b),
        )
    }

    /// Ordered comparison: numeric cross-promotion as in `equals`,
    /// lexicographic for strings, and positional-length ordering for
    /// tuples.
    pub fn compare(&self, other: &Value, span: &Span) -> Result<std::cmp::Ordering, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(|| nan_error(span)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).ok_or_else(|| nan_error(span)),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(|| nan_error(span)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (Value::Tuple(a), Value::Tuple(b)) => Ok(a.borrow().len().cmp(&b.borrow().len())),
            _ => Err(RuntimeError::new(
                RuntimeErrorKind::UndefinedOp { op: "<".to_string(), ty: self.type_tag() },
                span.clone(),
            )),
        }
    }
}

fn nan_error(span: &Span) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::UndefinedOp { op: "<".to_string(), ty: "float (NaN)" }, span.clone())
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string_form())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.equals(other)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::source::Source;

    fn span() -> Span {
        let source = Source::source("x");
        Span::new(&source, 0, 1)
    }

    #[test]
    fn int_float_equal() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
    }

    #[test]
    fn falsy_values() {
        assert!(Value::Int(0).is_falsy());
        assert!(Value::tuple(Tuple::new()).is_falsy());
        assert!(!Value::Int(1).is_falsy());
    }

    #[test]
    fn tuple_equality_ignores_named() {
        let mut a = Tuple::new();
        a.positional.push(Value::Int(1));
        a.named.insert("x".to_string(), Value::Int(2));
        let mut b = Tuple::new();
        b.positional.push(Value::Int(1));
        assert!(Value::tuple(a).equals(&Value::tuple(b)));
    }

    #[test]
    fn string_split_join_roundtrip() {
        let a = Value::String(Rc::from("a,b,c"));
        let sep = Value::String(Rc::from(","));
        let split = a.div(&sep, &span()).unwrap();
        if let Value::Tuple(t) = split {
            let joined: Vec<String> = t.borrow().positional.iter().map(Value::string_form).collect();
            assert_eq!(joined.join(","), "a,b,c");
        } else {
            panic!("expected tuple");
        }
    }

    #[test]
    fn division_by_zero() {
        assert!(Value::Int(1).div(&Value::Int(0), &span()).is_err());
    }

    #[test]
    fn int_division_truncates() {
        assert_eq!(Value::Int(-7).div(&Value::Int(2), &span()).unwrap(), Value::Int(-3));
    }
}
