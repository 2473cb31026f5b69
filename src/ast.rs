//! This module defines the universal [`Value`] type shared by source syntax and runtime
//! data. Lists are right-nested chains of [`Pair`]s terminated by [`Value::Nil`];
//! vectors are shared, mutable buffers; closures carry their captured scope.
//! Ergonomic helper functions such as [`val`], [`sym`] and [`nil`] are provided for
//! building values in code and tests, together with `From` conversions for common
//! Rust types. Equality and display follow the interpreter's semantics: structural
//! for data, never-equal for anything callable.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::Arity;
use crate::evaluator::{Environment, FrameRef};

/// Type alias for integer values in interpreter
pub type IntegerType = i64;

/// Type alias for floating-point values in interpreter
pub type FloatType = f64;

/// Primitive function: receives already-evaluated arguments
pub type BuiltinFn = fn(&[Value]) -> Result<Value, Error>;

/// Special form handler: receives unevaluated operands, the environment and the
/// current evaluation depth
pub type SpecialFormFn = fn(&[Value], &mut Environment, usize) -> Result<Value, Error>;

/// Core value type in interpreter
#[derive(Clone)]
pub enum Value {
    Integer(IntegerType),
    Float(FloatType),
    String(String),
    Bool(bool),
    /// Symbols (identifiers); equality is by name
    Symbol(String),
    /// Built-in functions (looked up in the global table)
    BuiltinFunction {
        id: String,
        func: BuiltinFn,
        arity: Arity,
    },
    /// Special forms receive their operands unevaluated
    SpecialForm { id: String, form: SpecialFormFn },
    /// User-defined functions created by `lambda`
    Closure(Rc<Closure>),
    /// The empty list
    Nil,
    /// A cons cell; the only composite constructor for lists
    Pair(Rc<Pair>),
    /// Fixed-length mutable vector, shared by every copy of the value
    Vector(Rc<RefCell<Vec<Value>>>),
    /// Loop continuation produced by a tail self-call inside a tail-recursive closure.
    /// Never produced by the reader and never observable from user code.
    #[doc(hidden)]
    TailCall(Rc<[Value]>),
}

/// A cons cell
pub struct Pair {
    pub head: Value,
    pub tail: Value,
}

// Deep lists would otherwise be dropped recursively, one host frame per cell.
// Cells this drop owns alone are emptied onto a worklist instead.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending = vec![
            std::mem::replace(&mut self.head, Value::Nil),
            std::mem::replace(&mut self.tail, Value::Nil),
        ];
        while let Some(value) = pending.pop() {
            if let Value::Pair(pair) = value {
                if let Ok(mut pair) = Rc::try_unwrap(pair) {
                    pending.push(std::mem::replace(&mut pair.head, Value::Nil));
                    pending.push(std::mem::replace(&mut pair.tail, Value::Nil));
                }
            }
        }
    }
}

/// A user-defined function: parameters, body and the scope it was created in.
pub struct Closure {
    pub(crate) params: Vec<String>,
    pub(crate) body: Value,
    pub(crate) scope: FrameRef,
    naming: OnceCell<ClosureName>,
}

#[derive(Debug)]
struct ClosureName {
    name: String,
    tail_recursive: bool,
}

impl Closure {
    pub(crate) fn new(params: Vec<String>, body: Value, scope: FrameRef) -> Self {
        Closure {
            params,
            body,
            scope,
            naming: OnceCell::new(),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The name given by the first `define`/`letrec` that bound this closure
    pub fn name(&self) -> Option<&str> {
        self.naming.get().map(|naming| naming.name.as_str())
    }

    /// Whether applications run the body as a loop over tail self-calls
    pub fn is_tail_recursive(&self) -> bool {
        self.naming.get().is_some_and(|naming| naming.tail_recursive)
    }

    /// Name this closure and cache the calling convention chosen by `analyze`.
    /// Only the first naming sticks; later bindings under other names are aliases.
    pub(crate) fn assign_name(&self, name: &str, analyze: impl FnOnce(&Closure) -> bool) {
        if self.naming.get().is_some() {
            return;
        }
        let tail_recursive = analyze(self);
        tracing::debug!(name, tail_recursive, "named closure");
        let _ = self.naming.set(ClosureName {
            name: name.to_owned(),
            tail_recursive,
        });
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name())
            .field("params", &self.params)
            .field("body", &self.body)
            .field("scope", &self.scope)
            .finish()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::String(s) => write!(f, "String(\"{s}\")"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            Value::SpecialForm { id, .. } => write!(f, "SpecialForm({id})"),
            Value::Closure(closure) => write!(f, "{closure:?}"),
            Value::Nil => write!(f, "Nil"),
            Value::Pair(pair) => write!(f, "Pair({:?}, {:?})", pair.head, pair.tail),
            Value::Vector(_) => write!(f, "Vector{self}"),
            Value::TailCall(args) => write!(f, "TailCall({args:?})"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<FloatType> for Value {
    fn from(x: FloatType) -> Self {
        Value::Float(x)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(IntegerType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntegerType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<Value> for IntegerType {
    type Error = Error;

    fn try_from(value: Value) -> Result<IntegerType, Error> {
        match value {
            Value::Integer(n) => Ok(n),
            other => Err(Error::TypeError(format!(
                "expected integer, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list
pub fn nil() -> Value {
    Value::Nil
}

impl Value {
    pub fn cons(head: Value, tail: Value) -> Value {
        Value::Pair(Rc::new(Pair { head, tail }))
    }

    /// Build a proper list, consing from the last element backwards
    pub fn list(items: Vec<Value>) -> Value {
        Self::list_with_tail(items, Value::Nil)
    }

    /// Build a list whose final tail is `tail` instead of null
    pub fn list_with_tail(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |rest, item| Value::cons(item, rest))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(RefCell::new(items)))
    }

    pub fn head(&self) -> Result<&Value, Error> {
        match self {
            Value::Pair(pair) => Ok(&pair.head),
            other => Err(Error::TypeError(format!(
                "head of non-pair: {other} ({})",
                other.type_name()
            ))),
        }
    }

    pub fn tail(&self) -> Result<&Value, Error> {
        match self {
            Value::Pair(pair) => Ok(&pair.tail),
            other => Err(Error::TypeError(format!(
                "tail of non-pair: {other} ({})",
                other.type_name()
            ))),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only null and `#f` are false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Iterate the elements of a list. The iterator yields an error and stops if the
    /// chain ends in anything other than null.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            rest: Some(self),
        }
    }

    /// Collect a proper list into a vector
    pub fn to_vec(&self) -> Result<Vec<Value>, Error> {
        self.iter().map(|item| item.cloned()).collect()
    }

    /// Short kind name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::BuiltinFunction { .. } => "builtin-function",
            Value::SpecialForm { .. } => "special-form",
            Value::Closure(_) => "closure",
            Value::Nil => "null",
            Value::Pair(_) => "pair",
            Value::Vector(_) => "vector",
            Value::TailCall(_) => "tail-call",
        }
    }

    /// Display form used by `print` and `str`: like `Display`, but a top-level
    /// string is written without quotes
    pub fn display_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Iterator over the elements of a list value
pub struct ListIter<'a> {
    rest: Option<&'a Value>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<&'a Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rest.take()? {
            Value::Nil => None,
            Value::Pair(pair) => {
                self.rest = Some(&pair.tail);
                Some(Ok(&pair.head))
            }
            other => Some(Err(Error::TypeError(format!(
                "malformed list: ends in {other} instead of ()"
            )))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, &mut Vec::new())
    }
}

/// Write `value`, tracking the vectors currently open so that a vector stored
/// inside itself prints as `#(...)` instead of recursing forever
fn write_value(
    f: &mut fmt::Formatter<'_>,
    value: &Value,
    open: &mut Vec<*const RefCell<Vec<Value>>>,
) -> fmt::Result {
    match value {
        Value::Integer(n) => write!(f, "{n}"),
        // Debug keeps the decimal point on whole floats (3.0, not 3)
        Value::Float(x) => write!(f, "{x:?}"),
        Value::String(s) => write!(f, "\"{s}\""),
        Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
        Value::Symbol(s) => write!(f, "{s}"),
        Value::BuiltinFunction { id, .. } => write!(f, "#<builtin-function:{id}>"),
        Value::SpecialForm { id, .. } => write!(f, "#<special-form:{id}>"),
        Value::Closure(closure) => match closure.name() {
            Some(name) => write!(f, "#<closure:{name}>"),
            None => write!(f, "#<closure>"),
        },
        Value::Nil => write!(f, "()"),
        Value::Pair(pair) => {
            write!(f, "(")?;
            write_value(f, &pair.head, open)?;
            let mut rest = &pair.tail;
            loop {
                match rest {
                    Value::Nil => break,
                    Value::Pair(next) => {
                        write!(f, " ")?;
                        write_value(f, &next.head, open)?;
                        rest = &next.tail;
                    }
                    other => {
                        write!(f, " . ")?;
                        write_value(f, other, open)?;
                        break;
                    }
                }
            }
            write!(f, ")")
        }
        Value::Vector(items) => {
            let id = Rc::as_ptr(items);
            if open.contains(&id) {
                return write!(f, "#(...)");
            }
            open.push(id);
            write!(f, "#(")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_value(f, item, open)?;
            }
            open.pop();
            write!(f, ")")
        }
        Value::TailCall(_) => write!(f, "#<tail-call>"),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Pair(_), Value::Pair(_)) => pairs_equal(self, other),
            (Value::Vector(a), Value::Vector(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            // Functions, closures, special forms and loop markers are never equal
            _ => false,
        }
    }
}

/// Structural list equality, walking tails iteratively
fn pairs_equal(mut a: &Value, mut b: &Value) -> bool {
    loop {
        match (a, b) {
            (Value::Pair(x), Value::Pair(y)) => {
                if Rc::ptr_eq(x, y) {
                    return true;
                }
                if x.head != y.head {
                    return false;
                }
                a = &x.tail;
                b = &y.tail;
            }
            _ => return a == b,
        }
    }
}
