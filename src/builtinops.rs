//! Built-in operations registry.
//!
//! Every primitive function and special form the interpreter knows about is declared
//! once in a static table and installed into the global table of each environment
//! created by [`crate::evaluator::create_global_env`].
//!
//! ```scheme
//! (+ 1 2 3)                ; 6, integers stay integers
//! (+ 1.5 2.0)              ; 3.5
//! (< 1 2 3)                ; #t, comparisons chain
//! (str "n=" 4)             ; "n=4"
//! (~ (vec (list 1 2)) 0)   ; 1
//! ```
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: Receive their arguments already evaluated (e.g. `+`, `car`, `print`)
//! - **Special Forms**: Receive their operands unevaluated together with the
//!   environment (`lambda`, `define`, `let`, `letrec`, `if`, `cond`)
//!
//! ## Numeric Operations
//!
//! Arithmetic is closed over the operand kind: the first operand decides whether
//! the call works on integers or floats, and every other operand must be of the same
//! kind. There is no implicit promotion. Integer arithmetic is checked, so overflow
//! and division by zero are reported as errors instead of wrapping or aborting.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** following the signature `fn(&[Value]) -> Result<Value, Error>`
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions
//!
//! Hosts embedding the interpreter can also add functions at runtime through
//! [`crate::evaluator::Environment::register_builtin_function`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::rc::Rc;
use std::sync::LazyLock;

use crate::Error;
use crate::ast::{BuiltinFn, FloatType, IntegerType, SpecialFormFn, Value};
use crate::evaluator::{eval_cond, eval_define, eval_if, eval_lambda, eval_let, eval_letrec};

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn validate(&self, got: usize) -> Result<(), Error> {
        let accepted = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if accepted {
            Ok(())
        } else {
            Err(Error::arity_error(*self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Regular function that takes evaluated arguments
    Function(BuiltinFn),
    /// Special form that receives unevaluated operands, the environment and the
    /// current evaluation depth
    SpecialForm(SpecialFormFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier this operation is bound to in the global table
    pub id: &'static str,
    /// The implementation of this operation (function or special form)
    pub op_kind: OpKind,
    /// Expected number of arguments (operands, for special forms)
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// Check if the given number of arguments is valid for this operation
    pub fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(arg_count)
    }

    /// The value bound to this operation's identifier in the global table
    pub fn to_value(&self) -> Value {
        match self.op_kind {
            OpKind::Function(func) => Value::BuiltinFunction {
                id: self.id.to_owned(),
                func,
                arity: self.arity,
            },
            OpKind::SpecialForm(form) => Value::SpecialForm {
                id: self.id.to_owned(),
                form,
            },
        }
    }
}

//
// Argument helpers
//

/// Destructure a fixed number of arguments
fn exactly<const N: usize>(args: &[Value]) -> Result<&[Value; N], Error> {
    args.try_into()
        .map_err(|_| Error::arity_error(Arity::Exact(N), args.len()))
}

fn expect_integer(op: &str, value: &Value) -> Result<IntegerType, Error> {
    match value {
        Value::Integer(n) => Ok(*n),
        other => Err(Error::TypeError(format!(
            "'{op}' expects an integer, got {other} ({})",
            other.type_name()
        ))),
    }
}

fn expect_string<'a>(op: &str, value: &'a Value) -> Result<&'a str, Error> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::TypeError(format!(
            "'{op}' expects a string, got {other} ({})",
            other.type_name()
        ))),
    }
}

//
// Arithmetic
//

/// Operands of an arithmetic call, all of the kind chosen by the first one
enum Operands {
    Integer(Vec<IntegerType>),
    Float(Vec<FloatType>),
}

fn kind_mismatch(op: &str, expected: &str, got: &Value) -> Error {
    Error::TypeError(format!(
        "'{op}' cannot mix {expected} operands with {got} ({})",
        got.type_name()
    ))
}

fn numeric_operands(op: &str, args: &[Value]) -> Result<Operands, Error> {
    match args.first() {
        None | Some(Value::Integer(_)) => args
            .iter()
            .map(|arg| match arg {
                Value::Integer(n) => Ok(*n),
                other => Err(kind_mismatch(op, "integer", other)),
            })
            .collect::<Result<_, _>>()
            .map(Operands::Integer),
        Some(Value::Float(_)) => args
            .iter()
            .map(|arg| match arg {
                Value::Float(x) => Ok(*x),
                other => Err(kind_mismatch(op, "float", other)),
            })
            .collect::<Result<_, _>>()
            .map(Operands::Float),
        Some(other) => Err(Error::TypeError(format!(
            "'{op}' expects numeric operands, got {other} ({})",
            other.type_name()
        ))),
    }
}

fn checked_fold(
    numbers: &[IntegerType],
    init: IntegerType,
    op: fn(IntegerType, IntegerType) -> Option<IntegerType>,
    what: &str,
) -> Result<IntegerType, Error> {
    numbers.iter().try_fold(init, |acc, &n| {
        op(acc, n).ok_or_else(|| Error::EvalError(format!("Integer overflow in {what}")))
    })
}

fn builtin_add(args: &[Value]) -> Result<Value, Error> {
    match numeric_operands("+", args)? {
        Operands::Integer(numbers) => {
            checked_fold(&numbers, 0, IntegerType::checked_add, "addition").map(Value::Integer)
        }
        Operands::Float(numbers) => Ok(Value::Float(numbers.iter().sum())),
    }
}

fn builtin_sub(args: &[Value]) -> Result<Value, Error> {
    match numeric_operands("-", args)? {
        Operands::Integer(numbers) => match numbers.as_slice() {
            [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
            [n] => n
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| Error::EvalError("Integer overflow in negation".into())),
            [first, rest @ ..] => {
                checked_fold(rest, *first, IntegerType::checked_sub, "subtraction")
                    .map(Value::Integer)
            }
        },
        Operands::Float(numbers) => match numbers.as_slice() {
            [x] => Ok(Value::Float(-x)),
            [first, rest @ ..] => Ok(Value::Float(rest.iter().fold(*first, |acc, x| acc - x))),
            [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
        },
    }
}

fn builtin_mul(args: &[Value]) -> Result<Value, Error> {
    match numeric_operands("*", args)? {
        Operands::Integer(numbers) => match numbers.as_slice() {
            [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
            [first, rest @ ..] => {
                checked_fold(rest, *first, IntegerType::checked_mul, "multiplication")
                    .map(Value::Integer)
            }
        },
        Operands::Float(numbers) => Ok(Value::Float(numbers.iter().product())),
    }
}

fn checked_divide(
    numbers: &[IntegerType],
    op: fn(IntegerType, IntegerType) -> Option<IntegerType>,
    what: &str,
) -> Result<IntegerType, Error> {
    let [first, rest @ ..] = numbers else {
        return Err(Error::arity_error(Arity::AtLeast(2), 0));
    };
    rest.iter().try_fold(*first, |acc, &n| {
        if n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        op(acc, n).ok_or_else(|| Error::EvalError(format!("Integer overflow in {what}")))
    })
}

fn builtin_div(args: &[Value]) -> Result<Value, Error> {
    match numeric_operands("/", args)? {
        Operands::Integer(numbers) => {
            checked_divide(&numbers, IntegerType::checked_div, "division").map(Value::Integer)
        }
        Operands::Float(numbers) => match numbers.as_slice() {
            [first, rest @ ..] => Ok(Value::Float(rest.iter().fold(*first, |acc, x| acc / x))),
            [] => Err(Error::arity_error(Arity::AtLeast(2), 0)),
        },
    }
}

fn builtin_rem(args: &[Value]) -> Result<Value, Error> {
    let numbers = args
        .iter()
        .map(|arg| expect_integer("%", arg))
        .collect::<Result<Vec<_>, _>>()?;
    checked_divide(&numbers, IntegerType::checked_rem, "remainder").map(Value::Integer)
}

//
// Comparison
//

fn compare(op: &str, a: &Value, b: &Value) -> Result<Option<Ordering>, Error> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Some(x.cmp(y))),
        (Value::Float(x), Value::Float(y)) => Ok(x.partial_cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        _ => Err(Error::TypeError(format!(
            "'{op}' cannot compare {a} ({}) with {b} ({})",
            a.type_name(),
            b.type_name()
        ))),
    }
}

// Comparisons chain: every adjacent pair must satisfy the relation
macro_rules! comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: &[Value]) -> Result<Value, Error> {
            if args.len() < 2 {
                return Err(Error::arity_error(Arity::AtLeast(2), args.len()));
            }
            for pair in args.windows(2) {
                let holds = compare($op_str, &pair[0], &pair[1])?
                    .is_some_and(|ordering| ordering $op Ordering::Equal);
                if !holds {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
    };
}

comparison!(builtin_eq, ==, "=");
comparison!(builtin_lt, <, "<");
comparison!(builtin_le, <=, "<=");
comparison!(builtin_gt, >, ">");
comparison!(builtin_ge, >=, ">=");

//
// Lists
//

fn builtin_identity(args: &[Value]) -> Result<Value, Error> {
    let [value] = exactly::<1>(args)?;
    Ok(value.clone())
}

fn builtin_car(args: &[Value]) -> Result<Value, Error> {
    let [pair] = exactly::<1>(args)?;
    pair.head().cloned()
}

fn builtin_cdr(args: &[Value]) -> Result<Value, Error> {
    let [pair] = exactly::<1>(args)?;
    pair.tail().cloned()
}

fn builtin_cons(args: &[Value]) -> Result<Value, Error> {
    let [head, tail] = exactly::<2>(args)?;
    Ok(Value::cons(head.clone(), tail.clone()))
}

fn builtin_list(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::list(args.to_vec()))
}

fn builtin_null(args: &[Value]) -> Result<Value, Error> {
    let [value] = exactly::<1>(args)?;
    Ok(Value::Bool(value.is_nil()))
}

//
// Strings
//

fn builtin_int(args: &[Value]) -> Result<Value, Error> {
    let [value] = exactly::<1>(args)?;
    match value {
        Value::Integer(n) => Ok(Value::Integer(*n)),
        Value::String(s) => s.trim().parse().map(Value::Integer).map_err(|_| {
            Error::EvalError(format!("'int' cannot parse \"{s}\" as an integer"))
        }),
        other => Err(Error::TypeError(format!(
            "'int' expects a string or integer, got {other} ({})",
            other.type_name()
        ))),
    }
}

fn builtin_str(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(args.iter().map(Value::display_text).collect()))
}

fn builtin_string_to_list(args: &[Value]) -> Result<Value, Error> {
    let [value] = exactly::<1>(args)?;
    let s = expect_string("string->list", value)?;
    Ok(Value::list(
        s.chars().map(|c| Value::String(c.to_string())).collect(),
    ))
}

//
// I/O
//

fn read_stdin_line() -> Result<Option<String>, Error> {
    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| Error::EvalError(format!("read-line failed: {e}")))?;
    if read == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

fn builtin_read_line(args: &[Value]) -> Result<Value, Error> {
    exactly::<0>(args)?;
    Ok(read_stdin_line()?.map_or(Value::Nil, Value::String))
}

fn builtin_read_ints(args: &[Value]) -> Result<Value, Error> {
    exactly::<0>(args)?;
    let Some(line) = read_stdin_line()? else {
        return Ok(Value::Nil);
    };
    let numbers = line
        .split_whitespace()
        .map(|word| {
            word.parse::<IntegerType>()
                .map(Value::Integer)
                .map_err(|_| Error::EvalError(format!("'read-ints' found non-integer \"{word}\"")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::list(numbers))
}

fn builtin_print(args: &[Value]) -> Result<Value, Error> {
    let line: Vec<String> = args.iter().map(Value::display_text).collect();
    writeln!(std::io::stdout().lock(), "{}", line.join(" "))
        .map_err(|e| Error::EvalError(format!("print failed: {e}")))?;
    Ok(Value::Nil)
}

fn builtin_exit(args: &[Value]) -> Result<Value, Error> {
    let code = match args {
        [] => 0,
        [code] => {
            let code = expect_integer("exit", code)?;
            i32::try_from(code)
                .map_err(|_| Error::EvalError(format!("'exit' status out of range: {code}")))?
        }
        _ => return Err(Error::arity_error(Arity::Range(0, 1), args.len())),
    };
    Err(Error::Exit(code))
}

//
// Vectors
//

fn builtin_make_vector(args: &[Value]) -> Result<Value, Error> {
    let [size] = exactly::<1>(args)?;
    let size = expect_integer("make-vector", size)?;
    let size = usize::try_from(size)
        .map_err(|_| Error::EvalError(format!("'make-vector' size must be non-negative, got {size}")))?;
    Ok(Value::vector(vec![Value::Nil; size]))
}

fn builtin_vec(args: &[Value]) -> Result<Value, Error> {
    let [source] = exactly::<1>(args)?;
    match source {
        Value::Vector(items) => Ok(Value::vector(items.borrow().clone())),
        list => Ok(Value::vector(list.to_vec()?)),
    }
}

/// `(~ v i)` reads element `i`, `(~ v i x)` stores `x` there
fn builtin_vector_access(args: &[Value]) -> Result<Value, Error> {
    let (vector, index, new_value) = match args {
        [vector, index] => (vector, index, None),
        [vector, index, value] => (vector, index, Some(value)),
        _ => return Err(Error::arity_error(Arity::Range(2, 3), args.len())),
    };
    let Value::Vector(items) = vector else {
        return Err(Error::TypeError(format!(
            "'~' expects a vector, got {vector} ({})",
            vector.type_name()
        )));
    };
    let index = expect_integer("~", index)?;
    let len = items.borrow().len();
    let slot = usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(Error::IndexOutOfBounds { index, len })?;

    match new_value {
        Some(value) => {
            items.borrow_mut()[slot] = value.clone();
            Ok(Value::Nil)
        }
        None => Ok(items.borrow()[slot].clone()),
    }
}

//
// Self tail calls
//

fn builtin_recur(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::TailCall(Rc::from(args)))
}

/// Stand-in bound to a tail-recursive closure's own name while its body runs.
/// Calling it packages the arguments for the next loop iteration.
pub(crate) fn recur_marker() -> Value {
    Value::BuiltinFunction {
        id: "recur".to_owned(),
        func: builtin_recur,
        arity: Arity::Any,
    }
}

static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn function(id: &'static str, func: BuiltinFn, arity: Arity) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::Function(func),
            arity,
        }
    }

    fn special_form(id: &'static str, form: SpecialFormFn, arity: Arity) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(form),
            arity,
        }
    }

    vec![
        // Arithmetic
        function("+", builtin_add, Arity::Any),
        function("-", builtin_sub, Arity::AtLeast(1)),
        function("*", builtin_mul, Arity::AtLeast(1)),
        function("/", builtin_div, Arity::AtLeast(2)),
        function("%", builtin_rem, Arity::AtLeast(2)),
        // Comparison
        function("=", builtin_eq, Arity::AtLeast(2)),
        function("<", builtin_lt, Arity::AtLeast(2)),
        function("<=", builtin_le, Arity::AtLeast(2)),
        function(">", builtin_gt, Arity::AtLeast(2)),
        function(">=", builtin_ge, Arity::AtLeast(2)),
        // Lists
        function("identity", builtin_identity, Arity::Exact(1)),
        function("car", builtin_car, Arity::Exact(1)),
        function("cdr", builtin_cdr, Arity::Exact(1)),
        function("cons", builtin_cons, Arity::Exact(2)),
        function("list", builtin_list, Arity::Any),
        function("null?", builtin_null, Arity::Exact(1)),
        // Strings
        function("int", builtin_int, Arity::Exact(1)),
        function("str", builtin_str, Arity::Any),
        function("string->list", builtin_string_to_list, Arity::Exact(1)),
        // I/O
        function("read-line", builtin_read_line, Arity::Exact(0)),
        function("read-ints", builtin_read_ints, Arity::Exact(0)),
        function("print", builtin_print, Arity::Any),
        function("exit", builtin_exit, Arity::Range(0, 1)),
        // Vectors
        function("make-vector", builtin_make_vector, Arity::Exact(1)),
        function("vec", builtin_vec, Arity::Exact(1)),
        function("~", builtin_vector_access, Arity::Range(2, 3)),
        // Special forms
        special_form("lambda", eval_lambda, Arity::Exact(2)),
        special_form("define", eval_define, Arity::Exact(2)),
        special_form("let", eval_let, Arity::Exact(2)),
        special_form("letrec", eval_letrec, Arity::Exact(2)),
        special_form("if", eval_if, Arity::Range(2, 3)),
        special_form("cond", eval_cond, Arity::Any),
    ]
});

static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Every registered operation, in declaration order
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}
