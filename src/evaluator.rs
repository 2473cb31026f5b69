use std::rc::Rc;

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Closure, Value};
use crate::builtinops::{Arity, get_builtin_ops, recur_marker};

mod environment;
mod tailcall;

pub use environment::{Environment, FrameRef};

/// Evaluate an S-expression (public API)
pub fn eval(expr: &Value, env: &mut Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Evaluate a sequence of top-level expressions in order, returning the last value
/// (null for an empty program)
pub fn eval_program(program: &[Value], env: &mut Environment) -> Result<Value, Error> {
    tracing::debug!(expressions = program.len(), "evaluating program");
    program
        .iter()
        .try_fold(Value::Nil, |_, expr| eval(expr, env))
}

/// Evaluate every element of a list, preserving its shape. A non-pair is evaluated
/// as a single value.
pub fn eval_list(list: &Value, env: &mut Environment) -> Result<Value, Error> {
    eval_list_with_depth(list, env, 0)
}

/// Remaining host stack below which evaluation switches to a fresh segment
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each additional stack segment
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Evaluate an S-expression with depth tracking. `depth` counts the closure
/// applications in progress; nested sub-expressions share their caller's depth.
fn eval_with_depth_tracking(
    expr: &Value,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }
    match expr {
        Value::Symbol(name) => env.lookup(name),
        Value::Pair(pair) => stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            eval_pair(expr, &pair.head, &pair.tail, env, depth).map_err(|err| add_context(err, expr))
        }),
        // Everything else, including null, vectors and functions, is self-evaluating
        _ => Ok(expr.clone()),
    }
}

/// Helper function to add expression context to errors. Only the innermost
/// compound expression is reported.
fn add_context(error: Error, expr: &Value) -> Error {
    const MARKER: &str = "\n  Context: ";
    match error {
        Error::EvalError(msg) if !msg.contains(MARKER) => {
            Error::EvalError(format!("{msg}{MARKER}while evaluating: {expr}"))
        }
        Error::TypeError(msg) if !msg.contains(MARKER) => {
            Error::TypeError(format!("{msg}{MARKER}while evaluating: {expr}"))
        }
        // Parse errors, unbound variables, arity and index errors carry their own context
        other => other,
    }
}

/// Helper function to evaluate a list of argument expressions with depth tracking
fn eval_args(args: &Value, env: &mut Environment, depth: usize) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg?, env, depth))
        .collect()
}

fn eval_list_with_depth(list: &Value, env: &mut Environment, depth: usize) -> Result<Value, Error> {
    let mut items = Vec::new();
    let mut rest = list;
    while let Value::Pair(pair) = rest {
        items.push(eval_with_depth_tracking(&pair.head, env, depth)?);
        rest = &pair.tail;
    }
    let tail = eval_with_depth_tracking(rest, env, depth)?;
    Ok(Value::list_with_tail(items, tail))
}

/// Evaluate a pair: dispatch on what its head evaluates to
fn eval_pair(
    expr: &Value,
    head: &Value,
    rest: &Value,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let func = eval_with_depth_tracking(head, env, depth)?;

    match func {
        Value::BuiltinFunction { func, arity, .. } => {
            let args = eval_args(rest, env, depth)?;
            arity.validate(args.len())?;
            func(&args)
        }
        Value::Closure(closure) => {
            let args = eval_args(rest, env, depth)?;
            if args.len() != closure.params.len() {
                return Err(Error::arity_error_with_expr(
                    Arity::Exact(closure.params.len()),
                    args.len(),
                    expr.to_string(),
                ));
            }
            apply_closure(&closure, args, env, depth)
        }
        Value::SpecialForm { form, .. } => {
            let operands = rest.to_vec()?;
            form(&operands, env, depth)
        }
        // Any other head makes the pair compound data: evaluate its elements in place
        data => {
            let tail = eval_list_with_depth(rest, env, depth)?;
            Ok(Value::cons(data, tail))
        }
    }
}

/// Run a closure body in a new frame on top of the closure's captured scope.
/// The caller's scope is restored on every exit path.
fn apply_closure(
    closure: &Rc<Closure>,
    args: Vec<Value>,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let caller = env.enter(closure.scope.clone());
    let looping = closure.is_tail_recursive() && names_itself(closure, env);
    env.extend(&closure.params, args);

    let result = if looping {
        run_tail_loop(closure, env, depth + 1)
    } else {
        eval_with_depth_tracking(&closure.body, env, depth + 1)
    };

    env.pop();
    env.leave(caller);
    result
}

/// Whether the closure's name, resolved from its own scope, still denotes this
/// closure. Otherwise the name's calls in the body go to some other binding and
/// must not be turned into loop iterations.
fn names_itself(closure: &Rc<Closure>, env: &Environment) -> bool {
    closure.name().is_some_and(|name| {
        matches!(env.lookup(name), Ok(Value::Closure(bound)) if Rc::ptr_eq(&bound, closure))
    })
}

/// Evaluate a tail-recursive body repeatedly. Self-calls resolve to the loop marker,
/// whose result carries the next arguments; they overwrite the parameters in place.
fn run_tail_loop(
    closure: &Closure,
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let call_frame = env.current_frame();
    if let Some(name) = closure.name() {
        env.set_in_frame(&call_frame, name, recur_marker());
    }

    let mut iterations = 0usize;
    loop {
        let args = match eval_with_depth_tracking(&closure.body, env, depth)? {
            Value::TailCall(args) => args,
            value => return Ok(value),
        };
        if args.len() != closure.params.len() {
            return Err(Error::arity_error(
                Arity::Exact(closure.params.len()),
                args.len(),
            ));
        }
        for (param, arg) in closure.params.iter().zip(args.iter()) {
            let frame = env
                .frame_index_of(param)
                .unwrap_or_else(|| call_frame.clone());
            env.set_in_frame(&frame, param, arg.clone());
        }
        iterations += 1;
        tracing::trace!(name = closure.name(), iterations, "tail call");
    }
}

/// Name a freshly bound closure and decide its calling convention
fn name_closure(name: &str, value: &Value) {
    if let Value::Closure(closure) = value {
        closure.assign_name(name, |closure| tailcall::is_tail_recursive(name, closure));
    }
}

fn parse_params(params: &Value) -> Result<Vec<String>, Error> {
    if !matches!(params, Value::Nil | Value::Pair(_)) {
        return Err(Error::TypeError(format!(
            "Lambda parameters must be a list, got {params}"
        )));
    }
    let mut names: Vec<String> = Vec::new();
    for param in params.iter() {
        match param? {
            Value::Symbol(name) => {
                if names.contains(name) {
                    return Err(Error::EvalError(format!(
                        "Duplicate parameter name: {name}"
                    )));
                }
                names.push(name.clone());
            }
            other => {
                return Err(Error::TypeError(format!(
                    "Lambda parameters must be symbols, got {other}"
                )));
            }
        }
    }
    Ok(names)
}

fn make_closure(params: &Value, body: &Value, env: &mut Environment) -> Result<Value, Error> {
    let params = parse_params(params)?;
    let scope = env.current_frame();
    Ok(Value::Closure(Rc::new(Closure::new(params, body.clone(), scope))))
}

/// Split `((sym expr) ...)` into names and initializer expressions
fn parse_bindings(form: &str, bindings: &Value) -> Result<(Vec<String>, Vec<Value>), Error> {
    let malformed = || {
        Error::EvalError(format!(
            "{form}: bindings must be a list of (symbol expression) pairs, got {bindings}"
        ))
    };

    let mut names: Vec<String> = Vec::new();
    let mut inits = Vec::new();
    for binding in bindings.iter() {
        let binding = binding.map_err(|_| malformed())?;
        match binding.to_vec().as_deref() {
            Ok([Value::Symbol(name), init]) => {
                if names.contains(name) {
                    return Err(Error::EvalError(format!(
                        "{form}: duplicate binding name: {name}"
                    )));
                }
                names.push(name.clone());
                inits.push(init.clone());
            }
            _ => return Err(malformed()),
        }
    }
    Ok((names, inits))
}

/// Evaluate lambda special form
pub(crate) fn eval_lambda(
    args: &[Value],
    env: &mut Environment,
    _depth: usize,
) -> Result<Value, Error> {
    match args {
        [params, body] => make_closure(params, body, env),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

/// Evaluate define special form
pub(crate) fn eval_define(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let (name, value) = match args {
        // (define (name . params) body) is (define name (lambda params body))
        [Value::Pair(signature), body] => {
            let Value::Symbol(name) = &signature.head else {
                return Err(Error::TypeError(format!(
                    "define requires a symbol as the function name, got {}",
                    signature.head
                )));
            };
            (name, make_closure(&signature.tail, body, env)?)
        }
        [Value::Symbol(name), expr] => (name, eval_with_depth_tracking(expr, env, depth)?),
        [target, _] => {
            return Err(Error::TypeError(format!(
                "define requires a symbol or (name params...), got {target}"
            )));
        }
        _ => return Err(Error::arity_error(Arity::Exact(2), args.len())),
    };

    name_closure(name, &value);
    env.define(name, value);
    Ok(Value::Nil)
}

/// Evaluate let special form
pub(crate) fn eval_let(args: &[Value], env: &mut Environment, depth: usize) -> Result<Value, Error> {
    let [bindings, body] = args else {
        return Err(Error::arity_error(Arity::Exact(2), args.len()));
    };
    let (names, inits) = parse_bindings("let", bindings)?;

    // Initializers see the enclosing scope only
    let values = inits
        .iter()
        .map(|init| eval_with_depth_tracking(init, env, depth))
        .collect::<Result<Vec<_>, _>>()?;

    env.extend(&names, values);
    let result = eval_with_depth_tracking(body, env, depth);
    env.pop();
    result
}

/// Evaluate letrec special form
pub(crate) fn eval_letrec(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    let [bindings, body] = args else {
        return Err(Error::arity_error(Arity::Exact(2), args.len()));
    };
    let (names, inits) = parse_bindings("letrec", bindings)?;

    let frame = env.extend(&names, vec![Value::Nil; names.len()]);
    let result = bind_recursive(&names, &inits, &frame, env, depth)
        .and_then(|()| eval_with_depth_tracking(body, env, depth));
    env.pop();
    result
}

/// Evaluate letrec initializers inside the new frame, patching each placeholder
fn bind_recursive(
    names: &[String],
    inits: &[Value],
    frame: &FrameRef,
    env: &mut Environment,
    depth: usize,
) -> Result<(), Error> {
    for (name, init) in names.iter().zip(inits) {
        let value = eval_with_depth_tracking(init, env, depth)?;
        name_closure(name, &value);
        env.set_in_frame(frame, name, value);
    }
    Ok(())
}

/// Evaluate if special form
pub(crate) fn eval_if(args: &[Value], env: &mut Environment, depth: usize) -> Result<Value, Error> {
    match args {
        [test, consequent, alternative @ ..] if alternative.len() <= 1 => {
            if eval_with_depth_tracking(test, env, depth)?.is_truthy() {
                eval_with_depth_tracking(consequent, env, depth)
            } else {
                match alternative {
                    [alternative] => eval_with_depth_tracking(alternative, env, depth),
                    _ => Ok(Value::Nil),
                }
            }
        }
        _ => Err(Error::arity_error(Arity::Range(2, 3), args.len())),
    }
}

/// Evaluate cond special form
pub(crate) fn eval_cond(
    args: &[Value],
    env: &mut Environment,
    depth: usize,
) -> Result<Value, Error> {
    for clause in args {
        match clause.to_vec().as_deref() {
            Ok([test, consequent]) => {
                if eval_with_depth_tracking(test, env, depth)?.is_truthy() {
                    return eval_with_depth_tracking(consequent, env, depth);
                }
            }
            _ => {
                return Err(Error::EvalError(format!(
                    "cond clause must be (test expression), got {clause}"
                )));
            }
        }
    }
    Ok(Value::Nil)
}

/// Create a global environment with built-in functions and special forms
pub fn create_global_env() -> Environment {
    let mut env = Environment::new();

    for builtin_op in get_builtin_ops() {
        env.define_global(builtin_op.id, builtin_op.to_value());
    }
    // Catch-all test for cond
    env.define_global("else", Value::Bool(true));

    env
}
