//! Static check deciding whether a named closure can run its self-calls as a loop.
//!
//! A closure named `f` qualifies when its body calls `f` at least once and every
//! occurrence of `f` is the operator of a call in tail position. Tail positions are
//! the body itself, both branches of `if`, every `cond` consequent, and the body of
//! `let`/`letrec`. The loop convention overwrites the parameters of the running
//! call in place, so anything that could observe that frame later (a `lambda` or
//! `define` inside the body) or rebind `f` disqualifies the body as well.

use crate::ast::{Closure, Value};

/// How a name is used within an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelfReference {
    /// The name does not occur
    Absent,
    /// Every occurrence is a tail call
    TailCalls,
    /// Some occurrence cannot be turned into a loop iteration
    Unsafe,
}

impl SelfReference {
    fn combine(self, other: SelfReference) -> SelfReference {
        use SelfReference::*;
        match (self, other) {
            (Unsafe, _) | (_, Unsafe) => Unsafe,
            (TailCalls, _) | (_, TailCalls) => TailCalls,
            (Absent, Absent) => Absent,
        }
    }
}

/// Decide the calling convention for `closure` once it is bound to `name`
pub(crate) fn is_tail_recursive(name: &str, closure: &Closure) -> bool {
    if closure.params().iter().any(|param| param == name) {
        return false;
    }
    classify(name, closure.body()) == SelfReference::TailCalls
}

/// Classify the uses of `name` in `expr`, which sits in tail position
pub(crate) fn classify(name: &str, expr: &Value) -> SelfReference {
    let Value::Pair(pair) = expr else {
        // A bare reference hands the function out as a value
        return if expr.as_symbol() == Some(name) {
            SelfReference::Unsafe
        } else {
            SelfReference::Absent
        };
    };
    let Ok(operands) = pair.tail.to_vec() else {
        return operand_reference(name, expr);
    };

    match pair.head.as_symbol() {
        Some(head) if head == name => operands
            .iter()
            .fold(SelfReference::TailCalls, |acc, operand| {
                acc.combine(operand_reference(name, operand))
            }),
        Some("if") => match operands.as_slice() {
            [test, branches @ ..] if branches.len() <= 2 => branches
                .iter()
                .fold(operand_reference(name, test), |acc, branch| {
                    acc.combine(classify(name, branch))
                }),
            _ => operand_reference(name, expr),
        },
        Some("cond") => operands
            .iter()
            .fold(SelfReference::Absent, |acc, clause| {
                acc.combine(classify_cond_clause(name, clause))
            }),
        Some("let" | "letrec") => match operands.as_slice() {
            [bindings, body] => classify_let(name, bindings, body),
            _ => operand_reference(name, expr),
        },
        _ => operand_reference(name, expr),
    }
}

fn classify_cond_clause(name: &str, clause: &Value) -> SelfReference {
    match clause.to_vec().as_deref() {
        Ok([test, consequent]) => operand_reference(name, test).combine(classify(name, consequent)),
        _ => operand_reference(name, clause),
    }
}

fn classify_let(name: &str, bindings: &Value, body: &Value) -> SelfReference {
    let Ok(bindings) = bindings.to_vec() else {
        return operand_reference(name, bindings).combine(operand_reference(name, body));
    };

    let mut result = SelfReference::Absent;
    for binding in &bindings {
        match binding.to_vec().as_deref() {
            Ok([symbol, init]) => {
                // A binding that shadows the name hides later self-calls from the check
                if symbol.as_symbol() == Some(name) {
                    return SelfReference::Unsafe;
                }
                result = result.combine(operand_reference(name, init));
            }
            _ => result = result.combine(operand_reference(name, binding)),
        }
    }
    result.combine(classify(name, body))
}

/// An expression outside tail position: any use of the name, or any form that could
/// capture the running frame, rules the loop out
fn operand_reference(name: &str, expr: &Value) -> SelfReference {
    if mentions(name, expr) || mentions_any(expr, &["lambda", "define"]) {
        SelfReference::Unsafe
    } else {
        SelfReference::Absent
    }
}

fn mentions(name: &str, expr: &Value) -> bool {
    mentions_any(expr, &[name])
}

fn mentions_any(expr: &Value, names: &[&str]) -> bool {
    let mut pending = vec![expr];
    while let Some(value) = pending.pop() {
        match value {
            Value::Symbol(symbol) if names.contains(&symbol.as_str()) => return true,
            Value::Pair(pair) => {
                pending.push(&pair.head);
                pending.push(&pair.tail);
            }
            _ => {}
        }
    }
    false
}
