//! Lexical environments as reference-counted frames.
//!
//! Each frame maps symbols to values and holds its enclosing frame. The active scope
//! is the chain starting at `current`; closures hold the frame they were created in,
//! so later mutation of a shared frame (a `letrec` patching a self-reference, a tail
//! loop overwriting its arguments, a global `define`) is seen by every closure holding
//! it. A frame is freed as soon as neither the active chain nor any closure refers to
//! it, so plain recursion and loops that build closures keep memory bounded.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::{BuiltinFn, Value};
use crate::builtinops::Arity;

struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<FrameRef>,
    /// Count of live frames, shared by every frame of one environment
    live: Rc<Cell<usize>>,
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

/// Shared handle to one frame. Handles compare equal when they name the same frame.
#[derive(Clone)]
pub struct FrameRef(Rc<Frame>);

impl PartialEq for FrameRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for FrameRef {}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameRef({:p})", Rc::as_ptr(&self.0))
    }
}

/// Environment for variable bindings
pub struct Environment {
    current: FrameRef,
    /// Primitives and special forms, consulted after every lexical frame
    globals: HashMap<String, Value>,
    live: Rc<Cell<usize>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("depth", &self.depth())
            .field("live_frames", &self.live_frames())
            .field("globals", &self.globals.len())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An environment with one empty top-level frame and no globals.
    /// Use [`crate::evaluator::create_global_env`] for one with the primitive library.
    pub fn new() -> Self {
        let live = Rc::new(Cell::new(0));
        Environment {
            current: new_frame(None, HashMap::new(), &live),
            globals: HashMap::new(),
            live,
        }
    }

    /// The innermost frame of the active scope
    pub fn current_frame(&self) -> FrameRef {
        self.current.clone()
    }

    /// Number of frames in the active scope chain (its lexical nesting depth)
    pub fn depth(&self) -> usize {
        self.chain().count()
    }

    /// Number of frames still alive, including those kept by closures
    pub fn live_frames(&self) -> usize {
        self.live.get()
    }

    fn chain(&self) -> impl Iterator<Item = &FrameRef> + '_ {
        std::iter::successors(Some(&self.current), |frame| frame.0.parent.as_ref())
    }

    /// Push one frame binding `symbols` to `values` by position. Extra symbols or
    /// extra values beyond the shorter of the two are ignored.
    pub fn extend(&mut self, symbols: &[String], values: Vec<Value>) -> FrameRef {
        let bindings = symbols.iter().cloned().zip(values).collect();
        self.current = new_frame(Some(self.current.clone()), bindings, &self.live);
        tracing::trace!(depth = self.depth(), live = self.live_frames(), "push frame");
        self.current.clone()
    }

    /// Discard the innermost frame of the active scope. The top-level frame stays.
    pub fn pop(&mut self) {
        if let Some(parent) = self.current.0.parent.clone() {
            self.current = parent;
            tracing::trace!(live = self.live_frames(), "pop frame");
        }
    }

    /// Make `scope` the active chain, returning the previous one for [`Self::leave`]
    pub(crate) fn enter(&mut self, scope: FrameRef) -> FrameRef {
        std::mem::replace(&mut self.current, scope)
    }

    pub(crate) fn leave(&mut self, previous: FrameRef) {
        self.current = previous;
    }

    /// Look a symbol up innermost-first, then in the global table
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        for frame in self.chain() {
            if let Some(value) = frame.0.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnboundVariable(name.to_owned()))
    }

    /// Innermost frame of the active chain that binds `name`
    pub fn frame_index_of(&self, name: &str) -> Option<FrameRef> {
        self.chain()
            .find(|frame| frame.0.bindings.borrow().contains_key(name))
            .cloned()
    }

    /// Write or overwrite a binding in a specific frame
    pub fn set_in_frame(&mut self, frame: &FrameRef, name: &str, value: Value) {
        let previous = frame.0.bindings.borrow_mut().insert(name.to_owned(), value);
        // Released after the borrow ends; it may free other frames
        drop(previous);
    }

    /// Bind `name` in the innermost frame
    pub fn define(&mut self, name: &str, value: Value) {
        let frame = self.current.clone();
        self.set_in_frame(&frame, name, value);
    }

    /// Bind `name` in the global table, below every lexical frame
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_owned(), value);
    }

    /// Register a custom builtin function callable from evaluated expressions.
    ///
    /// # Example
    /// ```
    /// use conslisp::evaluator::create_global_env;
    /// use conslisp::ast::Value;
    /// use conslisp::Error;
    ///
    /// fn answer(_args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Integer(42))
    /// }
    ///
    /// let mut env = create_global_env();
    /// env.register_builtin_function("answer", answer);
    /// assert_eq!(conslisp::eval_source("(answer)", &mut env), Ok(Value::Integer(42)));
    /// ```
    pub fn register_builtin_function(&mut self, name: &str, func: BuiltinFn) {
        self.define_global(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func,
                arity: Arity::Any,
            },
        );
    }

    /// Every binding visible from the active scope, sorted by name.
    /// Inner bindings shadow outer ones, lexical frames shadow globals.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings: HashMap<String, Value> = self.globals.clone();

        let frames: Vec<&FrameRef> = self.chain().collect();
        for frame in frames.into_iter().rev() {
            for (name, value) in frame.0.bindings.borrow().iter() {
                bindings.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<(String, Value)> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

fn new_frame(
    parent: Option<FrameRef>,
    bindings: HashMap<String, Value>,
    live: &Rc<Cell<usize>>,
) -> FrameRef {
    live.set(live.get() + 1);
    FrameRef(Rc::new(Frame {
        bindings: RefCell::new(bindings),
        parent,
        live: Rc::clone(live),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::val;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_lookup_innermost_first_then_globals() {
        let mut env = Environment::new();
        env.define_global("g", val(0));
        env.define("x", val(1));
        env.extend(&names(&["x", "y"]), vec![val(2), val(3)]);

        assert_eq!(env.lookup("x"), Ok(val(2)));
        assert_eq!(env.lookup("y"), Ok(val(3)));
        assert_eq!(env.lookup("g"), Ok(val(0)));
        assert_eq!(
            env.lookup("missing"),
            Err(Error::UnboundVariable("missing".to_owned()))
        );

        env.pop();
        assert_eq!(env.lookup("x"), Ok(val(1)));
        assert!(env.lookup("y").is_err());
    }

    #[test]
    fn test_extend_pairs_by_position_shorter_wins() {
        let mut env = Environment::new();
        env.extend(&names(&["a", "b", "c"]), vec![val(1), val(2)]);
        assert_eq!(env.lookup("b"), Ok(val(2)));
        assert!(env.lookup("c").is_err());
        env.pop();

        env.extend(&names(&["a"]), vec![val(1), val(2), val(3)]);
        assert_eq!(env.lookup("a"), Ok(val(1)));
    }

    #[test]
    fn test_depth_tracks_push_and_pop() {
        let mut env = Environment::new();
        assert_eq!(env.depth(), 1);
        env.extend(&[], vec![]);
        env.extend(&[], vec![]);
        assert_eq!(env.depth(), 3);
        env.pop();
        env.pop();
        assert_eq!(env.depth(), 1);
        // The top-level frame is never popped
        env.pop();
        assert_eq!(env.depth(), 1);
        assert_eq!(env.live_frames(), 1);
    }

    #[test]
    fn test_frame_index_and_set_in_frame() {
        let mut env = Environment::new();
        let outer = env.extend(&names(&["n"]), vec![val(1)]);
        let inner = env.extend(&names(&["m"]), vec![val(2)]);

        assert_eq!(env.frame_index_of("n"), Some(outer.clone()));
        assert_eq!(env.frame_index_of("m"), Some(inner));
        assert_eq!(env.frame_index_of("nope"), None);

        env.set_in_frame(&outer, "n", val(10));
        assert_eq!(env.lookup("n"), Ok(val(10)));
    }

    #[test]
    fn test_held_frames_survive_pop() {
        let mut env = Environment::new();
        let scope = env.extend(&names(&["x"]), vec![val(7)]);
        env.pop();
        assert_eq!(env.live_frames(), 2);

        let caller = env.enter(scope);
        assert_eq!(env.lookup("x"), Ok(val(7)));
        env.leave(caller);
        assert!(env.lookup("x").is_err());

        // Leaving released the last handle
        assert_eq!(env.live_frames(), 1);
    }

    #[test]
    fn test_popped_frames_are_reclaimed() {
        let mut env = Environment::new();
        let kept = env.extend(&names(&["k"]), vec![val(0)]);
        for _ in 0..1000 {
            env.extend(&names(&["i"]), vec![val(0)]);
            env.pop();
        }
        env.pop();
        assert_eq!(env.live_frames(), 2);
        drop(kept);
        assert_eq!(env.live_frames(), 1);
    }

    #[test]
    fn test_get_all_bindings_shadowing() {
        let mut env = Environment::new();
        env.define_global("x", val(0));
        env.define("y", val(1));
        env.extend(&names(&["x"]), vec![val(2)]);

        let bindings = env.get_all_bindings();
        assert_eq!(
            bindings,
            vec![("x".to_owned(), val(2)), ("y".to_owned(), val(1))]
        );
    }
}
