//! End-to-end programs run through the public API.
#![cfg(feature = "scheme")]
#![expect(clippy::unwrap_used)] // test code OK

use conslisp::ast::{Value, nil, val};
use conslisp::evaluator::create_global_env;
use conslisp::scheme::parse_scheme;
use conslisp::{Error, ParseErrorKind, eval_source};

fn run(source: &str) -> Result<Value, Error> {
    let mut env = create_global_env();
    eval_source(source, &mut env)
}

/// Recursive programs need more host stack than the default test thread has
fn on_large_stack<F: FnOnce() + Send + 'static>(f: F) {
    std::thread::Builder::new()
        .stack_size(64 << 20)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn test_classic_programs() {
    on_large_stack(|| {
        let test_cases = vec![
            (
                "(define (fact n) (if (= n 1) 1 (* n (fact (- n 1)))))
                 (fact 5)",
                val(120),
            ),
            (
                "(define (fib n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))
                 (fib 20)",
                val(6765),
            ),
            (
                "(define (sum xs) (if (null? xs) 0 (+ (car xs) (sum (cdr xs)))))
                 (sum (list 1 2 3 4 5))",
                val(15),
            ),
            (
                "(define (adder k) (lambda (x) (+ x k)))
                 (define add5 (adder 5))
                 (add5 10)",
                val(15),
            ),
            (
                "(letrec ([ev (lambda (n) (if (= n 0) #t (od (- n 1))))]
                          [od (lambda (n) (if (= n 0) #f (ev (- n 1))))])
                   (list (ev 10) (od 7)))",
                val([true, true]),
            ),
            (
                "(define (classify n)
                   (cond [(< n 0) \"negative\"]
                         [(= n 0) \"zero\"]
                         [else \"positive\"]))
                 (list (classify -3) (classify 0) (classify 8))",
                val(["negative", "zero", "positive"]),
            ),
            (
                "(define (rev xs acc) (if (null? xs) acc (rev (cdr xs) (cons (car xs) acc))))
                 (rev (list 1 2 3) ())",
                val([3, 2, 1]),
            ),
            ("(let ([x 2] [y 3.5]) (list (* x x) (* y 2.0)))", val(vec![val(4), val(7.0)])),
            ("(str \"n=\" 42)", val("n=42")),
            ("(string->list \"abc\")", val(["a", "b", "c"])),
            ("(int \"-12\")", val(-12)),
            ("()", nil()),
            ("", nil()),
        ];

        for (i, (source, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(
                run(source),
                Ok(expected),
                "Program #{} failed:\n{source}",
                i + 1
            );
        }
    });
}

#[test]
fn test_tail_loop_runs_in_constant_depth() {
    let mut env = create_global_env();
    let result = eval_source(
        "(define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1))))
         (loop 100000 0)",
        &mut env,
    );
    assert_eq!(result, Ok(val(100_000)));
    assert_eq!(env.depth(), 1);

    let result = eval_source(
        "(define (count n)
           (cond [(= n 0) (finished)]
                 [else (count (- n 1))]))
         (define (finished) \"done\")
         (count 50000)",
        &mut env,
    );
    assert_eq!(result, Ok(val("done")));
}

#[test]
fn test_deep_non_tail_recursion_is_an_error() {
    on_large_stack(|| {
        let mut env = create_global_env();
        let result = eval_source(
            "(define (sum-to n) (if (= n 0) 0 (+ n (sum-to (- n 1)))))
             (sum-to 100000)",
            &mut env,
        );
        match result {
            Err(Error::EvalError(msg)) => assert!(msg.contains("depth"), "{msg}"),
            other => panic!("expected a depth error, got {other:?}"),
        }
        // The environment is usable again afterwards
        assert_eq!(env.depth(), 1);
        assert_eq!(eval_source("(sum-to 10)", &mut env), Ok(val(55)));
    });
}

#[test]
fn test_recursion_a_thousand_deep() {
    on_large_stack(|| {
        let result = run(
            "(define (count-up n) (if (= n 0) 0 (+ 1 (count-up (- n 1)))))
             (count-up 1000)",
        );
        assert_eq!(result, Ok(val(1000)));

        let result = run(
            "(define (build n) (if (= n 0) () (cons n (build (- n 1)))))
             (define (len xs) (if (null? xs) 0 (+ 1 (len (cdr xs)))))
             (len (build 2000))",
        );
        assert_eq!(result, Ok(val(2000)));
    });
}

#[test]
fn test_letrec_loop_runs_in_constant_depth() {
    assert_eq!(
        run("(letrec ([lp (lambda (n) (if (= n 0) 0 (lp (- n 1))))]) (lp 100000))"),
        Ok(val(0))
    );
}

#[test]
fn test_returned_closure_calls_its_captured_function() {
    let source = "(define (make g) (lambda (n) (if (= n 0) 0 (g (- n 1)))))
                  (define g (make (lambda (x) 42)))
                  (g 5)";
    assert_eq!(run(source), Ok(val(42)));
}

#[test]
fn test_closures_made_in_a_loop_are_released() {
    let mut env = create_global_env();
    let result = eval_source(
        "(define (mk n) (lambda () n))
         (define (spin i) (if (= i 0) 0 (let ([k (mk i)]) (spin (- i 1)))))
         (spin 100000)",
        &mut env,
    );
    assert_eq!(result, Ok(val(0)));
    assert_eq!(env.live_frames(), 1);
}

#[test]
fn test_deeply_nested_list_is_dropped() {
    // Nesting grows through the head of each pair
    let result = run(
        "(define (nest n acc) (if (= n 0) 0 (nest (- n 1) (list acc))))
         (nest 1000000 ())",
    );
    assert_eq!(result, Ok(val(0)));
}

#[test]
fn test_self_containing_vector_prints() {
    let mut env = create_global_env();
    let value = eval_source("(define v (make-vector 2)) (~ v 0 v) v", &mut env).unwrap();
    assert_eq!(value.to_string(), "#(#(...) ())");
    // Break the cycle so the vector is freed
    eval_source("(~ v 0 0)", &mut env).unwrap();
}

#[test]
fn test_vectors_are_shared() {
    let mut env = create_global_env();
    let source = "(define v (make-vector 3))
                  (define w v)
                  (~ w 0 42)
                  (define copy (vec v))
                  (~ copy 0 1)
                  (list (~ v 0) (~ copy 0) (~ v 2))";
    assert_eq!(
        eval_source(source, &mut env),
        Ok(val(vec![val(42), val(1), nil()]))
    );

    assert_eq!(
        eval_source("(~ v 3)", &mut env),
        Err(Error::IndexOutOfBounds { index: 3, len: 3 })
    );
}

#[test]
fn test_scoping_errors() {
    let mut env = create_global_env();
    assert_eq!(
        eval_source("(let ([x 1]) x) x", &mut env),
        Err(Error::UnboundVariable("x".to_owned()))
    );

    let result = eval_source("(define (f x) x) (f 1 2)", &mut env);
    assert!(matches!(result, Err(Error::ArityError { got: 2, .. })), "{result:?}");

    // The definition made before the failing call survives
    assert_eq!(eval_source("(f 7)", &mut env), Ok(val(7)));

    match eval_source("(/ 1 0)", &mut env) {
        Err(Error::EvalError(msg)) => assert!(msg.contains("Division by zero"), "{msg}"),
        other => panic!("expected division error, got {other:?}"),
    }
    assert_eq!(env.depth(), 1);
}

#[test]
fn test_car_of_cons_returns_first() {
    let mut env = create_global_env();
    for (a, b) in [("1", "2"), ("\"x\"", "()"), ("(list 1 2)", "#f")] {
        let source = format!("(car (cons {a} {b}))");
        let expected = eval_source(a, &mut env).unwrap();
        assert_eq!(eval_source(&source, &mut env), Ok(expected), "{source}");
    }
}

#[test]
fn test_printed_data_reads_back() {
    let mut env = create_global_env();
    let value = eval_source("(list 1 2.5 \"two words\" #t (list) (list 3))", &mut env).unwrap();
    let printed = value.to_string();
    assert_eq!(printed, "(1 2.5 \"two words\" #t () (3))");
    assert_eq!(parse_scheme(&printed).unwrap(), value);
}

#[test]
fn test_data_lists_evaluate_elementwise() {
    let mut env = create_global_env();
    assert_eq!(
        eval_source("(define x 5) (1 x (+ x 1))", &mut env),
        Ok(val([1, 5, 6]))
    );
    assert_eq!(
        eval_source("(\"a\" #t)", &mut env),
        Ok(val(vec![val("a"), val(true)]))
    );
    // A symbol head is looked up first; a data value there also builds a list
    assert_eq!(eval_source("(x 1)", &mut env), Ok(val([5, 1])));
}

#[test]
fn test_parse_errors_surface_unchanged() {
    let mut env = create_global_env();
    for (source, kind) in [
        ("(+ 1 2))", ParseErrorKind::UnexpectedCloseParen),
        ("(define (f x) (* x 2)", ParseErrorKind::UnclosedParen),
        ("(print \"oops)", ParseErrorKind::UnterminatedString),
    ] {
        match eval_source(source, &mut env) {
            Err(Error::ParseError(e)) => assert_eq!(e.kind, kind, "{source}"),
            other => panic!("expected parse error for {source}, got {other:?}"),
        }
    }
    // Nothing from a malformed program is evaluated
    assert!(eval_source("(define y 1) (", &mut env).is_err());
    assert_eq!(
        eval_source("y", &mut env),
        Err(Error::UnboundVariable("y".to_owned()))
    );
}

#[test]
fn test_exit_propagates_status() {
    assert_eq!(run("(exit 3) (print \"unreachable\")"), Err(Error::Exit(3)));
    assert_eq!(run("(exit)"), Err(Error::Exit(0)));
}
