use conslisp::Error;
use conslisp::ParseErrorKind;
use conslisp::ast::Value;
use conslisp::builtinops::{OpKind, get_builtin_ops};
use conslisp::evaluator::{self, Environment};
use conslisp::scheme::{ParseConfig, parse_program_with_config};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::process;
use tracing_subscriber::EnvFilter;

const CONFIG: ParseConfig = ParseConfig {
    handle_comments: true,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut env = evaluator::create_global_env();

    // With a file argument, run it as a program instead of starting the prompt
    if let Some(path) = std::env::args().nth(1) {
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Could not read {path}: {e}");
                process::exit(1);
            }
        };
        let result = parse_program_with_config(&source, CONFIG)
            .and_then(|program| eval_each(&program, &mut env, |value| println!("{value}")));
        match result {
            Ok(()) => return,
            Err(Error::Exit(code)) => process::exit(code),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }

    run_repl(&mut env);
}

/// Evaluate top-level expressions in order, handing each non-null result to `emit`.
/// Stops at the first error.
fn eval_each(
    program: &[Value],
    env: &mut Environment,
    mut emit: impl FnMut(&Value),
) -> Result<(), Error> {
    tracing::debug!(expressions = program.len(), "evaluating input");
    for expr in program {
        match evaluator::eval(expr, env)? {
            Value::Nil => {}
            value => emit(&value),
        }
    }
    Ok(())
}

/// Input is incomplete when it ends inside an open list or string
fn needs_more_input(result: &Result<Vec<Value>, Error>) -> bool {
    matches!(
        result,
        Err(Error::ParseError(e))
            if matches!(e.kind, ParseErrorKind::UnclosedParen | ParseErrorKind::UnterminatedString)
    )
}

fn run_repl(env: &mut Environment) {
    println!("ConsLisp interpreter");
    println!("Enter S-expressions like: (define (sq x) (* x x)) (sq 12)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "conslisp> " } else { "      ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                buffer.push_str(&line);
                buffer.push('\n');

                let parsed = parse_program_with_config(&buffer, CONFIG);
                if needs_more_input(&parsed) {
                    continue;
                }
                let _ = rl.add_history_entry(buffer.trim_end());
                let source = std::mem::take(&mut buffer);

                match parsed.and_then(|program| eval_each(&program, env, |value| println!("{value}"))) {
                    Ok(()) => {}
                    Err(Error::Exit(code)) => process::exit(code),
                    Err(e) => {
                        println!("Error: {e}");
                        tracing::debug!(input = source.trim_end(), "evaluation failed");
                    }
                }
            }

            Err(ReadlineError::Interrupted) if !buffer.is_empty() => {
                // Abandon the unfinished expression
                buffer.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Input may span several lines; ';' starts a comment.");
    println!();

    let (forms, functions): (Vec<_>, Vec<_>) = get_builtin_ops()
        .iter()
        .partition(|op| matches!(op.op_kind, OpKind::SpecialForm(_)));

    println!("Special forms:");
    for op in forms {
        println!("  {:<12} {} operands", op.id, op.arity);
    }
    println!();
    println!("Primitives:");
    for op in functions {
        println!("  {:<12} {} arguments", op.id, op.arity);
    }
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    // Separate built-in operations from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } | Value::SpecialForm { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in operations ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if user_defined.is_empty() {
        println!("No user-defined values.");
    } else {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::unwrap_used)] // test code OK
    use super::*;
    use conslisp::ast::val;

    fn outputs(source: &str, env: &mut Environment) -> (Vec<String>, Result<(), Error>) {
        let program = parse_program_with_config(source, CONFIG).unwrap();
        let mut printed = Vec::new();
        let result = eval_each(&program, env, |value| printed.push(value.to_string()));
        (printed, result)
    }

    #[test]
    fn test_every_non_null_result_is_emitted() {
        let mut env = evaluator::create_global_env();
        let (printed, result) = outputs(
            "(define x 2) ; comment\n(+ x 1) (list) (* x 10) \"s\"",
            &mut env,
        );
        assert_eq!(result, Ok(()));
        assert_eq!(printed, vec!["3", "20", "\"s\""]);
        assert_eq!(env.lookup("x"), Ok(val(2)));
    }

    #[test]
    fn test_output_stops_at_first_error() {
        let mut env = evaluator::create_global_env();
        let (printed, result) = outputs("1 (car 5) 2", &mut env);
        assert_eq!(printed, vec!["1"]);
        assert!(result.is_err());

        let (printed, result) = outputs("7 (exit 4) 8", &mut env);
        assert_eq!(printed, vec!["7"]);
        assert_eq!(result, Err(Error::Exit(4)));
    }
}
