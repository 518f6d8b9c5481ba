use clap::{Parser, Subcommand};
use lispkit::ast::{Symbol, Value};
use lispkit::scheme::parse;
use lispkit::{AssignPolicy, Environment, Error, Interpreter, InterpreterConfig};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lispkit")]
#[command(about = "A small Lisp runtime")]
struct Args {
    /// Reject `set!` on names that were never defined
    #[arg(long, env = "LISPKIT_STRICT_ASSIGN")]
    strict_assign: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a source file, waiting for every pending timer
    Run { file: PathBuf },
    /// Evaluate source text and print the last value
    Eval { source: String },
    /// Start an interactive session (the default)
    Repl,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LISPKIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = InterpreterConfig {
        assign_policy: if args.strict_assign {
            AssignPolicy::DeclareFirst
        } else {
            AssignPolicy::CreateGlobal
        },
    };
    let interp = Interpreter::new(config);

    let result = match args.command.unwrap_or(Command::Repl) {
        Command::Run { file } => match std::fs::read_to_string(&file) {
            Ok(source) => interp.run(&source).map(drop),
            Err(e) => {
                eprintln!("Cannot read {}: {e}", file.display());
                process::exit(2);
            }
        },
        Command::Eval { source } => interp.run(&source).map(print_value),
        Command::Repl => {
            run_repl(&interp);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_value(value: Value) {
    // define, display and friends have nothing to show
    if !matches!(value, Value::Unspecified) {
        println!("{value}");
    }
}

fn run_repl(interp: &Interpreter) {
    println!("lispkit interactive session");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            process::exit(1);
        }
    };

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "lispkit> " } else { "     ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(interp.environment());
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                // keep reading while the forms are still open
                if let Err(Error::Parse(e)) = parse(&pending)
                    && e.is_incomplete()
                {
                    continue;
                }

                let _ = rl.add_history_entry(pending.trim_end());
                match interp.run_each(&pending) {
                    Ok(results) => {
                        for result in results {
                            match result {
                                Ok(value) => print_value(value),
                                Err(e) => println!("Error: {e}"),
                            }
                        }
                    }
                    Err(e) => println!("Error: {e}"),
                }
                pending.clear();
            }
            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                pending.clear();
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
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
    println!("  Ctrl+C     - Discard an unfinished form");
    println!();
    println!("Timers fire in the background and are checked before each entry.");
    println!();
    println!("Examples:");
    println!("  (define (greet name #:punct (p \"!\")) (string-append \"hello, \" name p))");
    println!("  (greet \"world\" #:punct \"?\")");
    println!("  (define d (dict #:a (list 1 2)))  (set! (d #:a 0) 10)  d");
    println!("  (set-timeout display 100 \"later\")");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    let root = env.parent().unwrap_or(env);

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();
    for (name, value) in bindings {
        let sym = Symbol::new(&name);
        if matches!(value, Value::Callable(_)) && root.owns(&sym) && !env.owns(&sym) {
            builtins.push(name);
        } else {
            user_defined.push((name, value));
        }
    }

    if !builtins.is_empty() {
        println!("Built-in forms and functions ({}):", builtins.len());
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

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
