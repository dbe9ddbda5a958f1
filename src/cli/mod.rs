use std::io::Write;

use crate::frontend::{parser, print};

/// Parse a source file or module directory, printing diagnostics to stderr.
/// `--dump-ast` writes the parsed tree to stdout; `--stdlib <dir>` overrides
/// the default `./stdlib` search root.
pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut input = None;
    let mut stdlib = None;
    let mut dump = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdlib" => match args.next() {
                Some(dir) => stdlib = Some(dir),
                None => {
                    eprintln!("expected a directory after --stdlib");
                    return 1;
                }
            },
            "--dump-ast" => dump = true,
            _ if arg.starts_with('-') => {
                eprintln!("unknown argument: {}", arg);
                print_usage();
                return 1;
            }
            _ if input.is_some() => {
                eprintln!("unexpected extra argument: {}", arg);
                return 1;
            }
            _ => input = Some(arg),
        }
    }

    let input = match input {
        Some(input) => input,
        None => {
            print_usage();
            return 1;
        }
    };
    let stdlib = stdlib.unwrap_or_else(|| "stdlib".to_string());

    let stderr = std::io::stderr();
    let mut sink = stderr.lock();
    let (ok, program) = parser::parse(&input, &stdlib, &mut sink);
    let _ = sink.flush();

    if dump {
        print!("{}", print::dump(&program));
    }

    if ok {
        0
    } else {
        1
    }
}

fn print_usage() {
    eprintln!("usage: quill <path> [--stdlib <dir>] [--dump-ast]");
}
