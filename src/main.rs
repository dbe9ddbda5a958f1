// Purpose: Provide the binary entry for the quill front-end CLI.
// Inputs/Outputs: Reads process args and returns a process exit code from the CLI dispatcher.
// Invariants: Main must not bypass centralized CLI argument/diagnostic handling.
// Gotchas: Keep behavior aligned with the library API so drivers and the CLI agree.

fn main() {
    let code = quill::cli::run_cli(std::env::args().skip(1));
    std::process::exit(code);
}
