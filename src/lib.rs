// Purpose: Define the crate-level module surface for the quill front end.
// Inputs/Outputs: Re-exports the frontend, path adapter, and CLI for the
// binary and for tests.
// Invariants: Public module boundaries should remain stable for internal callers.
// Gotchas: Keep module wiring consistent with the src/main.rs entry path.

pub mod cli;
pub mod frontend;
pub mod paths;
