//! Interactive shell and batch command runner for AGFS, a remote
//! plugin-based virtual file system.
//!
//! The crate is a small shell interpreter fused with a streaming HTTP
//! client: a lexer/parser for the Unix-like surface (pipes, redirections,
//! here-docs, `for`/`if`, globs, substitutions), an expander, a pipeline
//! runtime over a Process/stream contract, and a synchronous AGFS API
//! client everything resolves against. The `agfs` binary in `main.rs`
//! wires these into the REPL, script, and one-shot command modes.

pub mod client;
pub mod commands;
pub mod engine;
pub mod expand;
pub mod interrupt;
pub mod parser;
pub mod path;
pub mod repl;
pub mod stream;
