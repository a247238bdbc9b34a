pub mod disasm;
pub mod run;

use clap::Subcommand;
use vmcloak_core::decoder::input_to_bytes;
use vmcloak_core::DecodeError;

/// Trait implemented by every subcommand.
pub trait Command {
    fn execute(&self, input: &str) -> Result<(), Box<dyn std::error::Error>>;
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Execute the bytecode in the interpreter and print the return value
    Run(run::RunCmd),
    /// Print the decoded instruction listing
    Disasm(disasm::DisasmCmd),
}

impl Command for Cmd {
    fn execute(&self, input: &str) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Cmd::Run(cmd) => cmd.execute(input),
            Cmd::Disasm(cmd) => cmd.execute(input),
        }
    }
}

/// Resolves the shared input convention: `@path` reads a file, anything else
/// is parsed as hex.
pub fn resolve_input(input: &str) -> Result<Vec<u8>, DecodeError> {
    match input.strip_prefix('@') {
        Some(path) => input_to_bytes(path, true),
        None => input_to_bytes(input, false),
    }
}
