//! Entry point for the vmcloak CLI.
//!
//! Parses command-line arguments and dispatches to subcommands for running
//! or disassembling VM bytecode. Initializes logging and handles the main
//! execution flow.
use clap::Parser;
use vmcloak_cli::commands::{Cmd, Command};

/// Command-line interface for vmcloak.
///
/// vmcloak is an IR virtualization obfuscator; this front-end operates on
/// the bytecode side: execute a byte stream in the interpreter or print its
/// decoded listing.
#[derive(Parser)]
#[command(name = "vmcloak")]
#[command(about = "vmcloak: VM bytecode runner and disassembler")]
struct Cli {
    /// Input bytecode as a hex string (0x...) or file path prefixed with @
    input: String,

    #[command(subcommand)]
    command: Cmd,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    cli.command.execute(&cli.input)
}
