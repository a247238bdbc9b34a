use crate::commands::{resolve_input, Command};
use clap::Args;
use vmcloak_core::decoder::decode;

#[derive(Args)]
pub struct DisasmCmd {}

impl Command for DisasmCmd {
    fn execute(&self, input: &str) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = resolve_input(input).map_err(|e| e.to_string())?;
        let program = decode(&bytes).map_err(|e| e.to_string())?;
        print!("{program}");
        Ok(())
    }
}
