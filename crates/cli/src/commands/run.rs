use crate::commands::{resolve_input, Command};
use clap::Args;
use vmcloak_core::{run_bytecode_with_args, Value};

#[derive(Args)]
pub struct RunCmd {
    /// Emit per-instruction tracing and an execution summary
    #[arg(long)]
    pub debug: bool,

    /// Procedure argument, repeatable; e.g. --arg i32:7 --arg f64:1.5
    #[arg(long = "arg", value_parser = parse_value)]
    pub args: Vec<Value>,
}

impl Command for RunCmd {
    fn execute(&self, input: &str) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = resolve_input(input).map_err(|e| e.to_string())?;
        let result =
            run_bytecode_with_args(&bytes, &self.args, self.debug).map_err(|e| e.to_string())?;
        match result {
            Some(value) => println!("{value}"),
            None => println!("void"),
        }
        Ok(())
    }
}

/// Parses `tag:literal` argument values, e.g. `i32:-5`, `ptr:0x1000`.
fn parse_value(s: &str) -> Result<Value, String> {
    let (tag, literal) = s
        .split_once(':')
        .ok_or_else(|| format!("expected tag:value, got '{s}'"))?;
    let bad = |e: &dyn std::fmt::Display| format!("bad {tag} literal '{literal}': {e}");
    Ok(match tag {
        "undef" => Value::Undef,
        "i1" => Value::I1(literal != "0"),
        "i8" => Value::I8(literal.parse().map_err(|e| bad(&e))?),
        "i16" => Value::I16(literal.parse().map_err(|e| bad(&e))?),
        "i32" => Value::I32(literal.parse().map_err(|e| bad(&e))?),
        "i64" => Value::I64(literal.parse().map_err(|e| bad(&e))?),
        "f32" => Value::F32(literal.parse().map_err(|e| bad(&e))?),
        "f64" => Value::F64(literal.parse().map_err(|e| bad(&e))?),
        "ptr" => {
            let clean = literal.strip_prefix("0x").unwrap_or(literal);
            Value::Ptr(u64::from_str_radix(clean, 16).map_err(|e| bad(&e))?)
        }
        other => return Err(format!("unknown value tag '{other}'")),
    })
}
