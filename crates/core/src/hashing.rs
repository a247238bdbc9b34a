//! Stable 64-bit identifiers for symbols and basic blocks.
//!
//! Labels and call targets travel through the bytecode as 64-bit hashes. The
//! identifiers must be reproducible from the procedure name and block
//! position so that a disassembly stays debuggable across runs.

use tiny_keccak::{Hasher, Keccak};

/// Keccak-256 of `name`, truncated to the first 8 bytes, little-endian.
pub fn symbol_hash(name: &str) -> u64 {
    let mut keccak = Keccak::v256();
    keccak.update(name.as_bytes());
    let mut digest = [0u8; 32];
    keccak.finalize(&mut digest);
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

/// Label hash for basic block `index` of `procedure`.
pub fn block_label_hash(procedure: &str, index: usize) -> u64 {
    symbol_hash(&format!("{procedure}::bb{index}"))
}
