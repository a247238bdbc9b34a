//! The register table.
//!
//! Registers are write-then-read scratch slots the encoder uses to carry SSA
//! values across jumps. Realistic procedures use at most a few hundred, so a
//! dense slot vector with a parallel in-use flag vector beats a hash map:
//! clearing is an in-place flag flip and cleared slots can be rewritten.

use crate::value::Value;

#[derive(Debug, Default)]
pub struct RegisterFile {
    slots: Vec<Value>,
    live: Vec<bool>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, reg: u32, value: Value) {
        let idx = reg as usize;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, Value::Undef);
            self.live.resize(idx + 1, false);
        }
        self.slots[idx] = value;
        self.live[idx] = true;
    }

    /// Reads register `reg`; `None` if it was never written or cleared since
    /// the last write.
    pub fn get(&self, reg: u32) -> Option<Value> {
        let idx = reg as usize;
        if *self.live.get(idx)? {
            Some(self.slots[idx])
        } else {
            None
        }
    }

    pub fn clear(&mut self, reg: u32) {
        if let Some(flag) = self.live.get_mut(reg as usize) {
            *flag = false;
        }
    }
}
