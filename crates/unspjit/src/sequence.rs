use std::ops::Deref;

use unsp::{Ins, IsaVersion, disasm};

/// A translated instruction: its address, its opcode and the extension word, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    pub lpc: u32,
    pub ins: Ins,
    pub ext: Option<u16>,
}

impl Entry {
    /// Number of words this instruction occupies.
    pub fn len(&self) -> u32 {
        1 + self.ext.is_some() as u32
    }
}

/// A sequence of µ'nSP instructions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Sequence(pub Vec<Entry>);

impl Sequence {
    /// Number of words covered by the sequence.
    pub fn words(&self) -> u32 {
        self.0.iter().map(Entry::len).sum()
    }
}

impl Deref for Sequence {
    type Target = [Entry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.0 {
            // translated code never covers ISA 2.0 only instructions
            let ext = entry.ext.unwrap_or_default();
            let text = disasm::disassemble(entry.ins, entry.lpc, IsaVersion::V11, |_| ext);
            writeln!(f, "{:06X}: {text}", entry.lpc)?;
        }

        Ok(())
    }
}
