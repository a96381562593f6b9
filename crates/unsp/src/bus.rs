//! The memory interface seen by the core.

use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;
use zerocopy::byteorder::{BigEndian, LittleEndian, U16};

use crate::regs::LPC_MASK;

/// Byte order of a program image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A word-addressed memory bus. Addresses are 22-bit.
pub trait Bus {
    fn read16(&mut self, addr: u32) -> u16;
    fn write16(&mut self, addr: u32, value: u16);
}

impl<B: Bus + ?Sized> Bus for &mut B {
    #[inline(always)]
    fn read16(&mut self, addr: u32) -> u16 {
        (**self).read16(addr)
    }

    #[inline(always)]
    fn write16(&mut self, addr: u32, value: u16) {
        (**self).write16(addr, value)
    }
}

/// Number of words in the full 22-bit address space.
pub const SPACE_LEN: usize = 1 << 22;

/// A flat RAM covering the whole address space.
pub struct Ram {
    words: Box<[u16]>,
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

impl Ram {
    pub fn new() -> Self {
        Self {
            words: vec![0; SPACE_LEN].into_boxed_slice(),
        }
    }

    /// Copies `data` into memory starting at word address `base`, wrapping at the end of the
    /// address space.
    pub fn load(&mut self, base: u32, data: &[u16]) {
        for (offset, word) in data.iter().enumerate() {
            let addr = (base as usize + offset) & LPC_MASK as usize;
            self.words[addr] = *word;
        }
    }

    /// Loads a raw image of 16-bit words at word address `base`. A trailing odd byte is ignored.
    pub fn load_image(&mut self, base: u32, bytes: &[u8], endian: Endian) {
        let len = bytes.len() & !1;
        let words: Vec<u16> = match endian {
            Endian::Little => <[U16<LittleEndian>]>::ref_from_bytes(&bytes[..len])
                .map(|w| w.iter().map(|w| w.get()).collect())
                .unwrap_or_default(),
            Endian::Big => <[U16<BigEndian>]>::ref_from_bytes(&bytes[..len])
                .map(|w| w.iter().map(|w| w.get()).collect())
                .unwrap_or_default(),
        };

        self.load(base, &words);
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

impl Bus for Ram {
    #[inline(always)]
    fn read16(&mut self, addr: u32) -> u16 {
        self.words[(addr & LPC_MASK) as usize]
    }

    #[inline(always)]
    fn write16(&mut self, addr: u32, value: u16) {
        self.words[(addr & LPC_MASK) as usize] = value;
    }
}
