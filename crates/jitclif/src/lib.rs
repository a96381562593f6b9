//! Utilities shared by cranelift based JITs.
pub mod isa;

use cranelift_codegen::FinalizedMachReloc;
use cranelift_codegen::binemit::Reloc;
use easyerr::Error;

#[derive(Debug, Error)]
pub enum RelocError {
    #[error("unsupported relocation kind {kind:?}")]
    Unsupported { kind: Reloc },
    #[error("relocation at offset {offset} is out of bounds")]
    OutOfBounds { offset: u32 },
}

/// Writes an absolute address for `reloc` into `code`.
pub fn write_relocation(
    code: &mut [u8],
    reloc: &FinalizedMachReloc,
    addr: usize,
) -> Result<(), RelocError> {
    match reloc.kind {
        Reloc::Abs8 => {
            let offset = reloc.offset;
            let target = code
                .get_mut(offset as usize..)
                .and_then(|c| c.get_mut(..size_of::<usize>()))
                .ok_or(RelocError::OutOfBounds { offset })?;

            target.copy_from_slice(&addr.to_ne_bytes());
            Ok(())
        }
        kind => Err(RelocError::Unsupported { kind }),
    }
}
