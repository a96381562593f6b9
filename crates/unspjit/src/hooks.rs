use cranelift::codegen::ir;
use cranelift::codegen::isa::CallConv;
use strum::FromRepr;
use unsp::regs::Registers;

pub type Context = std::ffi::c_void;

pub type GetRegistersHook = extern "C-unwind" fn(*mut Context) -> *mut Registers;
pub type ReadHook = extern "C-unwind" fn(*mut Context, u32) -> u16;
/// Returns whether the write hit translated code.
pub type WriteHook = extern "C-unwind" fn(*mut Context, u32, u16) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum HookKind {
    GetRegisters,
    Read,
    Write,
}

/// External functions that JITed code calls.
pub struct Hooks {
    /// Hook that returns a pointer to the register file given the context.
    pub get_registers: GetRegistersHook,
    /// Reads a word from the bus.
    pub read: ReadHook,
    /// Writes a word to the bus and invalidates any translated code that depends on it.
    pub write: WriteHook,
}

impl Hooks {
    #[allow(unused_assignments)]
    #[cfg(test)]
    pub(crate) unsafe fn stub() -> Self {
        let mut count = usize::MAX;
        macro_rules! stub {
            () => {{
                let ptr = unsafe { std::mem::transmute(count) };
                count -= 1;
                ptr
            }};
        }

        Self {
            get_registers: stub!(),
            read: stub!(),
            write: stub!(),
        }
    }

    pub(crate) fn address(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::GetRegisters => self.get_registers as usize,
            HookKind::Read => self.read as usize,
            HookKind::Write => self.write as usize,
        }
    }

    /// Returns the function signature for the `get_registers` hook.
    pub(crate) fn get_registers_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        ir::Signature {
            params: vec![
                ir::AbiParam::new(ptr_type), // ctx
            ],
            returns: vec![ir::AbiParam::new(ptr_type)], // registers
            call_conv,
        }
    }

    /// Returns the function signature for the `read` hook.
    pub(crate) fn read_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        ir::Signature {
            params: vec![
                ir::AbiParam::new(ptr_type),       // ctx
                ir::AbiParam::new(ir::types::I32), // address
            ],
            returns: vec![ir::AbiParam::new(ir::types::I16)], // value
            call_conv,
        }
    }

    /// Returns the function signature for the `write` hook.
    pub(crate) fn write_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        ir::Signature {
            params: vec![
                ir::AbiParam::new(ptr_type),       // ctx
                ir::AbiParam::new(ir::types::I32), // address
                ir::AbiParam::new(ir::types::I16), // value
            ],
            returns: vec![ir::AbiParam::new(ir::types::I8)], // invalidated
            call_conv,
        }
    }
}
