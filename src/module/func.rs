use crate::{validate::isa::Instr, value::ValType};
use alloc::vec::Vec;

/// A local (non-imported) function: its signature's type index, its declared
/// local variables (beyond the parameters), and the resolved bytecode the
/// validator produced for its body (spec §3/§4.3).
#[derive(Debug, Clone)]
pub struct LocalFunc {
    pub type_idx: u32,
    /// Declared locals, in order, *excluding* the function's parameters.
    /// Parameters occupy slots `0..params.len()`; these occupy the rest.
    pub locals: Vec<ValType>,
    pub code: Vec<Instr>,
}

impl LocalFunc {
    /// Total slot count of params + declared locals, i.e. the frame size a
    /// call to this function reserves on the value stack before it starts
    /// pushing operands (spec §4.4's "locals base pointer").
    pub fn num_locals(&self, num_params: usize) -> u32 {
        (num_params + self.locals.len()) as u32
    }
}

/// Either a function declared as an import (callable only if the embedder
/// has wired a host function, which this design does not support — calling
/// one traps with [`crate::error::TrapCode::UnresolvedImport`]) or a local
/// function with a validated body.
#[derive(Debug, Clone)]
pub enum FuncKind {
    Imported,
    Local(LocalFunc),
}
