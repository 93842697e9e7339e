use std::sync::OnceLock;

use crate::parse::func::{FuncIdx, TypeIdx};

/// A concrete entry point a call can jump to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Callable {
    /// A function with a body, by position in the module's code list.
    Defined(u32),
    /// An imported host function, by import slot.
    Host(u32),
}

/// The resolution cell of one static call instruction.
#[derive(Debug)]
pub(crate) enum CallSite {
    /// `call`: bound to a function index until first executed, then to the
    /// resolved entry point for the lifetime of the code.
    Direct {
        func: FuncIdx,
        target: OnceLock<Callable>,
    },
    /// `call_indirect`: the table slot is looked up on every execution and
    /// checked against `ty`.
    Indirect { ty: TypeIdx },
}

impl CallSite {
    pub(crate) fn direct(func: FuncIdx) -> Self {
        CallSite::Direct {
            func,
            target: OnceLock::new(),
        }
    }

    pub(crate) fn indirect(ty: TypeIdx) -> Self {
        CallSite::Indirect { ty }
    }

    #[cfg(test)]
    pub(crate) fn is_resolved(&self) -> bool {
        match self {
            CallSite::Direct { target, .. } => target.get().is_some(),
            CallSite::Indirect { .. } => true,
        }
    }
}

impl Clone for CallSite {
    /// Clones start unresolved; resolution is per code entry.
    fn clone(&self) -> Self {
        match self {
            CallSite::Direct { func, .. } => CallSite::direct(*func),
            CallSite::Indirect { ty } => CallSite::indirect(*ty),
        }
    }
}
